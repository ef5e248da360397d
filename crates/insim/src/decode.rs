//! Typed event decoding for validated InSim packets.
//!
//! The decoder keeps the small amount of cross-packet state the protocol
//! requires: the PLID-to-car mapping learned from NPL packets, the viewed
//! PLID and track code from STA, and the most recently observed `flags2`
//! word (NPL re-emits it so state listeners always see current mode flags).

use crate::{PacketType, schema};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Width of the player-name field trailing LAP and SPX packets.
const NAME_SEGMENT: usize = 24;
/// Offset of the first trailing byte after the fixed LAP/SPX fields.
const LAP_FIXED_END: usize = 18;

/// Session state snapshot decoded from STA (or re-emitted on NPL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEvent {
    pub flags2: u16,
    pub view_plid: Option<u8>,
    pub track: Option<String>,
    pub car: Option<String>,
}

/// Completed-lap crossing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LapEvent {
    pub plid: u8,
    pub lap_time_ms: u32,
    pub estimate_time_ms: u32,
    pub flags: u16,
    pub penalty: u8,
    pub num_pit_stops: u8,
    pub fuel_200: u8,
    pub player_name: String,
    pub track: Option<String>,
    pub car: Option<String>,
}

/// Split-line crossing with a cumulative time from lap start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitEvent {
    pub plid: u8,
    pub split_time_ms: u32,
    pub estimate_time_ms: u32,
    pub flags: u16,
    pub split_index: u8,
    pub player_name: String,
    pub track: Option<String>,
    pub car: Option<String>,
}

/// HUD button click report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonClickEvent {
    pub click_id: u8,
    pub flags: u16,
}

/// One entry of a multi-car position snapshot. Coordinates are simulator
/// integer units (65,536 per metre), speed is centimetres per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarInfo {
    pub node: u16,
    pub lap: u16,
    pub plid: u8,
    pub position: u8,
    pub info: u8,
    pub spare: u8,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub speed: u16,
    pub direction: u16,
    pub heading: u16,
    pub angular_velocity: i16,
}

/// Multi-car snapshot with the decoder's current focus PLID attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiCarInfoEvent {
    pub cars: Vec<CarInfo>,
    pub view_plid: Option<u8>,
}

/// Every event kind the decoder can emit.
#[derive(Debug, Clone, PartialEq)]
pub enum InSimEvent {
    State(StateEvent),
    Lap(LapEvent),
    Split(SplitEvent),
    ButtonClick(ButtonClickEvent),
    MultiCar(MultiCarInfoEvent),
}

/// Rejection reasons for packets that passed framing.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Schema(#[from] schema::SchemaError),

    #[error("{kind} name segment too short: {available} bytes, need {NAME_SEGMENT}")]
    NameSegment { kind: &'static str, available: usize },

    #[error("MCI declares {count} cars but only {available} payload bytes")]
    CarCount { count: usize, available: usize },

    #[error("packet too short for field `{0}`")]
    Truncated(&'static str),
}

/// Stateful packet-to-event decoder.
#[derive(Debug, Default)]
pub struct Decoder {
    plid_to_car: HashMap<u8, String>,
    view_plid: Option<u8>,
    last_flags2: u16,
    current_track: Option<String>,
    current_car: Option<String>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the decoder currently attributes events to, if any.
    pub fn current_track(&self) -> Option<&str> {
        self.current_track.as_deref()
    }

    pub fn current_car(&self) -> Option<&str> {
        self.current_car.as_deref()
    }

    /// Decode one framed packet into at most one typed event.
    ///
    /// `Ok(None)` means the packet was consumed without an event (VER
    /// handshake). Schema violations and malformed payloads are rejections:
    /// the caller logs them and the stream continues.
    pub fn decode(&mut self, packet: &[u8]) -> Result<Option<InSimEvent>, DecodeError> {
        schema::validate(packet)?;

        let Some(ty) = packet.get(1).copied().and_then(PacketType::from_byte) else {
            return Ok(None);
        };
        match ty {
            PacketType::Ver => {
                debug!("InSim version handshake received");
                Ok(None)
            }
            PacketType::Sta => self.decode_sta(packet).map(Some),
            PacketType::Npl => self.decode_npl(packet).map(Some),
            PacketType::Lap => self.decode_lap(packet).map(Some),
            PacketType::Spx => self.decode_spx(packet).map(Some),
            PacketType::Btc => self.decode_btc(packet).map(Some),
            PacketType::Mci => self.decode_mci(packet).map(Some),
        }
    }

    fn decode_sta(&mut self, packet: &[u8]) -> Result<InSimEvent, DecodeError> {
        let flags2 = read_u16_le(packet, 16).ok_or(DecodeError::Truncated("flags2"))?;
        let view_plid = match packet.get(10).copied().ok_or(DecodeError::Truncated("view_plid"))? {
            0 => None,
            plid => Some(plid),
        };
        let track = packet
            .get(20..26)
            .map(latin1_trimmed)
            .filter(|code| !code.is_empty());

        self.last_flags2 = flags2;
        self.view_plid = view_plid;
        if let Some(code) = &track {
            self.current_track = Some(code.clone());
        }
        if let Some(plid) = view_plid
            && let Some(car) = self.plid_to_car.get(&plid)
        {
            self.current_car = Some(car.clone());
        }

        Ok(InSimEvent::State(StateEvent {
            flags2,
            view_plid,
            track: self.current_track.clone(),
            car: self.current_car.clone(),
        }))
    }

    fn decode_npl(&mut self, packet: &[u8]) -> Result<InSimEvent, DecodeError> {
        let plid = packet.get(3).copied().ok_or(DecodeError::Truncated("plid"))?;
        let car = packet
            .get(40..44)
            .map(latin1_trimmed)
            .ok_or(DecodeError::Truncated("car"))?;

        debug!(plid, car = %car, "player joined");
        self.plid_to_car.insert(plid, car.clone());
        if self.view_plid == Some(plid) {
            self.current_car = Some(car);
        }

        // Re-emit state with the last observed flags so listeners keep the
        // current multiplayer bit rather than a zeroed word.
        Ok(InSimEvent::State(StateEvent {
            flags2: self.last_flags2,
            view_plid: self.view_plid,
            track: self.current_track.clone(),
            car: self.current_car.clone(),
        }))
    }

    fn decode_lap(&mut self, packet: &[u8]) -> Result<InSimEvent, DecodeError> {
        let plid = packet.get(3).copied().ok_or(DecodeError::Truncated("plid"))?;
        let lap_time_ms = read_u32_le(packet, 4).ok_or(DecodeError::Truncated("lap_time_ms"))?;
        let estimate_time_ms =
            read_u32_le(packet, 8).ok_or(DecodeError::Truncated("estimate_time_ms"))?;
        let flags = read_u16_le(packet, 12).ok_or(DecodeError::Truncated("flags"))?;
        let penalty = packet.get(15).copied().ok_or(DecodeError::Truncated("penalty"))?;
        let num_pit_stops = packet
            .get(16)
            .copied()
            .ok_or(DecodeError::Truncated("num_pit_stops"))?;
        let fuel_200 = packet.get(17).copied().ok_or(DecodeError::Truncated("fuel_200"))?;
        let player_name = trailing_name(packet, "LAP")?;

        Ok(InSimEvent::Lap(LapEvent {
            plid,
            lap_time_ms,
            estimate_time_ms,
            flags,
            penalty,
            num_pit_stops,
            fuel_200,
            player_name,
            track: self.current_track.clone(),
            car: self.car_for(plid),
        }))
    }

    fn decode_spx(&mut self, packet: &[u8]) -> Result<InSimEvent, DecodeError> {
        let plid = packet.get(3).copied().ok_or(DecodeError::Truncated("plid"))?;
        let split_time_ms =
            read_u32_le(packet, 4).ok_or(DecodeError::Truncated("split_time_ms"))?;
        let estimate_time_ms =
            read_u32_le(packet, 8).ok_or(DecodeError::Truncated("estimate_time_ms"))?;
        let flags = read_u16_le(packet, 12).ok_or(DecodeError::Truncated("flags"))?;
        let split_index = packet
            .get(14)
            .copied()
            .ok_or(DecodeError::Truncated("split_index"))?;
        let player_name = trailing_name(packet, "SPX")?;

        Ok(InSimEvent::Split(SplitEvent {
            plid,
            split_time_ms,
            estimate_time_ms,
            flags,
            split_index,
            player_name,
            track: self.current_track.clone(),
            car: self.car_for(plid),
        }))
    }

    fn decode_btc(&mut self, packet: &[u8]) -> Result<InSimEvent, DecodeError> {
        let click_id = packet.get(4).copied().ok_or(DecodeError::Truncated("click_id"))?;
        let flags = read_u16_le(packet, 6).ok_or(DecodeError::Truncated("flags"))?;
        Ok(InSimEvent::ButtonClick(ButtonClickEvent { click_id, flags }))
    }

    fn decode_mci(&mut self, packet: &[u8]) -> Result<InSimEvent, DecodeError> {
        let count = packet.get(3).copied().ok_or(DecodeError::Truncated("count"))? as usize;
        let needed = 4 + count * 28;
        if packet.len() < needed {
            return Err(DecodeError::CarCount {
                count,
                available: packet.len().saturating_sub(4),
            });
        }

        let mut cars = Vec::with_capacity(count);
        for index in 0..count {
            let base = 4 + index * 28;
            cars.push(CarInfo {
                node: read_u16_le(packet, base).ok_or(DecodeError::Truncated("node"))?,
                lap: read_u16_le(packet, base + 2).ok_or(DecodeError::Truncated("lap"))?,
                plid: packet
                    .get(base + 4)
                    .copied()
                    .ok_or(DecodeError::Truncated("plid"))?,
                position: packet
                    .get(base + 5)
                    .copied()
                    .ok_or(DecodeError::Truncated("position"))?,
                info: packet
                    .get(base + 6)
                    .copied()
                    .ok_or(DecodeError::Truncated("info"))?,
                spare: packet
                    .get(base + 7)
                    .copied()
                    .ok_or(DecodeError::Truncated("spare"))?,
                x: read_i32_le(packet, base + 8).ok_or(DecodeError::Truncated("x"))?,
                y: read_i32_le(packet, base + 12).ok_or(DecodeError::Truncated("y"))?,
                z: read_i32_le(packet, base + 16).ok_or(DecodeError::Truncated("z"))?,
                speed: read_u16_le(packet, base + 20).ok_or(DecodeError::Truncated("speed"))?,
                direction: read_u16_le(packet, base + 22)
                    .ok_or(DecodeError::Truncated("direction"))?,
                heading: read_u16_le(packet, base + 24)
                    .ok_or(DecodeError::Truncated("heading"))?,
                angular_velocity: read_i16_le(packet, base + 26)
                    .ok_or(DecodeError::Truncated("angular_velocity"))?,
            });
        }

        Ok(InSimEvent::MultiCar(MultiCarInfoEvent {
            cars,
            view_plid: self.view_plid,
        }))
    }

    fn car_for(&self, plid: u8) -> Option<String> {
        if let Some(car) = self.plid_to_car.get(&plid) {
            return Some(car.clone());
        }
        if self.view_plid == Some(plid) {
            return self.current_car.clone();
        }
        None
    }
}

/// Decode the 24-byte player name that terminates LAP and SPX packets.
///
/// The segment after the fixed fields must hold at least the name; a
/// 25-byte segment carries one spare byte before it. Shorter segments are
/// rejected outright.
fn trailing_name(packet: &[u8], kind: &'static str) -> Result<String, DecodeError> {
    let available = packet.len().saturating_sub(LAP_FIXED_END);
    if available < NAME_SEGMENT {
        warn!(kind, available, "rejecting packet with short name segment");
        return Err(DecodeError::NameSegment { kind, available });
    }
    let start = packet.len() - NAME_SEGMENT;
    Ok(packet.get(start..).map(latin1_trimmed).unwrap_or_default())
}

fn latin1_trimmed(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .and_then(|b| b.try_into().ok())
        .map(u16::from_le_bytes)
}

fn read_i16_le(data: &[u8], offset: usize) -> Option<i16> {
    data.get(offset..offset + 2)
        .and_then(|b| b.try_into().ok())
        .map(i16::from_le_bytes)
}

fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
}

fn read_i32_le(data: &[u8], offset: usize) -> Option<i32> {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_le_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Framer, PacketType};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sta_packet(flags2: u16, view_plid: u8, track: &str) -> Vec<u8> {
        let mut packet = vec![0u8; 28];
        packet[0] = 28;
        packet[1] = PacketType::Sta as u8;
        packet[10] = view_plid;
        packet[16..18].copy_from_slice(&flags2.to_le_bytes());
        let code = track.as_bytes();
        packet[20..20 + code.len().min(6)].copy_from_slice(&code[..code.len().min(6)]);
        packet
    }

    fn npl_packet(plid: u8, car: &str) -> Vec<u8> {
        let mut packet = vec![0u8; 44];
        packet[0] = 44;
        packet[1] = PacketType::Npl as u8;
        packet[3] = plid;
        let name = car.as_bytes();
        packet[40..40 + name.len().min(4)].copy_from_slice(&name[..name.len().min(4)]);
        packet
    }

    fn lap_packet(plid: u8, lap_time: u32, estimate: u32, name: &str, size: usize) -> Vec<u8> {
        let mut packet = vec![0u8; size];
        packet[0] = size as u8;
        packet[1] = PacketType::Lap as u8;
        packet[3] = plid;
        packet[4..8].copy_from_slice(&lap_time.to_le_bytes());
        packet[8..12].copy_from_slice(&estimate.to_le_bytes());
        let start = size - NAME_SEGMENT;
        let bytes = name.as_bytes();
        packet[start..start + bytes.len().min(NAME_SEGMENT)]
            .copy_from_slice(&bytes[..bytes.len().min(NAME_SEGMENT)]);
        packet
    }

    fn spx_packet(plid: u8, split_time: u32, estimate: u32, index: u8) -> Vec<u8> {
        let mut packet = vec![0u8; 42];
        packet[0] = 42;
        packet[1] = PacketType::Spx as u8;
        packet[3] = plid;
        packet[4..8].copy_from_slice(&split_time.to_le_bytes());
        packet[8..12].copy_from_slice(&estimate.to_le_bytes());
        packet[14] = index;
        packet
    }

    #[test]
    fn sta_updates_track_and_flags() -> TestResult {
        let mut decoder = Decoder::new();
        let event = decoder.decode(&sta_packet(1, 0, "BL1"))?;

        match event {
            Some(InSimEvent::State(state)) => {
                assert_eq!(state.flags2, 1);
                assert_eq!(state.view_plid, None);
                assert_eq!(state.track.as_deref(), Some("BL1"));
                assert_eq!(state.car, None);
            }
            other => return Err(format!("expected state event, got {other:?}").into()),
        }
        assert_eq!(decoder.current_track(), Some("BL1"));
        Ok(())
    }

    #[test]
    fn sta_with_blank_track_keeps_previous() -> TestResult {
        let mut decoder = Decoder::new();
        decoder.decode(&sta_packet(0, 0, "SO1"))?;
        decoder.decode(&sta_packet(0, 0, ""))?;
        assert_eq!(decoder.current_track(), Some("SO1"));
        Ok(())
    }

    #[test]
    fn npl_reemits_last_flags() -> TestResult {
        let mut decoder = Decoder::new();
        decoder.decode(&sta_packet(1, 7, "AS3"))?;
        let event = decoder.decode(&npl_packet(7, "XFG"))?;

        match event {
            Some(InSimEvent::State(state)) => {
                assert_eq!(state.flags2, 1, "NPL must carry the last observed flags2");
                assert_eq!(state.car.as_deref(), Some("XFG"));
            }
            other => return Err(format!("expected state event, got {other:?}").into()),
        }
        Ok(())
    }

    #[test]
    fn lap_resolves_track_and_car_from_context() -> TestResult {
        let mut decoder = Decoder::new();
        decoder.decode(&sta_packet(0, 0, "BL1"))?;
        decoder.decode(&npl_packet(5, "XFG"))?;

        let event = decoder.decode(&lap_packet(5, 73_000, 74_000, "Driver", 64))?;
        match event {
            Some(InSimEvent::Lap(lap)) => {
                assert_eq!(lap.lap_time_ms, 73_000);
                assert_eq!(lap.estimate_time_ms, 74_000);
                assert_eq!(lap.player_name, "Driver");
                assert_eq!(lap.track.as_deref(), Some("BL1"));
                assert_eq!(lap.car.as_deref(), Some("XFG"));
            }
            other => return Err(format!("expected lap event, got {other:?}").into()),
        }
        Ok(())
    }

    #[test]
    fn resync_after_corrupted_prefix_yields_one_lap_event() -> TestResult {
        let mut framer = Framer::new();
        let mut decoder = Decoder::new();
        decoder.decode(&sta_packet(0, 0, "BL1"))?;
        decoder.decode(&npl_packet(5, "XFG"))?;

        let mut bytes = vec![200, PacketType::Lap as u8];
        bytes.extend_from_slice(&lap_packet(5, 73_000, 74_000, "Driver", 64));
        framer.extend(&bytes);

        let mut events = Vec::new();
        for packet in framer.drain() {
            if let Some(event) = decoder.decode(&packet)? {
                events.push(event);
            }
        }

        assert_eq!(events.len(), 1);
        match &events[0] {
            InSimEvent::Lap(lap) => {
                assert_eq!(lap.track.as_deref(), Some("BL1"));
                assert_eq!(lap.car.as_deref(), Some("XFG"));
                assert_eq!(lap.lap_time_ms, 73_000);
            }
            other => return Err(format!("expected lap event, got {other:?}").into()),
        }
        Ok(())
    }

    #[test]
    fn lap_with_spare_byte_before_name_decodes() -> TestResult {
        // 43-byte packet: one spare byte between the fixed fields and the
        // 24-byte name.
        let mut decoder = Decoder::new();
        let event = decoder.decode(&lap_packet(2, 61_000, 0, "P2", 43))?;
        match event {
            Some(InSimEvent::Lap(lap)) => assert_eq!(lap.player_name, "P2"),
            other => return Err(format!("expected lap event, got {other:?}").into()),
        }
        Ok(())
    }

    #[test]
    fn lap_with_short_name_segment_is_rejected() {
        // 41 bytes fails the schema bound before the name rule even applies;
        // the name rule itself needs a size the schema allows, so check the
        // error surface with a directly crafted decoder call.
        let mut packet = vec![0u8; 41];
        packet[0] = 41;
        packet[1] = PacketType::Lap as u8;
        let mut decoder = Decoder::new();
        assert!(decoder.decode(&packet).is_err());
    }

    #[test]
    fn spx_carries_split_index_and_estimate() -> TestResult {
        let mut decoder = Decoder::new();
        let event = decoder.decode(&spx_packet(3, 31_500, 93_000, 1))?;
        match event {
            Some(InSimEvent::Split(split)) => {
                assert_eq!(split.split_time_ms, 31_500);
                assert_eq!(split.estimate_time_ms, 93_000);
                assert_eq!(split.split_index, 1);
            }
            other => return Err(format!("expected split event, got {other:?}").into()),
        }
        Ok(())
    }

    #[test]
    fn btc_decodes_click() -> TestResult {
        let mut packet = vec![0u8; 8];
        packet[0] = 8;
        packet[1] = PacketType::Btc as u8;
        packet[4] = 200;
        packet[6..8].copy_from_slice(&0x01u16.to_le_bytes());

        let mut decoder = Decoder::new();
        match decoder.decode(&packet)? {
            Some(InSimEvent::ButtonClick(click)) => {
                assert_eq!(click.click_id, 200);
                assert_eq!(click.flags, 0x01);
            }
            other => return Err(format!("expected click event, got {other:?}").into()),
        }
        Ok(())
    }

    #[test]
    fn mci_decodes_entries_and_focus() -> TestResult {
        let mut decoder = Decoder::new();
        decoder.decode(&sta_packet(0, 9, "FE2"))?;

        let mut packet = vec![0u8; 4 + 28];
        packet[0] = 32;
        packet[1] = PacketType::Mci as u8;
        packet[3] = 1;
        let base = 4;
        packet[base..base + 2].copy_from_slice(&7u16.to_le_bytes());
        packet[base + 2..base + 4].copy_from_slice(&3u16.to_le_bytes());
        packet[base + 4] = 9;
        packet[base + 5] = 1;
        packet[base + 8..base + 12].copy_from_slice(&65_536i32.to_le_bytes());
        packet[base + 12..base + 16].copy_from_slice(&(-131_072i32).to_le_bytes());
        packet[base + 16..base + 20].copy_from_slice(&32_768i32.to_le_bytes());
        packet[base + 20..base + 22].copy_from_slice(&450u16.to_le_bytes());
        packet[base + 26..base + 28].copy_from_slice(&(-12i16).to_le_bytes());

        match decoder.decode(&packet)? {
            Some(InSimEvent::MultiCar(mci)) => {
                assert_eq!(mci.view_plid, Some(9));
                assert_eq!(mci.cars.len(), 1);
                let car = &mci.cars[0];
                assert_eq!(car.node, 7);
                assert_eq!(car.lap, 3);
                assert_eq!(car.plid, 9);
                assert_eq!(car.x, 65_536);
                assert_eq!(car.y, -131_072);
                assert_eq!(car.z, 32_768);
                assert_eq!(car.speed, 450);
                assert_eq!(car.angular_velocity, -12);
            }
            other => return Err(format!("expected MCI event, got {other:?}").into()),
        }
        Ok(())
    }

    #[test]
    fn mci_with_missing_entries_is_rejected() {
        let mut packet = vec![0u8; 32];
        packet[0] = 32;
        packet[1] = PacketType::Mci as u8;
        packet[3] = 3;
        let mut decoder = Decoder::new();
        assert!(matches!(
            decoder.decode(&packet),
            Err(DecodeError::CarCount { count: 3, .. })
        ));
    }

    #[test]
    fn ver_is_consumed_silently() -> TestResult {
        let mut packet = vec![0u8; 20];
        packet[0] = 20;
        packet[1] = PacketType::Ver as u8;
        let mut decoder = Decoder::new();
        assert!(decoder.decode(&packet)?.is_none());
        Ok(())
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_never_panics_on_arbitrary_bytes(
                bytes in proptest::collection::vec(any::<u8>(), 0..300)
            ) {
                let mut decoder = Decoder::new();
                let _ = decoder.decode(&bytes);
            }

            #[test]
            fn framed_packets_decode_or_reject(
                bytes in proptest::collection::vec(any::<u8>(), 0..4096)
            ) {
                let mut framer = Framer::new();
                let mut decoder = Decoder::new();
                framer.extend(&bytes);
                for packet in framer.drain() {
                    // Size byte must survive framing (module 256 for MCI).
                    prop_assert_eq!(packet[0] as usize, packet.len() % 256);
                    // Every framed packet either decodes to one event, is a
                    // silent handshake, or reports a rejection reason.
                    let _ = decoder.decode(&packet);
                }
            }
        }
    }
}

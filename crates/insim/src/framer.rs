//! Stream framing for the InSim byte stream.
//!
//! The framer owns a bounded byte buffer fed by the TCP socket and yields
//! complete, header-valid packets. Corruption is never fatal: invalid
//! prefixes are discarded and the stream is resynchronised on the next
//! plausible packet header.

use crate::{PacketType, schema};
use tracing::{debug, warn};

/// Hard cap on buffered bytes before the oldest are discarded.
pub const DEFAULT_BUFFER_LIMIT: usize = 65_536;

/// Fixed MCI entry width used to recover wrapped packet sizes.
const MCI_ENTRY_SIZE: usize = 28;
const MCI_HEADER_SIZE: usize = 4;

/// Bounded buffer turning a TCP byte stream into packet records.
pub struct Framer {
    buffer: Vec<u8>,
    limit: usize,
    needs_resync: bool,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_BUFFER_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit: limit.max(schema::MIN_PACKET_SIZE),
            needs_resync: false,
        }
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append incoming bytes, discarding the oldest on overflow.
    ///
    /// After an overflow discard the buffer may start mid-packet, so the
    /// next [`drain`](Self::drain) resynchronises before extracting and only
    /// accepts candidates whose payload is already complete.
    pub fn extend(&mut self, incoming: &[u8]) {
        let total = self.buffer.len() + incoming.len();
        if total > self.limit {
            let overflow = total - self.limit;
            if overflow >= self.buffer.len() {
                let dropped = self.buffer.len() + incoming.len() - self.limit;
                warn!(dropped, "InSim buffer overflow; discarding oldest bytes");
                self.buffer.clear();
                let start = incoming.len() - self.limit.min(incoming.len());
                self.buffer.extend_from_slice(&incoming[start..]);
            } else {
                warn!(
                    dropped = overflow,
                    "InSim buffer overflow; discarding oldest bytes"
                );
                self.buffer.drain(..overflow);
                self.buffer.extend_from_slice(incoming);
            }
            self.needs_resync = true;
            return;
        }
        self.buffer.extend_from_slice(incoming);
    }

    /// Extract every complete, header-valid packet currently buffered.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        let mut require_complete = std::mem::take(&mut self.needs_resync);

        loop {
            match self.find_candidate(require_complete) {
                Some(offset) => {
                    if offset > 0 {
                        debug!(dropped = offset, "discarding bytes before resync candidate");
                        self.buffer.drain(..offset);
                    }
                }
                None => {
                    if !self.buffer.is_empty() {
                        warn!(
                            dropped = self.buffer.len(),
                            "no packet candidate in InSim buffer; clearing"
                        );
                        self.buffer.clear();
                    }
                    break;
                }
            }

            // Once a plausible header anchors the stream, later candidates in
            // this pass may still be arriving.
            require_complete = false;

            let declared = self.buffer[0] as usize;
            let type_byte = self.buffer[1];
            if let Err(err) = schema::validate_header(declared, type_byte) {
                // Never skip the declared size here: a corrupt size byte must
                // not swallow a valid packet starting inside the bogus span.
                warn!(error = %err, "invalid InSim header; discarding 2 bytes");
                self.buffer.drain(..2);
                continue;
            }

            let Some(needed) = self.packet_length(declared, type_byte) else {
                // Not enough buffered to know the length yet (wrapped MCI).
                break;
            };
            if self.buffer.len() < needed {
                break;
            }
            packets.push(self.buffer.drain(..needed).collect());
        }
        packets
    }

    /// Forget all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.needs_resync = false;
    }

    /// True packet length for an accepted header, or `None` when more bytes
    /// are required to determine it.
    fn packet_length(&self, declared: usize, type_byte: u8) -> Option<usize> {
        if PacketType::from_byte(type_byte) == Some(PacketType::Mci) {
            if self.buffer.len() < MCI_HEADER_SIZE {
                return None;
            }
            let count = self.buffer[3] as usize;
            let actual = MCI_HEADER_SIZE + count * MCI_ENTRY_SIZE;
            // The one-byte size field wraps modulo 256; as long as the
            // declared value matches the computed length it is not corrupt.
            if actual % 256 == declared % 256 || actual == declared {
                return Some(actual);
            }
        }
        Some(declared)
    }

    /// First offset that looks like a packet header: non-zero size byte, a
    /// recognised type byte, and a size of at least four. With
    /// `require_complete` the whole payload must already be buffered.
    fn find_candidate(&self, require_complete: bool) -> Option<usize> {
        let len = self.buffer.len();
        for offset in 0..len {
            let size = self.buffer[offset] as usize;
            if size == 0 || size < schema::MIN_PACKET_SIZE {
                continue;
            }
            let Some(&type_byte) = self.buffer.get(offset + 1) else {
                continue;
            };
            if PacketType::from_byte(type_byte).is_none() {
                continue;
            }
            if require_complete && offset + size > len {
                continue;
            }
            return Some(offset);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PacketType;

    fn btc_packet() -> Vec<u8> {
        let mut packet = vec![0u8; 8];
        packet[0] = 8;
        packet[1] = PacketType::Btc as u8;
        packet[4] = 200;
        packet[6] = 0x01;
        packet
    }

    fn sta_packet() -> Vec<u8> {
        let mut packet = vec![0u8; 28];
        packet[0] = 28;
        packet[1] = PacketType::Sta as u8;
        packet
    }

    #[test]
    fn whole_packet_is_extracted() {
        let mut framer = Framer::new();
        framer.extend(&sta_packet());
        let packets = framer.drain();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0][1], PacketType::Sta as u8);
        assert!(framer.is_empty());
    }

    #[test]
    fn partial_packet_waits_for_more_bytes() {
        let mut framer = Framer::new();
        let packet = sta_packet();
        framer.extend(&packet[..10]);
        assert!(framer.drain().is_empty());
        framer.extend(&packet[10..]);
        assert_eq!(framer.drain().len(), 1);
    }

    #[test]
    fn corrupted_prefix_is_skipped_with_two_byte_discards() {
        // An in-range size byte with a known type but an impossible header:
        // 200 bytes is outside every LAP bound, so the framer drops the
        // size/type pair and recovers the real packet behind it.
        let mut framer = Framer::new();
        let mut bytes = vec![200, PacketType::Lap as u8];
        let mut lap = vec![0u8; 64];
        lap[0] = 64;
        lap[1] = PacketType::Lap as u8;
        lap[3] = 5;
        bytes.extend_from_slice(&lap);

        framer.extend(&bytes);
        let packets = framer.drain();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0][0], 64);
        assert_eq!(packets[0][3], 5);
        assert!(framer.is_empty());
    }

    #[test]
    fn unknown_bytes_before_packet_are_dropped() {
        let mut framer = Framer::new();
        let mut bytes = vec![0xDE, 0xAD, 0xBE];
        bytes.extend_from_slice(&btc_packet());
        framer.extend(&bytes);
        let packets = framer.drain();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0][1], PacketType::Btc as u8);
    }

    #[test]
    fn garbage_only_buffer_is_cleared() {
        let mut framer = Framer::new();
        framer.extend(&[0x00, 0xFF, 0x03, 0x07, 0x00]);
        assert!(framer.drain().is_empty());
        assert!(framer.is_empty());
    }

    #[test]
    fn overflow_keeps_newest_bytes_and_resyncs() {
        // Buffer limit 12: two stale 4-byte fragments followed by a complete
        // BTC packet. The oldest four bytes fall off and only the BTC packet
        // is delivered.
        let mut framer = Framer::with_limit(12);
        framer.extend(&[0x04, 0x01, 0x00, 0x00]);
        framer.extend(&[0x04, 0xC8, 0x00, 0x00]);
        framer.extend(&btc_packet());

        let packets = framer.drain();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0][1], PacketType::Btc as u8);
        assert!(framer.is_empty());
    }

    #[test]
    fn buffer_never_exceeds_limit() {
        let mut framer = Framer::with_limit(64);
        for _ in 0..100 {
            framer.extend(&[0xAA; 48]);
            assert!(framer.len() <= 64);
        }
    }

    #[test]
    fn wrapped_mci_size_is_not_treated_as_corruption() {
        // 10 cars: true length 284, size byte 284 % 256 = 28.
        let mut packet = vec![0u8; 284];
        packet[0] = 28;
        packet[1] = PacketType::Mci as u8;
        packet[3] = 10;

        let mut framer = Framer::new();
        framer.extend(&packet);
        let packets = framer.drain();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 284);
    }

    #[test]
    fn small_mci_uses_declared_size() {
        let mut packet = vec![0u8; 60];
        packet[0] = 60;
        packet[1] = PacketType::Mci as u8;
        packet[3] = 2;

        let mut framer = Framer::new();
        framer.extend(&packet);
        let packets = framer.drain();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 60);
    }

    #[test]
    fn back_to_back_packets_all_extracted() {
        let mut framer = Framer::new();
        let mut bytes = sta_packet();
        bytes.extend_from_slice(&btc_packet());
        bytes.extend_from_slice(&sta_packet());
        framer.extend(&bytes);
        assert_eq!(framer.drain().len(), 3);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn buffered_bytes_never_exceed_limit(
                chunks in proptest::collection::vec(
                    proptest::collection::vec(any::<u8>(), 0..200), 0..50),
                limit in 16usize..1024,
            ) {
                let mut framer = Framer::with_limit(limit);
                for chunk in &chunks {
                    framer.extend(chunk);
                    prop_assert!(framer.len() <= limit);
                    framer.drain();
                    prop_assert!(framer.len() <= limit);
                }
            }

            #[test]
            fn drain_never_panics_on_arbitrary_bytes(
                bytes in proptest::collection::vec(any::<u8>(), 0..2048)
            ) {
                let mut framer = Framer::new();
                framer.extend(&bytes);
                let _ = framer.drain();
            }

            #[test]
            fn extracted_packets_have_valid_headers(
                bytes in proptest::collection::vec(any::<u8>(), 0..2048)
            ) {
                let mut framer = Framer::new();
                framer.extend(&bytes);
                for packet in framer.drain() {
                    prop_assert!(packet.len() >= 4);
                    prop_assert!(PacketType::from_byte(packet[1]).is_some());
                }
            }
        }
    }
}

//! InSim TCP protocol support for Pitwall.
//!
//! The simulator's control/events channel is a framed little-endian byte
//! stream: the first byte of every message is its total size, the second its
//! type. This crate covers the full inbound path — per-type schema
//! validation ([`schema`]), stream framing with corruption recovery
//! ([`framer`]) and typed event decoding ([`decode`]) — plus the outbound
//! packet builders ([`encode`]) and a polling TCP client ([`client`]).
//!
//! Inbound packet kinds handled by the decoder:
//!
//! | Type | Size      | Meaning |
//! |------|-----------|---------|
//! | VER  | exact 20  | version handshake, consumed silently |
//! | STA  | exact 28  | state (mode flags, viewed player, track code) |
//! | NPL  | 44..120   | new player (PLID to car mapping) |
//! | LAP  | 42..96    | lap crossing with lap/estimate times |
//! | SPX  | 42..96    | split crossing with cumulative split time |
//! | BTC  | 8..12     | on-screen button click |
//! | MCI  | min 4     | multi-car position snapshot, size byte wraps at 256 |
//!
//! Anything else is skipped by the framer during resynchronisation.

use thiserror::Error;

pub mod client;
pub mod decode;
pub mod encode;
pub mod framer;
pub mod schema;

pub use client::{InSimClient, InSimWriter, PacketSink};
pub use decode::{
    ButtonClickEvent, CarInfo, Decoder, InSimEvent, LapEvent, MultiCarInfoEvent, SplitEvent,
    StateEvent,
};
pub use encode::{ButtonSpec, build_bfn, build_btn, build_isi, build_mst};
pub use framer::{DEFAULT_BUFFER_LIMIT, Framer};

/// Outbound packet type identifiers.
pub const ISP_ISI: u8 = 1;
pub const ISP_MST: u8 = 13;
pub const ISP_BFN: u8 = 42;
pub const ISP_BTN: u8 = 45;

/// STA `flags2` bit designating a multiplayer session.
pub const ISS_MULTI: u16 = 1;

/// Button style bit required for the simulator to report clicks.
pub const ISB_CLICK: u16 = 4;

/// BTC `flags` bit set for a plain left click.
pub const BTC_CLICK_FLAG: u16 = 0x01;

/// Inbound packet kinds recognised by the framer and decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Ver = 2,
    Sta = 5,
    Npl = 21,
    Lap = 24,
    Spx = 25,
    Mci = 38,
    Btc = 46,
}

impl PacketType {
    /// Map a wire type byte to a recognised inbound kind.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            2 => Some(Self::Ver),
            5 => Some(Self::Sta),
            21 => Some(Self::Npl),
            24 => Some(Self::Lap),
            25 => Some(Self::Spx),
            38 => Some(Self::Mci),
            46 => Some(Self::Btc),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ver => "VER",
            Self::Sta => "STA",
            Self::Npl => "NPL",
            Self::Lap => "LAP",
            Self::Spx => "SPX",
            Self::Mci => "MCI",
            Self::Btc => "BTC",
        }
    }
}

/// Transport-level failures of the InSim client.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("InSim I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("InSim connection closed by peer")]
    ConnectionClosed,

    #[error("InSim connection not established")]
    NotConnected,

    #[error("InSim send stalled: socket would not accept {0} bytes")]
    SendStalled(usize),
}

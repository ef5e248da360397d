//! WebSocket telemetry feed for Pitwall.
//!
//! External subscribers connect to `ws://host:port/` (any path) and receive
//! compact JSON snapshots of the latest telemetry at a fixed cadence. The
//! server side is deliberately small: a hand-rolled RFC 6455 handshake and
//! unmasked text frames, running on a single-threaded cooperative loop
//! pinned to its own OS thread so the synchronous frame loop never blocks
//! behind client I/O.

use thiserror::Error;

pub mod broadcaster;
pub mod protocol;
pub mod snapshot;

pub use broadcaster::TelemetryBroadcaster;
pub use snapshot::PlayerLapUpdate;

/// Failures of the broadcaster setup path.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("invalid telemetry feed configuration: {0}")]
    Config(String),

    #[error("telemetry feed I/O error: {0}")]
    Io(#[from] std::io::Error),
}

//! OutSim UDP kinematics ingestion for Pitwall.
//!
//! The simulator pushes a fixed 64-byte little-endian frame per physics
//! update: `<u32 time_ms, 3×f32 ang_vel, 3×f32 heading, 3×f32 accel,
//! 3×f32 velocity, 3×f32 position>`. [`OutSimClient`] binds the configured
//! port, filters by source address, rate-limits bursts and yields parsed
//! [`OutSimFrame`] values; receive timeouts yield control back to the caller
//! so the frame loop can service other subsystems.

use thiserror::Error;

pub mod client;
pub mod filter;
pub mod frame;
pub mod rate;

pub use client::OutSimClient;
pub use filter::SourceFilter;
pub use frame::{FRAME_SIZE, OutSimFrame};
pub use rate::TokenBucket;

/// Failures of the OutSim ingestion path.
#[derive(Debug, Error)]
pub enum OutSimError {
    #[error("invalid OutSim configuration: {0}")]
    Config(String),

    #[error("OutSim I/O error: {0}")]
    Io(#[from] std::io::Error),
}

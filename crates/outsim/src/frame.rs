//! OutSim frame parsing and derived kinematics.

use thiserror::Error;

/// Wire size of one OutSim datagram payload.
pub const FRAME_SIZE: usize = 64;

/// A parsed OutSim telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutSimFrame {
    pub time_ms: u32,
    pub ang_vel: [f32; 3],
    pub heading: [f32; 3],
    pub accel: [f32; 3],
    pub velocity: [f32; 3],
    pub position: [f32; 3],
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("OutSim packet too small: expected {FRAME_SIZE} bytes, got {0}")]
    TooShort(usize),
}

impl OutSimFrame {
    /// Parse the leading 64 bytes of a datagram. Larger payloads (protocol
    /// variants append an identifier) are accepted and the tail ignored.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_SIZE {
            return Err(FrameError::TooShort(data.len()));
        }
        let time_ms = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        Ok(Self {
            time_ms,
            ang_vel: vec3(data, 4),
            heading: vec3(data, 16),
            accel: vec3(data, 28),
            velocity: vec3(data, 40),
            position: vec3(data, 52),
        })
    }

    /// Scalar speed in metres per second.
    pub fn speed(&self) -> f64 {
        let [vx, vy, vz] = self.velocity;
        f64::from(vx * vx + vy * vy + vz * vz).sqrt()
    }

    /// Orientation derived from the heading vector.
    ///
    /// Only a heading vector is available, so roll is always zero.
    pub fn yaw_pitch_roll(&self) -> (f64, f64, f64) {
        let [hx, hy, hz] = self.heading.map(f64::from);
        let yaw = hx.atan2(hy);
        let pitch = hz.atan2(hx.hypot(hy));
        (yaw, pitch, 0.0)
    }
}

fn vec3(data: &[u8], offset: usize) -> [f32; 3] {
    [
        f32_at(data, offset),
        f32_at(data, offset + 4),
        f32_at(data, offset + 8),
    ]
}

// The datagram is untrusted input; NaN and infinity bit patterns are
// replaced with zero so they cannot poison downstream geometry.
fn f32_at(data: &[u8], offset: usize) -> f32 {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(f32::from_le_bytes)
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

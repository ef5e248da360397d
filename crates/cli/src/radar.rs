//! Radar renderer collaborator interface.

use pitwall_outsim::OutSimFrame;
use tracing::trace;

/// Consumes kinematic frames to paint the radar overlay.
pub trait RadarRenderer {
    fn draw(&mut self, frame: &OutSimFrame);
}

/// Placeholder renderer used until a real overlay backend is attached.
#[derive(Debug, Default)]
pub struct LoggingRadarRenderer;

impl RadarRenderer for LoggingRadarRenderer {
    fn draw(&mut self, frame: &OutSimFrame) {
        trace!(time_ms = frame.time_ms, speed = frame.speed(), "radar frame");
    }
}

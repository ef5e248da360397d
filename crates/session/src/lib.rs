//! Session state machine for Pitwall.
//!
//! The [`SessionEngine`] correlates InSim events (state changes, lap and
//! split crossings, button clicks) with OutSim frame timestamps to maintain
//! lap timing, the session best, the persistent personal best and a live
//! delta against a reference lap. Each OutSim frame produces a [`LapStatus`]
//! consumed by the status line and the WebSocket broadcaster.

pub mod engine;
pub mod model;
pub mod radar;
pub mod reference;

pub use engine::{HudButton, Mode, SessionEngine, StateOutcome, ToggleOutcome};
pub use model::SessionModel;
pub use radar::{DEFAULT_RADAR_RANGE_M, RadarTarget, compute_radar_targets};
pub use reference::reference_lap_ms;

/// Per-frame lap summary published to the status line and the broadcaster.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LapStatus {
    pub current_lap_ms: Option<u32>,
    pub reference_lap_ms: Option<u32>,
    pub delta_ms: Option<i64>,
    pub lap_progress: Option<f64>,
    pub session_best_ms: Option<u32>,
    pub personal_best_ms: Option<u32>,
}

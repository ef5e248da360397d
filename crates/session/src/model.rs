//! The session model aggregate.

use pitwall_store::PbRecord;
use std::collections::BTreeMap;

/// All mutable session state, owned by the engine for the process lifetime.
///
/// The timing subset (lap start, splits, fractions, bests) is reset by
/// [`clear_session_timing`](Self::clear_session_timing) whenever the track
/// or car context changes; the tracked driver re-seeds from the first lap or
/// split event seen in the new context.
#[derive(Debug, Clone, Default)]
pub struct SessionModel {
    pub tracked_plid: Option<u8>,
    pub tracked_driver: Option<String>,
    pub current_track: Option<String>,
    pub current_car: Option<String>,
    /// OutSim time base of the running lap.
    pub current_lap_start_ms: Option<u32>,
    /// Best lap this session; only ever decreases until a context change.
    pub best_lap_ms: Option<u32>,
    /// Split index to cumulative milliseconds from lap start.
    pub current_split_times: BTreeMap<u8, u32>,
    pub last_lap_split_fractions: Vec<f64>,
    pub pb_split_fractions: Vec<f64>,
    pub latest_estimated_total_ms: Option<u32>,
    pub persistent_best: Option<PbRecord>,
    /// A lap boundary was seen before any OutSim frame supplied a time base.
    pub pending_lap_start: bool,
    pub last_frame_time_ms: Option<u32>,
}

impl SessionModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the timing subset on a confirmed track or car change.
    pub fn clear_session_timing(&mut self) {
        self.best_lap_ms = None;
        self.current_lap_start_ms = None;
        self.current_split_times.clear();
        self.last_lap_split_fractions.clear();
        self.pb_split_fractions.clear();
        self.latest_estimated_total_ms = None;
    }

    /// Record a completed lap against the session best.
    ///
    /// Returns whether the time became the new best.
    pub fn update_session_best(&mut self, lap_time_ms: u32) -> bool {
        match self.best_lap_ms {
            Some(best) if lap_time_ms >= best => false,
            _ => {
                self.best_lap_ms = Some(lap_time_ms);
                true
            }
        }
    }

    /// Strictly monotone split fractions in (0, 1) for a completed lap.
    ///
    /// Splits are cumulative times from lap start; dividing by the lap time
    /// warps them into fractions. Values that would break monotonicity or
    /// fall on the lap boundaries are dropped.
    pub fn split_fractions_for(&self, lap_time_ms: u32) -> Vec<f64> {
        if lap_time_ms == 0 {
            return Vec::new();
        }
        let mut fractions = Vec::with_capacity(self.current_split_times.len());
        let mut last = 0.0;
        for &split_ms in self.current_split_times.values() {
            let fraction = f64::from(split_ms) / f64::from(lap_time_ms);
            if fraction > last && fraction > 0.0 && fraction < 1.0 {
                fractions.push(fraction);
                last = fraction;
            }
        }
        fractions
    }
}

//! Event handlers driving the session model.

use crate::model::SessionModel;
use crate::reference::reference_lap_ms;
use crate::LapStatus;
use pitwall_config::{Config, ModeSettings};
use pitwall_insim::{ButtonClickEvent, ISS_MULTI, LapEvent, SplitEvent, StateEvent, BTC_CLICK_FLAG};
use pitwall_outsim::OutSimFrame;
use pitwall_store::{BestLapStore, StoreError};
use tracing::{debug, info};

/// Session mode derived from the STA multiplayer bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    SinglePlayer,
    Multiplayer,
}

/// HUD buttons the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HudButton {
    Radar,
    Beeps,
}

/// What a state event changed, for the orchestrator to propagate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateOutcome {
    pub mode_changed: bool,
    pub context_changed: bool,
}

/// Result of a handled button click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Radar(bool),
    Beeps(bool),
}

/// The session engine: single-threaded, driven from the frame loop.
pub struct SessionEngine<S: BestLapStore> {
    store: S,
    model: SessionModel,
    mode: Mode,
    sp: ModeSettings,
    mp: ModeSettings,
    radar_enabled: bool,
    beeps_enabled: bool,
    focus_plid: Option<u8>,
}

impl<S: BestLapStore> SessionEngine<S> {
    pub fn new(store: S, config: &Config) -> Self {
        let sp = config.sp;
        Self {
            store,
            model: SessionModel::new(),
            mode: Mode::SinglePlayer,
            sp,
            mp: config.mp,
            radar_enabled: sp.radar_enabled,
            beeps_enabled: sp.beeps_enabled,
            focus_plid: None,
        }
    }

    pub fn model(&self) -> &SessionModel {
        &self.model
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn radar_enabled(&self) -> bool {
        self.radar_enabled
    }

    pub fn beeps_enabled(&self) -> bool {
        self.beeps_enabled
    }

    pub fn focus_plid(&self) -> Option<u8> {
        self.focus_plid
    }

    /// Swap in reloaded per-mode settings and re-apply the active mode.
    pub fn apply_config(&mut self, config: &Config) {
        self.sp = config.sp;
        self.mp = config.mp;
        let settings = self.active_settings();
        self.radar_enabled = settings.radar_enabled;
        self.beeps_enabled = settings.beeps_enabled;
    }

    /// Handle a state event: track/car context, focus and mode flags.
    pub fn on_state(&mut self, event: &StateEvent) -> StateOutcome {
        let context_changed =
            self.update_track_context(event.track.as_deref(), event.car.as_deref());
        self.focus_plid = event.view_plid;

        let new_mode = if event.flags2 & ISS_MULTI != 0 {
            Mode::Multiplayer
        } else {
            Mode::SinglePlayer
        };
        let mode_changed = new_mode != self.mode;
        if mode_changed {
            self.mode = new_mode;
            let settings = self.active_settings();
            self.radar_enabled = settings.radar_enabled;
            self.beeps_enabled = settings.beeps_enabled;
            info!(
                mode = match new_mode {
                    Mode::SinglePlayer => "single player",
                    Mode::Multiplayer => "multiplayer",
                },
                radar = self.radar_enabled,
                beeps = self.beeps_enabled,
                "session mode changed"
            );
        }

        StateOutcome {
            mode_changed,
            context_changed,
        }
    }

    /// Handle a lap boundary for the tracked driver.
    pub fn on_lap(&mut self, event: &LapEvent) -> Result<(), StoreError> {
        self.update_track_context(event.track.as_deref(), event.car.as_deref());
        if !self.adopt_or_match(event.plid, &event.player_name) {
            return Ok(());
        }

        let lap_time = event.lap_time_ms;
        let estimate = event.estimate_time_ms;

        if lap_time > 0 {
            if self.model.update_session_best(lap_time) {
                info!(lap_time_ms = lap_time, "new session best lap");
            } else {
                info!(
                    lap_time_ms = lap_time,
                    best_ms = self.model.best_lap_ms,
                    "lap completed"
                );
            }

            let fractions = self.model.split_fractions_for(lap_time);
            self.model.last_lap_split_fractions = fractions.clone();

            if let (Some(track), Some(car)) = (
                self.model.current_track.clone(),
                self.model.current_car.clone(),
            ) {
                let (record, improved) =
                    self.store
                        .record_lap(&track, &car, i64::from(lap_time), None)?;
                if improved {
                    self.model.pb_split_fractions = fractions;
                } else if record.laptime_ms == lap_time && self.model.pb_split_fractions.is_empty()
                {
                    // First boot against an already-stored equal PB: adopt
                    // the freshly measured fractions.
                    self.model.pb_split_fractions = fractions;
                }
                self.model.persistent_best = Some(record);
            } else {
                debug!("lap completed without track/car context; PB not recorded");
            }
        }

        match self.model.last_frame_time_ms {
            Some(frame_time) => {
                self.model.current_lap_start_ms = Some(frame_time);
                self.model.pending_lap_start = false;
            }
            None => {
                self.model.pending_lap_start = true;
                debug!("lap start timestamp unavailable; awaiting OutSim frame data");
            }
        }

        self.model.current_split_times.clear();
        self.model.latest_estimated_total_ms = None;
        if lap_time == 0 && estimate > 0 {
            // Forward-looking estimate hint on an out/first lap.
            self.model.latest_estimated_total_ms = Some(estimate);
        }
        Ok(())
    }

    /// Handle a split crossing for the tracked driver.
    pub fn on_split(&mut self, event: &SplitEvent) {
        self.update_track_context(event.track.as_deref(), event.car.as_deref());
        if !self.adopt_or_match(event.plid, &event.player_name) {
            return;
        }

        self.model
            .current_split_times
            .insert(event.split_index, event.split_time_ms);
        if event.estimate_time_ms > 0 {
            self.model.latest_estimated_total_ms = Some(event.estimate_time_ms);
        }
    }

    /// Handle an OutSim frame and derive the publishable lap status.
    pub fn on_frame(&mut self, frame: &OutSimFrame) -> LapStatus {
        self.model.last_frame_time_ms = Some(frame.time_ms);
        if self.model.pending_lap_start {
            self.model.current_lap_start_ms = Some(frame.time_ms);
            self.model.pending_lap_start = false;
        }

        let current_lap_ms = self
            .model
            .current_lap_start_ms
            .map(|start| frame.time_ms.saturating_sub(start));

        let personal_best = self
            .model
            .persistent_best
            .as_ref()
            .map(|record| record.laptime_ms)
            .filter(|&ms| ms > 0);

        let reference_lap = match (current_lap_ms, personal_best) {
            (Some(current), Some(pb)) => reference_lap_ms(
                current,
                pb,
                &self.model.pb_split_fractions,
                &self.model.last_lap_split_fractions,
                &self.model.current_split_times,
                self.model.latest_estimated_total_ms,
            ),
            _ => None,
        };

        let delta_ms = match (current_lap_ms, reference_lap) {
            (Some(current), Some(reference)) => Some(i64::from(current) - i64::from(reference)),
            _ => None,
        };

        let lap_progress = match (reference_lap, personal_best) {
            (Some(reference), Some(pb)) => Some(f64::from(reference) / f64::from(pb)),
            _ => match (current_lap_ms, self.model.latest_estimated_total_ms) {
                (Some(current), Some(estimate)) if estimate > 0 => {
                    Some((f64::from(current) / f64::from(estimate)).clamp(0.0, 1.0))
                }
                _ => None,
            },
        };

        LapStatus {
            current_lap_ms,
            reference_lap_ms: reference_lap,
            delta_ms,
            lap_progress,
            session_best_ms: self.model.best_lap_ms,
            personal_best_ms: personal_best,
        }
    }

    /// Handle a HUD button click. Only plain clicks toggle anything.
    pub fn on_button_click(
        &mut self,
        button: HudButton,
        event: &ButtonClickEvent,
    ) -> Option<ToggleOutcome> {
        if event.flags & BTC_CLICK_FLAG == 0 {
            return None;
        }
        match button {
            HudButton::Radar => {
                self.radar_enabled = !self.radar_enabled;
                info!(enabled = self.radar_enabled, "radar toggled from HUD");
                Some(ToggleOutcome::Radar(self.radar_enabled))
            }
            HudButton::Beeps => {
                self.beeps_enabled = !self.beeps_enabled;
                info!(enabled = self.beeps_enabled, "beeps toggled from HUD");
                Some(ToggleOutcome::Beeps(self.beeps_enabled))
            }
        }
    }

    fn active_settings(&self) -> ModeSettings {
        match self.mode {
            Mode::SinglePlayer => self.sp,
            Mode::Multiplayer => self.mp,
        }
    }

    /// Adopt the first driver seen in this context, then filter by PLID.
    fn adopt_or_match(&mut self, plid: u8, player_name: &str) -> bool {
        match self.model.tracked_plid {
            None => {
                let driver = if player_name.is_empty() {
                    format!("PLID {plid}")
                } else {
                    player_name.to_string()
                };
                info!(driver = %driver, plid, "tracking lap data");
                self.model.tracked_plid = Some(plid);
                self.model.tracked_driver = Some(driver);
                self.model.current_split_times.clear();
                self.model.latest_estimated_total_ms = None;
                true
            }
            Some(tracked) if tracked == plid => true,
            Some(tracked) => {
                debug!(plid, tracked, "ignoring event for untracked PLID");
                false
            }
        }
    }

    /// Apply a confirmed track or car change.
    ///
    /// A trimmed, non-empty value different from the current one counts as a
    /// change: the tracked driver is dropped, session timing resets and the
    /// PB for the new pair is loaded.
    fn update_track_context(&mut self, track: Option<&str>, car: Option<&str>) -> bool {
        let incoming_track = track.map(str::trim).filter(|value| !value.is_empty());
        let incoming_car = car.map(str::trim).filter(|value| !value.is_empty());

        let track_changed = incoming_track
            .is_some_and(|value| self.model.current_track.as_deref() != Some(value));
        let car_changed =
            incoming_car.is_some_and(|value| self.model.current_car.as_deref() != Some(value));
        if !track_changed && !car_changed {
            return false;
        }

        if let Some(value) = incoming_track {
            self.model.current_track = Some(value.to_string());
        }
        if let Some(value) = incoming_car {
            self.model.current_car = Some(value.to_string());
        }

        info!(
            track = self.model.current_track.as_deref().unwrap_or("?"),
            car = self.model.current_car.as_deref().unwrap_or("?"),
            "track context changed; resetting session timing"
        );
        self.model.tracked_plid = None;
        self.model.tracked_driver = None;
        self.model.clear_session_timing();
        self.model.pending_lap_start = true;
        self.model.persistent_best = None;

        if let (Some(track), Some(car)) = (
            self.model.current_track.clone(),
            self.model.current_car.clone(),
        ) {
            match self.store.load(&track, &car) {
                Ok(Some(record)) => {
                    info!(
                        track = %track,
                        car = %car,
                        pb_ms = record.laptime_ms,
                        "personal best loaded for new context"
                    );
                    self.model.persistent_best = Some(record);
                }
                Ok(None) => {
                    info!(track = %track, car = %car, "no personal best stored for new context");
                }
                Err(err) => {
                    debug!(error = %err, "failed to load personal best for new context");
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use pitwall_store::PbRecord;
    use std::collections::HashMap;
    use std::sync::Arc;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    /// In-memory store capturing calls for assertions.
    #[derive(Clone, Default)]
    struct MemoryStore {
        records: Arc<Mutex<HashMap<(String, String), PbRecord>>>,
        record_calls: Arc<Mutex<Vec<(String, String, i64)>>>,
    }

    impl MemoryStore {
        fn with_pb(track: &str, car: &str, laptime_ms: u32) -> Self {
            let store = Self::default();
            store.records.lock().insert(
                (track.to_string(), car.to_string()),
                PbRecord {
                    track: track.to_string(),
                    car: car.to_string(),
                    laptime_ms,
                    recorded_at: Utc
                        .timestamp_opt(1_700_000_000, 0)
                        .single()
                        .unwrap_or_default(),
                },
            );
            store
        }

        fn calls(&self) -> Vec<(String, String, i64)> {
            self.record_calls.lock().clone()
        }
    }

    impl BestLapStore for MemoryStore {
        fn load(&self, track: &str, car: &str) -> Result<Option<PbRecord>, StoreError> {
            Ok(self
                .records
                .lock()
                .get(&(track.to_string(), car.to_string()))
                .cloned())
        }

        fn record_lap(
            &self,
            track: &str,
            car: &str,
            laptime_ms: i64,
            _timestamp: Option<chrono::DateTime<Utc>>,
        ) -> Result<(PbRecord, bool), StoreError> {
            if laptime_ms < 0 {
                return Err(StoreError::InvalidLapTime(laptime_ms));
            }
            self.record_calls
                .lock()
                .push((track.to_string(), car.to_string(), laptime_ms));

            let key = (track.to_string(), car.to_string());
            let mut records = self.records.lock();
            let laptime = u32::try_from(laptime_ms)
                .map_err(|_| StoreError::LapTimeOutOfRange(laptime_ms))?;
            match records.get(&key) {
                Some(existing) if existing.laptime_ms <= laptime => {
                    Ok((existing.clone(), false))
                }
                _ => {
                    let record = PbRecord {
                        track: track.to_string(),
                        car: car.to_string(),
                        laptime_ms: laptime,
                        recorded_at: Utc
                            .timestamp_opt(1_700_000_000, 0)
                            .single()
                            .unwrap_or_default(),
                    };
                    records.insert(key, record.clone());
                    Ok((record, true))
                }
            }
        }

        fn delete(&self, track: &str, car: &str) -> Result<bool, StoreError> {
            Ok(self
                .records
                .lock()
                .remove(&(track.to_string(), car.to_string()))
                .is_some())
        }
    }

    fn state_event(track: &str, car: &str, flags2: u16) -> StateEvent {
        StateEvent {
            flags2,
            view_plid: None,
            track: if track.is_empty() {
                None
            } else {
                Some(track.to_string())
            },
            car: if car.is_empty() {
                None
            } else {
                Some(car.to_string())
            },
        }
    }

    fn lap_event(plid: u8, lap_time: u32, estimate: u32) -> LapEvent {
        LapEvent {
            plid,
            lap_time_ms: lap_time,
            estimate_time_ms: estimate,
            flags: 0,
            penalty: 0,
            num_pit_stops: 0,
            fuel_200: 0,
            player_name: format!("Driver {plid}"),
            track: None,
            car: None,
        }
    }

    fn split_event(plid: u8, index: u8, split_ms: u32, estimate: u32) -> SplitEvent {
        SplitEvent {
            plid,
            split_time_ms: split_ms,
            estimate_time_ms: estimate,
            flags: 0,
            split_index: index,
            player_name: format!("Driver {plid}"),
            track: None,
            car: None,
        }
    }

    fn frame(time_ms: u32) -> OutSimFrame {
        OutSimFrame {
            time_ms,
            ang_vel: [0.0; 3],
            heading: [0.0, 1.0, 0.0],
            accel: [0.0; 3],
            velocity: [0.0; 3],
            position: [0.0; 3],
        }
    }

    fn engine_with(store: MemoryStore) -> SessionEngine<MemoryStore> {
        SessionEngine::new(store, &Config::default())
    }

    #[test]
    fn track_change_mid_session_records_only_new_context() -> TestResult {
        let store = MemoryStore::default();
        let mut engine = engine_with(store.clone());

        engine.on_state(&state_event("SO1", "UF1", 0));
        engine.on_lap(&lap_event(5, 0, 0))?;
        engine.on_state(&state_event("BL2", "UF1", 0));
        engine.on_lap(&lap_event(6, 64_000, 0))?;

        assert_eq!(
            store.calls(),
            vec![("BL2".to_string(), "UF1".to_string(), 64_000)]
        );
        assert_eq!(engine.model().tracked_plid, Some(6));
        Ok(())
    }

    #[test]
    fn first_lap_event_adopts_the_driver() -> TestResult {
        let mut engine = engine_with(MemoryStore::default());
        engine.on_state(&state_event("BL1", "XFG", 0));
        engine.on_lap(&lap_event(5, 0, 0))?;

        assert_eq!(engine.model().tracked_plid, Some(5));
        assert_eq!(engine.model().tracked_driver.as_deref(), Some("Driver 5"));
        Ok(())
    }

    #[test]
    fn events_for_other_plids_are_ignored() -> TestResult {
        let store = MemoryStore::default();
        let mut engine = engine_with(store.clone());
        engine.on_state(&state_event("BL1", "XFG", 0));
        engine.on_lap(&lap_event(5, 0, 0))?;
        engine.on_lap(&lap_event(9, 70_000, 0))?;

        assert!(store.calls().is_empty());
        assert_eq!(engine.model().best_lap_ms, None);
        Ok(())
    }

    #[test]
    fn completed_lap_updates_session_best_and_store() -> TestResult {
        let store = MemoryStore::default();
        let mut engine = engine_with(store.clone());
        engine.on_state(&state_event("BL1", "XFG", 0));
        engine.on_frame(&frame(10_000));
        engine.on_lap(&lap_event(5, 73_000, 74_000))?;

        assert_eq!(engine.model().best_lap_ms, Some(73_000));
        assert_eq!(engine.model().current_lap_start_ms, Some(10_000));
        assert!(!engine.model().pending_lap_start);
        assert_eq!(
            store.calls(),
            vec![("BL1".to_string(), "XFG".to_string(), 73_000)]
        );
        Ok(())
    }

    #[test]
    fn lap_before_any_frame_sets_pending_start() -> TestResult {
        let mut engine = engine_with(MemoryStore::default());
        engine.on_state(&state_event("BL1", "XFG", 0));
        engine.on_lap(&lap_event(5, 0, 0))?;
        assert!(engine.model().pending_lap_start);

        let status = engine.on_frame(&frame(42_000));
        assert_eq!(engine.model().current_lap_start_ms, Some(42_000));
        assert_eq!(status.current_lap_ms, Some(0));
        Ok(())
    }

    #[test]
    fn improved_pb_adopts_fresh_fractions() -> TestResult {
        let mut engine = engine_with(MemoryStore::default());
        engine.on_state(&state_event("BL1", "XFG", 0));
        engine.on_frame(&frame(0));
        engine.on_lap(&lap_event(5, 0, 0))?;
        engine.on_split(&split_event(5, 1, 30_000, 91_000));
        engine.on_split(&split_event(5, 2, 60_000, 91_000));
        engine.on_lap(&lap_event(5, 90_000, 0))?;

        let fractions = &engine.model().pb_split_fractions;
        assert_eq!(fractions.len(), 2);
        assert!((fractions[0] - 1.0 / 3.0).abs() < 1e-12);
        assert!((fractions[1] - 2.0 / 3.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn equal_stored_pb_seeds_fractions_on_first_boot() -> TestResult {
        let store = MemoryStore::with_pb("BL1", "XFG", 90_000);
        let mut engine = engine_with(store);
        engine.on_state(&state_event("BL1", "XFG", 0));
        engine.on_frame(&frame(0));
        engine.on_lap(&lap_event(5, 0, 0))?;
        engine.on_split(&split_event(5, 1, 45_000, 0));
        engine.on_lap(&lap_event(5, 90_000, 0))?;

        assert_eq!(engine.model().pb_split_fractions, vec![0.5]);
        Ok(())
    }

    #[test]
    fn slower_lap_keeps_existing_pb_fractions() -> TestResult {
        let store = MemoryStore::with_pb("BL1", "XFG", 80_000);
        let mut engine = engine_with(store);
        engine.on_state(&state_event("BL1", "XFG", 0));
        engine.on_frame(&frame(0));
        engine.on_lap(&lap_event(5, 0, 0))?;
        engine.on_split(&split_event(5, 1, 45_000, 0));
        engine.on_lap(&lap_event(5, 90_000, 0))?;

        // PB 80s stands; the slower lap must not seed its fractions.
        assert!(engine.model().pb_split_fractions.is_empty());
        assert_eq!(
            engine.model().persistent_best.as_ref().map(|r| r.laptime_ms),
            Some(80_000)
        );
        Ok(())
    }

    #[test]
    fn out_lap_estimate_survives_the_reset() -> TestResult {
        let mut engine = engine_with(MemoryStore::default());
        engine.on_state(&state_event("BL1", "XFG", 0));
        engine.on_frame(&frame(0));
        engine.on_lap(&lap_event(5, 0, 88_000))?;
        assert_eq!(engine.model().latest_estimated_total_ms, Some(88_000));

        engine.on_lap(&lap_event(5, 91_000, 88_500))?;
        // A completed lap resets the estimate; the hint only applies to the
        // zero-time boundary.
        assert_eq!(engine.model().latest_estimated_total_ms, None);
        Ok(())
    }

    #[test]
    fn splits_accumulate_and_update_estimate() -> TestResult {
        let mut engine = engine_with(MemoryStore::default());
        engine.on_state(&state_event("BL1", "XFG", 0));
        engine.on_split(&split_event(5, 1, 30_000, 92_000));
        engine.on_split(&split_event(5, 2, 61_000, 93_000));

        assert_eq!(engine.model().current_split_times.get(&1), Some(&30_000));
        assert_eq!(engine.model().current_split_times.get(&2), Some(&61_000));
        assert_eq!(engine.model().latest_estimated_total_ms, Some(93_000));
        Ok(())
    }

    #[test]
    fn frame_delta_is_negative_when_ahead_of_pb() -> TestResult {
        let store = MemoryStore::with_pb("BL1", "XFG", 90_000);
        let mut engine = engine_with(store);
        engine.on_state(&state_event("BL1", "XFG", 0));
        engine.on_frame(&frame(1_000));
        engine.on_lap(&lap_event(5, 0, 85_000))?;

        let status = engine.on_frame(&frame(7_000));
        assert_eq!(status.current_lap_ms, Some(6_000));
        assert_eq!(status.reference_lap_ms, Some(6_353));
        assert_eq!(status.delta_ms, Some(-353));
        Ok(())
    }

    #[test]
    fn frame_delta_is_positive_when_behind_pb() -> TestResult {
        let store = MemoryStore::with_pb("BL1", "XFG", 90_000);
        let mut engine = engine_with(store);
        engine.on_state(&state_event("BL1", "XFG", 0));
        engine.on_frame(&frame(1_000));
        engine.on_lap(&lap_event(5, 0, 95_000))?;

        let status = engine.on_frame(&frame(7_000));
        assert_eq!(status.reference_lap_ms, Some(5_684));
        assert_eq!(status.delta_ms, Some(316));
        Ok(())
    }

    #[test]
    fn no_lap_start_means_no_displayed_lap() {
        let mut engine = engine_with(MemoryStore::default());
        let status = engine.on_frame(&frame(50_000));
        assert_eq!(status.current_lap_ms, None);
        assert_eq!(status.delta_ms, None);
        assert_eq!(status.lap_progress, None);
    }

    #[test]
    fn progress_falls_back_to_estimate_without_pb() -> TestResult {
        let mut engine = engine_with(MemoryStore::default());
        engine.on_state(&state_event("BL1", "XFG", 0));
        engine.on_frame(&frame(0));
        engine.on_lap(&lap_event(5, 0, 80_000))?;

        let status = engine.on_frame(&frame(20_000));
        let progress = status.lap_progress.ok_or("expected progress")?;
        assert!((progress - 0.25).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn mode_switch_applies_mode_settings() {
        let mut config = Config::default();
        config.mp.radar_enabled = false;
        config.mp.beeps_enabled = false;
        let mut engine = SessionEngine::new(MemoryStore::default(), &config);

        assert!(engine.radar_enabled());
        let outcome = engine.on_state(&state_event("BL1", "XFG", ISS_MULTI));
        assert!(outcome.mode_changed);
        assert_eq!(engine.mode(), Mode::Multiplayer);
        assert!(!engine.radar_enabled());
        assert!(!engine.beeps_enabled());
    }

    #[test]
    fn unchanged_mode_is_not_a_mode_change() {
        let mut engine = engine_with(MemoryStore::default());
        let outcome = engine.on_state(&state_event("BL1", "XFG", 0));
        assert!(!outcome.mode_changed);
        assert!(outcome.context_changed);
    }

    #[test]
    fn context_change_loads_stored_pb() {
        let store = MemoryStore::with_pb("AS3", "FZ5", 123_000);
        let mut engine = engine_with(store);
        engine.on_state(&state_event("AS3", "FZ5", 0));
        assert_eq!(
            engine.model().persistent_best.as_ref().map(|r| r.laptime_ms),
            Some(123_000)
        );
    }

    #[test]
    fn button_click_without_click_flag_is_ignored() {
        let mut engine = engine_with(MemoryStore::default());
        let event = ButtonClickEvent {
            click_id: 200,
            flags: 0,
        };
        assert_eq!(engine.on_button_click(HudButton::Radar, &event), None);
        assert!(engine.radar_enabled());
    }

    #[test]
    fn button_click_toggles_radar_and_beeps() {
        let mut engine = engine_with(MemoryStore::default());
        let event = ButtonClickEvent {
            click_id: 200,
            flags: BTC_CLICK_FLAG,
        };

        assert_eq!(
            engine.on_button_click(HudButton::Radar, &event),
            Some(ToggleOutcome::Radar(false))
        );
        assert_eq!(
            engine.on_button_click(HudButton::Beeps, &event),
            Some(ToggleOutcome::Beeps(false))
        );
        assert_eq!(
            engine.on_button_click(HudButton::Beeps, &event),
            Some(ToggleOutcome::Beeps(true))
        );
    }

    #[test]
    fn reload_reapplies_active_mode_settings() {
        let mut engine = engine_with(MemoryStore::default());
        let mut config = Config::default();
        config.sp.radar_enabled = false;
        engine.apply_config(&config);
        assert!(!engine.radar_enabled());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn completed_lap_fractions_are_monotone_open_interval(
                splits in proptest::collection::btree_map(1u8..6, 1u32..200_000, 0..5),
                lap_time in 1u32..200_000,
            ) {
                let mut engine = engine_with(MemoryStore::default());
                engine.on_state(&state_event("BL1", "XFG", 0));
                engine.on_frame(&frame(0));
                engine.on_lap(&lap_event(5, 0, 0)).map_err(|e| {
                    TestCaseError::fail(format!("{e}"))
                })?;
                for (&index, &split_ms) in &splits {
                    engine.on_split(&split_event(5, index, split_ms, 0));
                }
                engine.on_lap(&lap_event(5, lap_time, 0)).map_err(|e| {
                    TestCaseError::fail(format!("{e}"))
                })?;

                let fractions = &engine.model().last_lap_split_fractions;
                let mut last = 0.0;
                for &fraction in fractions {
                    prop_assert!(fraction > last);
                    prop_assert!(fraction > 0.0 && fraction < 1.0);
                    last = fraction;
                }
            }
        }
    }
}

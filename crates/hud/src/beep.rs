//! Beep driver selection and the spotter beep subsystem.
//!
//! Audio output itself is a collaborator behind [`BeepDriver`]; the only
//! backend compiled in is the silent logging driver, with sine-wave sample
//! synthesis kept as a pure leaf for backends to feed their buffers from.
//! Driver call failures never propagate: a broken audio stack must not
//! disturb telemetry.

use pitwall_config::{BeepMode, BeepSettings};
use pitwall_outsim::OutSimFrame;
use tracing::{debug, info};

const SAMPLE_RATE: u32 = 44_100;
const MAX_BEEP_SECONDS: f64 = 2.0;

/// Minimal interface implemented by beep audio backends.
pub trait BeepDriver: Send {
    /// Update playback volume in `[0.0, 1.0]`.
    fn set_volume(&mut self, volume: f64);

    /// Enable or disable playback.
    fn set_enabled(&mut self, enabled: bool);

    /// Play a tone with the requested frequency and duration.
    fn play_beep(&mut self, frequency_hz: f64, duration_ms: u32);
}

/// Fallback driver that only logs requested beeps.
#[derive(Debug, Default)]
pub struct SilentBeepDriver {
    enabled: bool,
    volume: f64,
}

impl BeepDriver for SilentBeepDriver {
    fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn play_beep(&mut self, frequency_hz: f64, duration_ms: u32) {
        if !self.enabled {
            return;
        }
        debug!(
            frequency_hz,
            duration_ms,
            volume = self.volume,
            "silent beep"
        );
    }
}

/// Return the first usable beep driver implementation.
///
/// No synthesized backend is linked in this build, so selection always
/// falls through to the silent logger.
pub fn select_beep_driver() -> Box<dyn BeepDriver> {
    info!("using silent beep driver");
    Box::new(SilentBeepDriver::default())
}

/// Synthesize 16-bit mono sine samples for a tone.
///
/// Duration is capped at two seconds; zero frequency, duration or volume
/// produce no samples.
pub fn synthesize_sine(frequency_hz: f64, duration_ms: u32, volume: f64) -> Vec<i16> {
    if frequency_hz <= 0.0 || duration_ms == 0 || volume <= 0.0 {
        return Vec::new();
    }
    let duration_seconds = (f64::from(duration_ms) / 1000.0).min(MAX_BEEP_SECONDS);
    let sample_count = ((duration_seconds * f64::from(SAMPLE_RATE)).round() as usize).max(1);
    let amplitude = (32_767.0 * volume.clamp(0.0, 1.0)).round();
    let angular_step = 2.0 * std::f64::consts::PI * frequency_hz / f64::from(SAMPLE_RATE);

    (0..sample_count)
        .map(|index| (amplitude * (angular_step * index as f64).sin()).round() as i16)
        .collect()
}

/// Spotter beep subsystem applying the configured profile to the driver.
pub struct BeepSubsystem {
    driver: Box<dyn BeepDriver>,
    settings: BeepSettings,
    enabled: bool,
}

impl BeepSubsystem {
    pub fn new(driver: Box<dyn BeepDriver>, settings: BeepSettings) -> Self {
        let mut subsystem = Self {
            driver,
            settings: settings.clone(),
            enabled: false,
        };
        subsystem.driver.set_volume(settings.volume);
        subsystem
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn mode(&self) -> BeepMode {
        self.settings.mode
    }

    /// Apply reloaded settings (mode, volume, frequency, intervals).
    pub fn apply_settings(&mut self, settings: BeepSettings) {
        if settings.mode != self.settings.mode {
            info!(mode = ?settings.mode, "updating beep mode");
        }
        self.driver.set_volume(settings.volume);
        self.settings = settings;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        self.driver.set_enabled(enabled);
        info!(
            enabled,
            mode = ?self.settings.mode,
            "beep subsystem toggled"
        );
    }

    /// Per-frame hook; cheap no-op while disabled.
    pub fn process_frame(&mut self, frame: &OutSimFrame) {
        if !self.enabled {
            return;
        }
        debug!(time_ms = frame.time_ms, "processing OutSim frame for beep subsystem");
    }

    /// Play the configured tone through the driver.
    pub fn beep_once(&mut self) {
        if !self.enabled {
            return;
        }
        let duration = self.settings.intervals_ms.first().copied().unwrap_or(250);
        self.driver
            .play_beep(self.settings.base_frequency_hz, duration.min(2_000));
    }
}

//! HUD toggle buttons drawn through the InSim write path.
//!
//! Exactly two buttons exist, with stable click ids and fixed screen
//! coordinates. Drawing is best-effort: a disconnected sink skips silently
//! and send failures are logged, never propagated, so a flaky connection
//! cannot take the session engine down with it.

use pitwall_insim::{ButtonSpec, ISB_CLICK, PacketSink, build_bfn, build_btn};
use tracing::{debug, warn};

pub mod beep;

pub use beep::{BeepDriver, BeepSubsystem, SilentBeepDriver, select_beep_driver, synthesize_sine};

/// Click id of the radar toggle button.
pub const RADAR_BUTTON_ID: u8 = 200;
/// Click id of the beeps toggle button.
pub const BEEPS_BUTTON_ID: u8 = 201;

/// Longest radar summary rendered into the caption, in Latin-1 bytes.
const MAX_SUMMARY_LEN: usize = 200;

const BUTTON_TOP: u8 = 150;
const BUTTON_WIDTH: u8 = 35;
const BUTTON_HEIGHT: u8 = 6;
const RADAR_BUTTON_LEFT: u8 = 5;
const BEEPS_BUTTON_LEFT: u8 = 45;

/// Controller for the radar/beeps toggle buttons.
pub struct HudController<S: PacketSink> {
    sink: S,
    visible: bool,
    radar_enabled: bool,
    beeps_enabled: bool,
    radar_summary: Option<String>,
}

impl<S: PacketSink> HudController<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            visible: false,
            radar_enabled: false,
            beeps_enabled: false,
            radar_summary: None,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Display both buttons with the supplied states.
    pub fn show(&mut self, radar_enabled: bool, beeps_enabled: bool, radar_summary: Option<&str>) {
        self.radar_enabled = radar_enabled;
        self.beeps_enabled = beeps_enabled;
        self.radar_summary = radar_summary.map(ToString::to_string);
        self.visible = true;
        self.draw();
    }

    /// Refresh captions to the latest states; shows the buttons if hidden.
    pub fn update(&mut self, radar_enabled: bool, beeps_enabled: bool, radar_summary: Option<&str>) {
        self.show(radar_enabled, beeps_enabled, radar_summary);
    }

    /// Delete both buttons. Teardown failures are logged and swallowed.
    pub fn remove(&mut self) {
        if !self.visible {
            return;
        }
        self.visible = false;
        for click_id in [RADAR_BUTTON_ID, BEEPS_BUTTON_ID] {
            if let Err(err) = self.sink.send(&build_bfn(click_id)) {
                warn!(click_id, error = %err, "failed to delete HUD button");
            }
        }
    }

    fn draw(&mut self) {
        if !self.sink.is_connected() {
            debug!("skipping HUD draw: InSim connection not active");
            return;
        }

        let radar_caption = self.radar_caption();
        let beeps_caption = format!("Beeps: {}", on_off(self.beeps_enabled));

        let radar_spec = button_spec(RADAR_BUTTON_ID, RADAR_BUTTON_LEFT);
        let beeps_spec = button_spec(BEEPS_BUTTON_ID, BEEPS_BUTTON_LEFT);
        for (spec, caption) in [(radar_spec, radar_caption), (beeps_spec, beeps_caption)] {
            if let Err(err) = self.sink.send(&build_btn(&spec, &caption)) {
                warn!(click_id = spec.click_id, error = %err, "failed to draw HUD button");
            }
        }
    }

    fn radar_caption(&self) -> String {
        match (&self.radar_summary, self.radar_enabled) {
            (Some(summary), true) => {
                let truncated: String = summary.chars().take(MAX_SUMMARY_LEN).collect();
                format!("Radar: {truncated}")
            }
            _ => format!("Radar: {}", on_off(self.radar_enabled)),
        }
    }
}

fn button_spec(click_id: u8, left: u8) -> ButtonSpec {
    ButtonSpec {
        click_id,
        inst: 0,
        style: ISB_CLICK,
        type_in: 0,
        left,
        top: BUTTON_TOP,
        width: BUTTON_WIDTH,
        height: BUTTON_HEIGHT,
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "ON" } else { "OFF" }
}

//! Subsystem wiring and the main frame loop.
//!
//! The orchestrator owns every subsystem. The loop blocks on OutSim (with
//! the configured receive timeout), polls InSim non-blockingly each
//! iteration, dispatches decoded events, then runs the per-frame work:
//! session timing, radar, beeps, the WebSocket shadow state and the status
//! line. Listener failures are logged per listener so one bad consumer
//! cannot poison the rest; only configuration and transport failures
//! propagate.

use crate::radar::{LoggingRadarRenderer, RadarRenderer};
use crate::status::StatusLine;
use anyhow::{Context, Result};
use parking_lot::{Mutex, ReentrantMutex};
use pitwall_config::{Config, ConfigWatcher};
use pitwall_hud::{
    BEEPS_BUTTON_ID, BeepSubsystem, HudController, RADAR_BUTTON_ID, select_beep_driver,
};
use pitwall_insim::{InSimClient, InSimEvent, InSimWriter};
use pitwall_outsim::OutSimClient;
use pitwall_session::{HudButton, LapStatus, SessionEngine, ToggleOutcome};
use pitwall_store::PersonalBestStore;
use pitwall_telemetry_ws::{PlayerLapUpdate, TelemetryBroadcaster};
use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Receive cadence applied when the configuration leaves OutSim blocking,
/// so the loop still notices the interrupt flag.
const FALLBACK_UPDATE_HZ: f64 = 2.0;

struct ConfigState {
    active: Config,
    pending: Option<Config>,
}

type SharedConfig = Arc<ReentrantMutex<RefCell<ConfigState>>>;
type WsHandle = Arc<Mutex<Option<TelemetryBroadcaster>>>;

/// Run the companion until interrupted or a transport failure.
pub fn run(config: Config, config_path: PathBuf, stop: Arc<AtomicBool>) -> Result<()> {
    let store = PersonalBestStore::default();
    let mut engine = SessionEngine::new(store, &config);

    let mut outsim_settings = config.outsim.clone();
    if outsim_settings.update_hz.is_none() {
        outsim_settings.update_hz = Some(FALLBACK_UPDATE_HZ);
    }
    let mut outsim = OutSimClient::bind(&outsim_settings).context("failed to start OutSim")?;

    let mut insim = InSimClient::connect(&config.insim).context("failed to connect InSim")?;
    let mut hud: HudController<InSimWriter> = HudController::new(insim.writer());

    let mut beeps = BeepSubsystem::new(select_beep_driver(), config.beep.clone());
    beeps.set_enabled(engine.beeps_enabled());
    let mut radar = LoggingRadarRenderer;

    let ws_handle: WsHandle = Arc::new(Mutex::new(None));
    if config.telemetry_ws.enabled {
        let broadcaster = TelemetryBroadcaster::new(&config.telemetry_ws)
            .context("invalid telemetry feed configuration")?;
        broadcaster.start();
        *ws_handle.lock() = Some(broadcaster);
    }

    let shared: SharedConfig = Arc::new(ReentrantMutex::new(RefCell::new(ConfigState {
        active: config,
        pending: None,
    })));
    let watcher = spawn_watcher(config_path, Arc::clone(&shared), Arc::clone(&ws_handle));

    hud.show(engine.radar_enabled(), engine.beeps_enabled(), None);
    info!("telemetry clients initialised; awaiting OutSim frames");

    let mut status_line = StatusLine::new();
    let result = frame_loop(
        &stop,
        &shared,
        &ws_handle,
        &mut engine,
        &mut outsim,
        &mut insim,
        &mut hud,
        &mut beeps,
        &mut radar,
        &mut status_line,
    );

    status_line.finish();
    hud.remove();
    insim.close();
    if let Some(broadcaster) = ws_handle.lock().take() {
        broadcaster.stop();
    }
    watcher.stop();
    info!("shutdown complete");
    result
}

#[allow(clippy::too_many_arguments)]
fn frame_loop(
    stop: &AtomicBool,
    shared: &SharedConfig,
    ws_handle: &WsHandle,
    engine: &mut SessionEngine<PersonalBestStore>,
    outsim: &mut OutSimClient,
    insim: &mut InSimClient,
    hud: &mut HudController<InSimWriter>,
    beeps: &mut BeepSubsystem,
    radar: &mut LoggingRadarRenderer,
    status_line: &mut StatusLine,
) -> Result<()> {
    while !stop.load(Ordering::SeqCst) {
        apply_pending_config(shared, engine, beeps, hud);

        let frame = outsim.next_frame().context("OutSim transport failed")?;

        let events = insim.poll().context("InSim transport failed")?;
        for event in events {
            dispatch(event, engine, hud, beeps, ws_handle);
        }

        let Some(frame) = frame else {
            continue;
        };

        let status = engine.on_frame(&frame);
        if engine.radar_enabled() {
            radar.draw(&frame);
        }
        beeps.process_frame(&frame);

        if let Some(ws) = ws_handle.lock().as_ref() {
            ws.update_outsim(&frame);
            ws.update_player_lap(lap_update(&status));
        }
        status_line.render(&status);
    }
    info!("interrupted by user, shutting down");
    Ok(())
}

/// Deliver one decoded event to every interested subsystem.
///
/// Each consumer is isolated: a failing store or HUD write is logged and
/// the remaining consumers still run.
fn dispatch(
    event: InSimEvent,
    engine: &mut SessionEngine<PersonalBestStore>,
    hud: &mut HudController<InSimWriter>,
    beeps: &mut BeepSubsystem,
    ws_handle: &WsHandle,
) {
    match event {
        InSimEvent::State(state) => {
            let outcome = engine.on_state(&state);
            if let Some(ws) = ws_handle.lock().as_ref() {
                ws.set_focus_plid(engine.focus_plid());
                ws.update_track_context(
                    engine.model().current_track.as_deref(),
                    engine.model().current_car.as_deref(),
                );
            }
            if outcome.mode_changed {
                beeps.set_enabled(engine.beeps_enabled());
                hud.update(engine.radar_enabled(), engine.beeps_enabled(), None);
            }
        }
        InSimEvent::Lap(lap) => {
            if let Err(err) = engine.on_lap(&lap) {
                warn!(error = %err, "lap handler failed; continuing");
            }
        }
        InSimEvent::Split(split) => engine.on_split(&split),
        InSimEvent::ButtonClick(click) => {
            let button = match click.click_id {
                RADAR_BUTTON_ID => Some(HudButton::Radar),
                BEEPS_BUTTON_ID => Some(HudButton::Beeps),
                _ => None,
            };
            let Some(button) = button else {
                debug!(click_id = click.click_id, "ignoring unknown button click");
                return;
            };
            if let Some(ToggleOutcome::Beeps(enabled)) = engine.on_button_click(button, &click) {
                beeps.set_enabled(enabled);
            }
            hud.update(engine.radar_enabled(), engine.beeps_enabled(), None);
        }
        InSimEvent::MultiCar(mci) => {
            if let Some(ws) = ws_handle.lock().as_ref() {
                ws.update_mci(&mci);
            }
        }
    }
}

/// Pick up a configuration swapped in by the watcher thread.
fn apply_pending_config(
    shared: &SharedConfig,
    engine: &mut SessionEngine<PersonalBestStore>,
    beeps: &mut BeepSubsystem,
    hud: &mut HudController<InSimWriter>,
) {
    let pending = {
        let guard = shared.lock();
        let taken = guard.borrow_mut().pending.take();
        taken
    };
    let Some(config) = pending else {
        return;
    };

    engine.apply_config(&config);
    beeps.apply_settings(config.beep.clone());
    beeps.set_enabled(engine.beeps_enabled());
    hud.update(engine.radar_enabled(), engine.beeps_enabled(), None);
    info!(
        radar = engine.radar_enabled(),
        beeps = engine.beeps_enabled(),
        "reloaded configuration applied"
    );
}

/// Watch the config file; on a clean reload swap the active config and
/// restart the broadcaster if its section changed.
fn spawn_watcher(config_path: PathBuf, shared: SharedConfig, ws_handle: WsHandle) -> ConfigWatcher {
    ConfigWatcher::spawn(config_path, move |new_config| {
        let guard = shared.lock();
        let ws_changed = {
            let mut state = guard.borrow_mut();
            let changed = state.active.telemetry_ws != new_config.telemetry_ws;
            state.active = new_config.clone();
            state.pending = Some(new_config.clone());
            changed
        };

        if ws_changed {
            let mut slot = ws_handle.lock();
            if let Some(old) = slot.take() {
                old.stop();
            }
            if new_config.telemetry_ws.enabled {
                match TelemetryBroadcaster::new(&new_config.telemetry_ws) {
                    Ok(broadcaster) => {
                        broadcaster.start();
                        *slot = Some(broadcaster);
                    }
                    Err(err) => {
                        warn!(error = %err, "reloaded telemetry feed configuration rejected");
                    }
                }
            }
        }
    })
}

fn lap_update(status: &LapStatus) -> PlayerLapUpdate {
    PlayerLapUpdate {
        progress: status.lap_progress,
        current_lap_ms: status.current_lap_ms,
        reference_lap_ms: status.reference_lap_ms,
        delta_ms: status.delta_ms,
    }
}

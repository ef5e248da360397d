//! The broadcast loop and its thread-safe facade.
//!
//! `TelemetryBroadcaster` owns a shadow copy of the latest telemetry behind
//! a mutex. A dedicated OS thread runs a single-threaded tokio runtime with
//! two cooperative jobs: accepting/handshaking/draining clients, and the
//! periodic broadcast tick. `stop()` may be called from any thread; it nudges
//! the loop, which cancels the broadcast work, closes the listener and every
//! client, and exits. The join is bounded by five seconds.

use crate::protocol::{encode_text_frame, find_header_end, handshake_response, parse_headers};
use crate::snapshot::{PlayerLapUpdate, Shared, build_snapshot};
use crate::WsError;
use parking_lot::Mutex;
use pitwall_config::TelemetryWsSettings;
use pitwall_insim::MultiCarInfoEvent;
use pitwall_outsim::OutSimFrame;
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::LocalSet;
use tracing::{debug, info, warn};

/// Broadcast cadence is capped at 60 Hz regardless of configuration.
const MAX_UPDATE_HZ: f64 = 60.0;
/// Upper bound on a handshake request before the client is dropped.
const MAX_HANDSHAKE_BYTES: usize = 8_192;
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

type Clients = Rc<RefCell<HashMap<u64, OwnedWriteHalf>>>;

struct LoopHandle {
    shutdown: Arc<Notify>,
    done_rx: mpsc::Receiver<()>,
    thread: JoinHandle<()>,
}

/// Thread-safe facade over the broadcast loop.
pub struct TelemetryBroadcaster {
    host: String,
    port: u16,
    interval: Duration,
    shared: Arc<Mutex<Shared>>,
    bound_addr: Arc<Mutex<Option<SocketAddr>>>,
    handle: Mutex<Option<LoopHandle>>,
}

impl TelemetryBroadcaster {
    pub fn new(settings: &TelemetryWsSettings) -> Result<Self, WsError> {
        if settings.update_hz <= 0.0 {
            return Err(WsError::Config(format!(
                "update_hz must be positive, got {}",
                settings.update_hz
            )));
        }
        let capped_hz = settings.update_hz.min(MAX_UPDATE_HZ);
        Ok(Self {
            host: settings.host.clone(),
            port: settings.port,
            interval: Duration::from_secs_f64(1.0 / capped_hz),
            shared: Arc::new(Mutex::new(Shared::default())),
            bound_addr: Arc::new(Mutex::new(None)),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the loop thread; repeated calls while running are no-ops.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        let host = self.host.clone();
        let port = self.port;
        let interval = self.interval;
        let shared = Arc::clone(&self.shared);
        let bound_addr = Arc::clone(&self.bound_addr);
        let shutdown = Arc::new(Notify::new());
        let loop_shutdown = Arc::clone(&shutdown);
        let (done_tx, done_rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("telemetry-ws".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => {
                        let local = LocalSet::new();
                        local.block_on(&runtime, run_loop(
                            host,
                            port,
                            interval,
                            shared,
                            bound_addr,
                            loop_shutdown,
                        ));
                    }
                    Err(err) => warn!(error = %err, "failed to build telemetry runtime"),
                }
                let _ = done_tx.send(());
            });

        match thread {
            Ok(thread) => {
                *handle = Some(LoopHandle {
                    shutdown,
                    done_rx,
                    thread,
                });
            }
            Err(err) => warn!(error = %err, "failed to spawn telemetry thread"),
        }
    }

    /// Signal the loop to shut down and join it, waiting at most five
    /// seconds.
    pub fn stop(&self) {
        let Some(LoopHandle {
            shutdown,
            done_rx,
            thread,
        }) = self.handle.lock().take()
        else {
            return;
        };

        shutdown.notify_one();
        match done_rx.recv_timeout(STOP_JOIN_TIMEOUT) {
            Ok(()) => {
                if thread.join().is_err() {
                    warn!("telemetry thread panicked during shutdown");
                }
            }
            Err(_) => {
                warn!("telemetry thread did not stop within the timeout; detaching");
            }
        }
        *self.bound_addr.lock() = None;
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Address actually bound by the loop (`None` until the listener is up).
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock()
    }

    pub fn update_outsim(&self, frame: &OutSimFrame) {
        self.shared.lock().latest_frame = Some(*frame);
    }

    pub fn update_mci(&self, event: &MultiCarInfoEvent) {
        let mut shared = self.shared.lock();
        shared.latest_cars = event.cars.clone();
        if let Some(plid) = event.view_plid {
            shared.focus_plid = Some(plid);
        }
    }

    pub fn set_focus_plid(&self, plid: Option<u8>) {
        self.shared.lock().focus_plid = plid;
    }

    pub fn update_track_context(&self, track: Option<&str>, car: Option<&str>) {
        let mut shared = self.shared.lock();
        shared.track = track.map(ToString::to_string);
        shared.car = car.map(ToString::to_string);
    }

    pub fn update_player_lap(&self, lap: PlayerLapUpdate) {
        self.shared.lock().lap = lap;
    }
}

impl Drop for TelemetryBroadcaster {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(
    host: String,
    port: u16,
    interval: Duration,
    shared: Arc<Mutex<Shared>>,
    bound_addr: Arc<Mutex<Option<SocketAddr>>>,
    shutdown: Arc<Notify>,
) {
    let listener = match TcpListener::bind((host.as_str(), port)).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!(host = %host, port, error = %err, "failed to bind telemetry WebSocket server");
            return;
        }
    };
    if let Ok(addr) = listener.local_addr() {
        *bound_addr.lock() = Some(addr);
        info!(addr = %addr, "telemetry WebSocket listening");
    }

    let clients: Clients = Rc::new(RefCell::new(HashMap::new()));
    let mut next_client_id: u64 = 0;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "telemetry client connecting");
                        let id = next_client_id;
                        next_client_id += 1;
                        let clients = Rc::clone(&clients);
                        tokio::task::spawn_local(handle_client(stream, id, clients));
                    }
                    Err(err) => warn!(error = %err, "telemetry accept failed"),
                }
            }
            _ = ticker.tick() => {
                broadcast_tick(&shared, &clients).await;
            }
        }
    }

    // Teardown: dropping write halves closes every client connection.
    clients.borrow_mut().clear();
    info!("telemetry WebSocket stopped");
}

async fn broadcast_tick(shared: &Arc<Mutex<Shared>>, clients: &Clients) {
    let snapshot = {
        let guard = shared.lock();
        build_snapshot(&guard, unix_timestamp())
    };
    let Some(snapshot) = snapshot else {
        return;
    };
    let payload = match serde_json::to_vec(&snapshot) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialise telemetry snapshot");
            return;
        }
    };
    let frame = encode_text_frame(&payload);

    let ids: Vec<u64> = clients.borrow().keys().copied().collect();
    let mut stale = Vec::new();
    for id in ids {
        let Some(mut writer) = clients.borrow_mut().remove(&id) else {
            continue;
        };
        match writer.write_all(&frame).await {
            Ok(()) => {
                clients.borrow_mut().insert(id, writer);
            }
            Err(err) => {
                debug!(client = id, error = %err, "evicting telemetry client");
                stale.push(id);
            }
        }
    }
    if !stale.is_empty() {
        info!(evicted = stale.len(), active = clients.borrow().len(), "evicted dead telemetry clients");
    }
}

async fn handle_client(mut stream: TcpStream, id: u64, clients: Clients) {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1_024];
    let header_end = loop {
        match stream.read(&mut chunk).await {
            Ok(0) => {
                debug!(client = id, "client closed before finishing the handshake");
                return;
            }
            Ok(n) => {
                request.extend_from_slice(&chunk[..n]);
                if let Some(end) = find_header_end(&request) {
                    break end;
                }
                if request.len() > MAX_HANDSHAKE_BYTES {
                    debug!(client = id, "oversized handshake request; dropping client");
                    return;
                }
            }
            Err(err) => {
                debug!(client = id, error = %err, "handshake read failed");
                return;
            }
        }
    };

    let headers = parse_headers(&request[..header_end]);
    let Some(key) = headers.get("sec-websocket-key") else {
        debug!(client = id, "handshake missing Sec-WebSocket-Key; closing");
        return;
    };

    if let Err(err) = stream
        .write_all(handshake_response(key).as_bytes())
        .await
    {
        debug!(client = id, error = %err, "failed to send handshake response");
        return;
    }

    let (mut read_half, write_half) = stream.into_split();
    let active = {
        let mut registry = clients.borrow_mut();
        registry.insert(id, write_half);
        registry.len()
    };
    info!(active, "telemetry WebSocket client connected");

    // Incoming frames are drained and discarded until EOF.
    let mut drain = [0u8; 1_024];
    loop {
        match read_half.read(&mut drain).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    let active = {
        let mut registry = clients.borrow_mut();
        registry.remove(&id);
        registry.len()
    };
    info!(active, "telemetry WebSocket client disconnected");
}

fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

//! Modification-time polling for configuration hot reload.
//!
//! A background thread compares the config file's mtime (nanosecond
//! granularity) once per poll interval. When the file changes and re-parses
//! cleanly the new [`Config`] is handed to the reload callback; parse or
//! validation failures keep the previous configuration. A missing file is
//! tolerated with a warning so the watcher survives editors that replace the
//! file non-atomically.

use crate::Config;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Default poll interval between mtime checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to the running watcher thread.
pub struct ConfigWatcher {
    stop_tx: SyncSender<()>,
    thread: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Spawn a watcher over `path`, invoking `on_reload` for every
    /// successfully re-parsed configuration.
    pub fn spawn<F>(path: PathBuf, on_reload: F) -> Self
    where
        F: Fn(Config) + Send + 'static,
    {
        Self::spawn_with_interval(path, DEFAULT_POLL_INTERVAL, on_reload)
    }

    /// Spawn with an explicit poll interval (tests use a short one).
    pub fn spawn_with_interval<F>(path: PathBuf, interval: Duration, on_reload: F) -> Self
    where
        F: Fn(Config) + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::sync_channel::<()>(1);
        let thread = thread::Builder::new()
            .name("config-watcher".to_string())
            .spawn(move || {
                let mut last_mtime = match mtime_ns(&path) {
                    Some(mtime) => Some(mtime),
                    None => {
                        warn!(path = %path.display(), "configuration file not found; waiting for it to appear");
                        None
                    }
                };

                loop {
                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }

                    let Some(current_mtime) = mtime_ns(&path) else {
                        if last_mtime.is_some() {
                            warn!(path = %path.display(), "configuration file missing; retaining previous settings");
                            last_mtime = None;
                        }
                        continue;
                    };

                    if last_mtime == Some(current_mtime) {
                        continue;
                    }
                    last_mtime = Some(current_mtime);

                    match Config::load(&path) {
                        Ok(config) => {
                            info!(path = %path.display(), "configuration file changed; applying reload");
                            on_reload(config);
                        }
                        Err(err) => {
                            warn!(path = %path.display(), error = %err, "failed to reload configuration; keeping previous settings");
                        }
                    }
                }
                debug!("config watcher stopped");
            })
            .unwrap_or_else(|err| {
                // Thread spawn failure leaves hot reload unavailable but the
                // process functional.
                warn!(error = %err, "failed to spawn config watcher thread");
                thread::spawn(|| {})
            });

        Self {
            stop_tx,
            thread: Some(thread),
        }
    }

    /// Stop the watcher and join its thread.
    pub fn stop(mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("config watcher thread panicked during shutdown");
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn mtime_ns(path: &std::path::Path) -> Option<u128> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_nanos())
        .or_else(|| {
            // Clock set before the epoch; fall back to a stable sentinel so
            // change detection still works via inequality.
            SystemTime::UNIX_EPOCH
                .duration_since(modified)
                .ok()
                .map(|d| u128::MAX - d.as_nanos())
        })
}

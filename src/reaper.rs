//! Idle-session reaper.
//!
//! A background task that periodically sweeps the session table and destroys
//! sessions whose idle time exceeds the configured threshold, releasing
//! their storage objects and working directories. Any request on a session
//! refreshes its activity clock and postpones the sweep for it.
//!
//! Sweeps never overlap: one task owns the interval and each sweep runs to
//! completion before the next tick fires.

use crate::error::ServiceError;
use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to the running reaper task.
pub struct Reaper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Reaper {
    /// Spawn the reaper on the current runtime, sweeping at the configured
    /// interval.
    pub fn spawn(manager: Arc<SessionManager>) -> Self {
        let interval = Duration::from_secs(manager.config().session.sweep_interval_secs.max(1));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh start
            // does not sweep before anything can be idle
            ticker.tick().await;
            tracing::info!(interval_secs = interval.as_secs(), "reaper_started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep(&manager).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("reaper_stopped");
        });

        Reaper { shutdown, handle }
    }

    /// Stop the reaper and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// One sweep pass using the configured idle threshold. Returns the number of
/// sessions destroyed. A zero threshold disables reaping entirely.
pub async fn sweep(manager: &SessionManager) -> usize {
    match manager.idle_timeout() {
        Some(idle) => sweep_with_threshold(manager, idle).await,
        None => 0,
    }
}

/// One sweep pass with an explicit idle threshold.
///
/// A failure on one session is logged and does not stop the sweep. Sessions
/// refreshed or destroyed while the sweep was underway are skipped.
pub async fn sweep_with_threshold(manager: &SessionManager, idle: Duration) -> usize {
    let mut reaped = 0;
    for token in manager.expired_tokens(idle) {
        match manager.destroy_if_idle(&token, idle).await {
            Ok(true) => reaped += 1,
            // A request refreshed the session while the sweep waited
            Ok(false) => {}
            // Destroyed concurrently, nothing left to do
            Err(ServiceError::SessionNotFound) => {}
            Err(err) => {
                tracing::warn!(error = %err, "sweep_session_failed");
            }
        }
    }
    if reaped > 0 {
        tracing::info!(reaped, "idle_sessions_reaped");
    }
    reaped
}

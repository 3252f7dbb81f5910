//! Background token refresh.

use crate::Reauthenticate;
use chrono::Utc;
use cloud_auth::{ApiTransport, Authenticator};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

struct RunningLoop {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Refreshes the access token once it has expired and makes the cloud
/// session redial with the new credentials.
///
/// The store is checked every `interval` and whenever the nudge is notified.
/// Failed refreshes are logged and retried on the next check against the
/// unchanged token.
pub struct TokenRefreshSupervisor<T> {
    authenticator: Arc<Authenticator<T>>,
    target: Arc<dyn Reauthenticate>,
    interval: Duration,
    nudge: Arc<Notify>,
    running: Mutex<Option<RunningLoop>>,
}

impl<T: ApiTransport + 'static> TokenRefreshSupervisor<T> {
    pub fn new(
        authenticator: Arc<Authenticator<T>>,
        target: Arc<dyn Reauthenticate>,
        interval: Duration,
    ) -> Self {
        Self {
            authenticator,
            target,
            interval,
            nudge: Arc::new(Notify::new()),
            running: Mutex::new(None),
        }
    }

    /// Check on `nudge` as well as on the timer.
    pub fn with_nudge(mut self, nudge: Arc<Notify>) -> Self {
        self.nudge = nudge;
        self
    }

    /// Spawn the loop unless one is already alive. Returns whether a loop
    /// was started.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            debug!("Token refresh supervisor already running");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(refresh_loop(
            Arc::clone(&self.authenticator),
            Arc::clone(&self.target),
            self.interval,
            Arc::clone(&self.nudge),
            shutdown_rx,
        ));
        *running = Some(RunningLoop {
            shutdown: shutdown_tx,
            task,
        });
        info!(
            interval_secs = self.interval.as_secs_f64(),
            "Token refresh supervisor started"
        );
        true
    }

    /// Ask the loop to stop and wait until it has exited.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        let _ = running.shutdown.send(());
        if let Err(e) = running.task.await {
            warn!(error = %e, "Token refresh supervisor ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Check expiry now instead of waiting for the next tick.
    pub fn nudge(&self) {
        self.nudge.notify_one();
    }
}

async fn refresh_loop<T: ApiTransport>(
    authenticator: Arc<Authenticator<T>>,
    target: Arc<dyn Reauthenticate>,
    interval: Duration,
    nudge: Arc<Notify>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        if authenticator.is_expired(Utc::now()) {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = refresh_once(&authenticator, target.as_ref()) => {}
            }
        }

        tokio::select! {
            _ = &mut shutdown => break,
            _ = sleep(interval) => {}
            _ = nudge.notified() => debug!("Token expiry check requested"),
        }
    }

    debug!("Token refresh supervisor stopped");
}

async fn refresh_once<T: ApiTransport>(
    authenticator: &Authenticator<T>,
    target: &dyn Reauthenticate,
) {
    let state = match authenticator.refresh_current().await {
        Ok(state) => state,
        Err(e) => {
            error!(
                severity = "critical",
                error = %e,
                transient = e.is_transient(),
                "Token refresh failed, retrying on next check"
            );
            return;
        }
    };

    debug!(expires_at = %state.expires_at, "Reconnecting cloud session");
    if let Err(e) = target.reauthenticate().await {
        error!(
            severity = "critical",
            error = %e,
            "Cloud session could not reconnect with the refreshed token"
        );
    }
}

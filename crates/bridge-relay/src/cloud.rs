//! Session with the vendor cloud broker.

use crate::{
    BrokerClient, BrokerEvent, ConnectFailures, ConnectRefusal, DisconnectReason, PumpCommand,
    Reauthenticate, RelayError, RelayMessage, RelayResult, RelaySink, SessionInput,
    SessionSettings, SessionState, SessionStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use cloud_auth::{Device, TokenStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SESSION: &str = "cloud";

/// Cloud side of the bridge.
///
/// Subscribes to every device's outbound topic, hands received traffic to the
/// local session with the retained flag set, and publishes local traffic
/// towards the devices. Credential problems are reported to the refresh
/// supervisor through [`CloudSession::refresh_nudge`].
pub struct CloudSession {
    client: Arc<dyn BrokerClient>,
    control: mpsc::Sender<PumpCommand>,
    devices: Arc<Vec<Device>>,
    tokens: TokenStore,
    settings: SessionSettings,
    status: SessionStatus,
    relay_target: OnceLock<Arc<dyn RelaySink>>,
    refresh_nudge: Arc<Notify>,
    failures: ConnectFailures,
    fatal: mpsc::UnboundedSender<RelayError>,
    closed: AtomicBool,
}

impl CloudSession {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        control: mpsc::Sender<PumpCommand>,
        devices: Arc<Vec<Device>>,
        tokens: TokenStore,
        settings: SessionSettings,
        fatal: mpsc::UnboundedSender<RelayError>,
    ) -> Self {
        Self {
            client,
            control,
            devices,
            tokens,
            settings,
            status: SessionStatus::new(SESSION),
            relay_target: OnceLock::new(),
            refresh_nudge: Arc::new(Notify::new()),
            failures: ConnectFailures::new(settings.max_connect_failures),
            fatal,
            closed: AtomicBool::new(false),
        }
    }

    /// Wire the local session as the destination of cloud traffic.
    pub fn set_relay_target(&self, target: Arc<dyn RelaySink>) {
        if self.relay_target.set(target).is_err() {
            warn!(session = SESSION, "Relay target already wired, keeping the first");
        }
    }

    /// Signalled when a dropped connection or refusal looks like an expired
    /// token.
    pub fn refresh_nudge(&self) -> Arc<Notify> {
        Arc::clone(&self.refresh_nudge)
    }

    pub fn state(&self) -> SessionState {
        self.status.state()
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.status.subscribe()
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Consume pump events until the pump goes away.
    pub fn spawn_event_loop(self: &Arc<Self>, mut events: mpsc::Receiver<BrokerEvent>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                session.handle_event(event).await;
            }
            debug!(session = SESSION, "Event stream ended");
        })
    }

    pub async fn handle_event(&self, event: BrokerEvent) {
        match event {
            BrokerEvent::Dialing => {
                self.status.apply(SessionInput::Dial);
            }
            BrokerEvent::Connected => self.on_connected().await,
            BrokerEvent::ConnectRefused(refusal) => self.on_refused(refusal),
            BrokerEvent::Message(message) => self.forward(message).await,
            BrokerEvent::Disconnected(reason) => self.on_disconnected(reason),
        }
    }

    /// Publish towards the devices at the configured quality of service.
    pub async fn publish(&self, message: RelayMessage) -> RelayResult<()> {
        self.client
            .publish(&message.topic, self.settings.qos, false, message.payload)
            .await
    }

    /// Disconnect from the broker. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.client.disconnect().await {
            debug!(session = SESSION, error = %e, "Disconnect request not delivered");
        }
        self.status.apply(SessionInput::Shutdown);
        info!(session = SESSION, "Cloud session closed");
    }

    async fn on_connected(&self) {
        self.status.apply(SessionInput::ConnAccepted);
        self.failures.reset();
        info!(
            session = SESSION,
            devices = self.devices.len(),
            "Connected to cloud broker"
        );

        for device in self.devices.iter() {
            match self
                .client
                .subscribe(&device.topics.outbound, self.settings.qos)
                .await
            {
                Ok(()) => debug!(topic = %device.topics.outbound, "Subscribed to device output"),
                Err(e) => warn!(
                    topic = %device.topics.outbound,
                    error = %e,
                    "Failed to subscribe to device output"
                ),
            }
        }
    }

    fn on_refused(&self, refusal: ConnectRefusal) {
        self.status.apply(SessionInput::ConnectFailed);

        if refusal.auth && self.tokens.is_expired(Utc::now()) {
            warn!(
                session = SESSION,
                code = %refusal.code,
                "Cloud broker rejected an expired token, requesting refresh"
            );
            self.refresh_nudge.notify_one();
            return;
        }

        if self.failures.record() {
            error!(
                severity = "critical",
                session = SESSION,
                code = %refusal.code,
                attempts = self.failures.count(),
                "Cloud broker keeps refusing the connection"
            );
            let _ = self.fatal.send(RelayError::BrokerConnect {
                broker: SESSION,
                code: refusal.code,
            });
        } else {
            warn!(
                session = SESSION,
                code = %refusal.code,
                attempt = self.failures.count(),
                max = self.failures.max(),
                "Cloud broker refused the connection"
            );
        }
    }

    async fn forward(&self, message: RelayMessage) {
        let Some(target) = self.relay_target.get() else {
            warn!(topic = %message.topic, "Dropping cloud message, local session not wired");
            return;
        };

        let topic = message.topic.clone();
        debug!(topic = %topic, bytes = message.payload.len(), "Relaying cloud message");
        if let Err(e) = target.relay(message.retained(true)).await {
            warn!(topic = %topic, error = %e, "Dropped cloud message");
        }
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        self.status.apply(SessionInput::TransportError);

        if reason.indicates_session_problem() && self.tokens.is_expired(Utc::now()) {
            info!(
                session = SESSION,
                reason = ?reason,
                "Cloud connection dropped with an expired token, requesting refresh"
            );
            self.refresh_nudge.notify_one();
        } else {
            debug!(session = SESSION, reason = ?reason, "Cloud connection dropped");
        }
    }
}

#[async_trait]
impl RelaySink for CloudSession {
    /// Never waits on the request queue, so a stalled cloud link cannot hold
    /// up the local session.
    async fn relay(&self, message: RelayMessage) -> RelayResult<()> {
        let RelayMessage { topic, payload, .. } = message;
        self.client
            .try_publish(&topic, self.settings.qos, false, payload)
            .map_err(|e| RelayError::Forward {
                topic,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Reauthenticate for CloudSession {
    /// Redial with credentials derived from the token now in the store.
    async fn reauthenticate(&self) -> RelayResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.status.apply(SessionInput::Reauthenticate);
        self.control
            .send(PumpCommand::Reconnect)
            .await
            .map_err(|_| RelayError::PumpStopped(SESSION))?;
        self.status.apply(SessionInput::CredentialsReady);
        info!(session = SESSION, "Cloud session reconnecting with refreshed token");
        Ok(())
    }
}

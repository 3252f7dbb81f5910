//! Session with the local broker.

use crate::{
    BrokerClient, BrokerEvent, ConnectFailures, ConnectRefusal, DiscoveryAnnouncer,
    DisconnectReason, RelayError, RelayMessage, RelayResult, RelaySink, SessionInput,
    SessionSettings, SessionState, SessionStatus,
};
use async_trait::async_trait;
use bytes::Bytes;
use cloud_auth::Device;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SESSION: &str = "local";

pub const AVAILABILITY_ONLINE: &str = "online";
pub const AVAILABILITY_OFFLINE: &str = "offline";

/// Local side of the bridge.
///
/// Announces availability, subscribes to every device's inbound topic and
/// hands commands to the cloud session unchanged. The discovery announcer
/// runs after the first accepted connection only.
pub struct LocalSession {
    client: Arc<dyn BrokerClient>,
    devices: Arc<Vec<Device>>,
    availability_topic: String,
    settings: SessionSettings,
    status: SessionStatus,
    relay_target: OnceLock<Arc<dyn RelaySink>>,
    discovery: Arc<dyn DiscoveryAnnouncer>,
    discovery_sent: AtomicBool,
    failures: ConnectFailures,
    fatal: mpsc::UnboundedSender<RelayError>,
    closed: AtomicBool,
}

impl LocalSession {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        devices: Arc<Vec<Device>>,
        availability_topic: impl Into<String>,
        settings: SessionSettings,
        discovery: Arc<dyn DiscoveryAnnouncer>,
        fatal: mpsc::UnboundedSender<RelayError>,
    ) -> Self {
        Self {
            client,
            devices,
            availability_topic: availability_topic.into(),
            settings,
            status: SessionStatus::new(SESSION),
            relay_target: OnceLock::new(),
            discovery,
            discovery_sent: AtomicBool::new(false),
            failures: ConnectFailures::new(settings.max_connect_failures),
            fatal,
            closed: AtomicBool::new(false),
        }
    }

    /// Wire the cloud session as the destination of local traffic.
    pub fn set_relay_target(&self, target: Arc<dyn RelaySink>) {
        if self.relay_target.set(target).is_err() {
            warn!(session = SESSION, "Relay target already wired, keeping the first");
        }
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

    pub fn discovery_sent(&self) -> bool {
        self.discovery_sent.load(Ordering::SeqCst)
    }

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

    /// Publish "offline" and disconnect. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.publish_availability(AVAILABILITY_OFFLINE).await {
            warn!(session = SESSION, error = %e, "Failed to publish offline status");
        }
        if let Err(e) = self.client.disconnect().await {
            debug!(session = SESSION, error = %e, "Disconnect request not delivered");
        }
        self.status.apply(SessionInput::Shutdown);
        info!(session = SESSION, "Local session closed");
    }

    async fn publish_availability(&self, status: &'static str) -> RelayResult<()> {
        self.client
            .publish(
                &self.availability_topic,
                self.settings.qos,
                true,
                Bytes::from_static(status.as_bytes()),
            )
            .await
    }

    async fn on_connected(&self) {
        self.status.apply(SessionInput::ConnAccepted);
        self.failures.reset();
        info!(session = SESSION, "Connected to local broker");

        if let Err(e) = self.publish_availability(AVAILABILITY_ONLINE).await {
            warn!(session = SESSION, error = %e, "Failed to publish online status");
        }

        for device in self.devices.iter() {
            if let Err(e) = self
                .client
                .subscribe(&device.topics.inbound, self.settings.qos)
                .await
            {
                warn!(
                    topic = %device.topics.inbound,
                    error = %e,
                    "Failed to subscribe to device commands"
                );
            }
        }

        if !self.discovery_sent.swap(true, Ordering::SeqCst) {
            match self
                .discovery
                .announce(&self.devices, self.client.as_ref())
                .await
            {
                Ok(()) => info!(devices = self.devices.len(), "Announced devices for discovery"),
                Err(e) => warn!(error = %e, "Discovery announcement failed"),
            }
        }
    }

    fn on_refused(&self, refusal: ConnectRefusal) {
        self.status.apply(SessionInput::ConnectFailed);

        if self.failures.record() {
            error!(
                severity = "critical",
                session = SESSION,
                code = %refusal.code,
                attempts = self.failures.count(),
                "Local broker keeps refusing the connection"
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
                "Local broker refused the connection"
            );
        }
    }

    async fn forward(&self, message: RelayMessage) {
        let Some(target) = self.relay_target.get() else {
            warn!(topic = %message.topic, "Dropping local message, cloud session not wired");
            return;
        };

        let topic = message.topic.clone();
        debug!(topic = %topic, bytes = message.payload.len(), "Relaying local message");
        if let Err(e) = target.relay(message).await {
            warn!(topic = %topic, error = %e, "Dropped local message");
        }
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        self.status.apply(SessionInput::TransportError);
        debug!(session = SESSION, reason = ?reason, "Local connection dropped");
    }
}

#[async_trait]
impl RelaySink for LocalSession {
    /// Never waits on the request queue, so a local outage cannot hold up the
    /// cloud session.
    async fn relay(&self, message: RelayMessage) -> RelayResult<()> {
        let RelayMessage {
            topic,
            payload,
            qos,
            retained,
        } = message;
        self.client
            .try_publish(&topic, qos, retained, payload)
            .map_err(|e| RelayError::Forward {
                topic,
                reason: e.to_string(),
            })
    }
}

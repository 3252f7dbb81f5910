//! Seams between the sessions and their collaborators.

use crate::{BrokerClient, RelayMessage, RelayResult};
use async_trait::async_trait;
use cloud_auth::Device;
use rumqttc::QoS;

/// Knobs shared by both sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Quality of service for subscriptions and the session's own publishes.
    pub qos: QoS,
    /// Consecutive refusals tolerated before the session reports a fatal error.
    pub max_connect_failures: u32,
}

/// Destination of relayed traffic: the opposite session.
#[async_trait]
pub trait RelaySink: Send + Sync {
    async fn relay(&self, message: RelayMessage) -> RelayResult<()>;
}

/// Announces devices to a home automation platform once the local broker
/// is reachable.
#[async_trait]
pub trait DiscoveryAnnouncer: Send + Sync {
    async fn announce(&self, devices: &[Device], publisher: &dyn BrokerClient) -> RelayResult<()>;
}

/// Something that must redial with credentials derived from a new token.
#[async_trait]
pub trait Reauthenticate: Send + Sync {
    async fn reauthenticate(&self) -> RelayResult<()>;
}

//! Broker client seam and the events a session reacts to.

use crate::{RelayMessage, RelayResult};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, QoS};

/// Publish/subscribe capability of one broker connection.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes)
        -> RelayResult<()>;

    /// Queue a publish without waiting for room in the request queue. Fails
    /// when the queue is full.
    fn try_publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes)
        -> RelayResult<()>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> RelayResult<()>;

    /// Request a graceful DISCONNECT.
    async fn disconnect(&self) -> RelayResult<()>;
}

#[async_trait]
impl BrokerClient for AsyncClient {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    ) -> RelayResult<()> {
        self.publish_bytes(topic, qos, retain, payload).await?;
        Ok(())
    }

    fn try_publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> RelayResult<()> {
        AsyncClient::try_publish(self, topic, qos, retain, payload.to_vec())?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> RelayResult<()> {
        AsyncClient::subscribe(self, topic, qos).await?;
        Ok(())
    }

    async fn disconnect(&self) -> RelayResult<()> {
        AsyncClient::disconnect(self).await?;
        Ok(())
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// We sent DISCONNECT.
    Requested,
    /// The broker sent DISCONNECT.
    ServerInitiated,
    /// Socket, TLS or keep-alive failure. The cloud broker drops the socket
    /// this way when the JWT in the username has expired.
    ConnectionLost(String),
}

impl DisconnectReason {
    /// Whether the drop could be caused by rejected session credentials.
    pub fn indicates_session_problem(&self) -> bool {
        !matches!(self, DisconnectReason::Requested)
    }
}

/// Broker-reported CONNACK refusal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRefusal {
    pub code: String,
    /// Refused for bad username/password or missing authorization.
    pub auth: bool,
}

impl From<ConnectReturnCode> for ConnectRefusal {
    fn from(code: ConnectReturnCode) -> Self {
        Self {
            code: format!("{code:?}"),
            auth: matches!(
                code,
                ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized
            ),
        }
    }
}

/// Network-side happenings delivered to a session's event task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// A (re)connection attempt is about to start.
    Dialing,
    /// CONNACK accepted.
    Connected,
    ConnectRefused(ConnectRefusal),
    Message(RelayMessage),
    Disconnected(DisconnectReason),
}

impl BrokerEvent {
    /// Classify an event loop error.
    pub fn from_connection_error(error: &ConnectionError) -> Self {
        match error {
            ConnectionError::ConnectionRefused(code) => {
                BrokerEvent::ConnectRefused(ConnectRefusal::from(*code))
            }
            other => BrokerEvent::Disconnected(DisconnectReason::ConnectionLost(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_classification() {
        let refusal = ConnectRefusal::from(ConnectReturnCode::NotAuthorized);
        assert!(refusal.auth);
        assert_eq!(refusal.code, "NotAuthorized");

        let refusal = ConnectRefusal::from(ConnectReturnCode::ServiceUnavailable);
        assert!(!refusal.auth);
    }

    #[test]
    fn connection_errors_map_to_events() {
        let refused = ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
        assert!(matches!(
            BrokerEvent::from_connection_error(&refused),
            BrokerEvent::ConnectRefused(ConnectRefusal { auth: true, .. })
        ));

        let lost = BrokerEvent::from_connection_error(&ConnectionError::NetworkTimeout);
        assert!(matches!(
            lost,
            BrokerEvent::Disconnected(DisconnectReason::ConnectionLost(_))
        ));
    }

    #[test]
    fn requested_disconnect_is_not_a_session_problem() {
        assert!(!DisconnectReason::Requested.indicates_session_problem());
        assert!(DisconnectReason::ServerInitiated.indicates_session_problem());
        assert!(DisconnectReason::ConnectionLost("reset".into()).indicates_session_problem());
    }
}

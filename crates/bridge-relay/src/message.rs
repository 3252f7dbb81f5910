//! Messages passed between the two broker sessions.

use crate::{RelayError, RelayResult};
use bytes::Bytes;
use rumqttc::{Publish, QoS};

/// Command asking a mower to report its full status.
pub const STATUS_POLL_PAYLOAD: &[u8] = br#"{"cmd":0}"#;

/// A message relayed between brokers. The payload is never inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retained: bool,
}

impl RelayMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retained: false,
        }
    }

    pub fn retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    /// Status poll for a device's inbound topic.
    pub fn status_poll(inbound_topic: &str, qos: QoS) -> Self {
        Self::new(inbound_topic, Bytes::from_static(STATUS_POLL_PAYLOAD), qos)
    }
}

impl From<Publish> for RelayMessage {
    fn from(publish: Publish) -> Self {
        Self {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retained: publish.retain,
        }
    }
}

/// Map a numeric level to [`QoS`].
pub fn qos_level(level: u8) -> RelayResult<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(RelayError::InvalidQos(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_conversion_keeps_everything() {
        let mut publish = Publish::new("fleet/42/out", QoS::AtLeastOnce, r#"{"dat":{"ls":7}}"#);
        publish.retain = true;

        let message = RelayMessage::from(publish);

        assert_eq!(message.topic, "fleet/42/out");
        assert_eq!(&message.payload[..], br#"{"dat":{"ls":7}}"#);
        assert_eq!(message.qos, QoS::AtLeastOnce);
        assert!(message.retained);
    }

    #[test]
    fn status_poll_targets_inbound_topic() {
        let poll = RelayMessage::status_poll("WX/1/commandIn", QoS::AtLeastOnce);
        assert_eq!(poll.topic, "WX/1/commandIn");
        assert_eq!(&poll.payload[..], b"{\"cmd\":0}");
        assert!(!poll.retained);
    }

    #[test]
    fn qos_levels() {
        assert_eq!(qos_level(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_level(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_level(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(qos_level(3), Err(RelayError::InvalidQos(3))));
    }
}

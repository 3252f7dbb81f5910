//! Relaying between the two sessions.

use super::harness::{
    cloud_fixture, cloud_over, local_fixture, local_over, stalled_client, valid_tokens, wired,
};
use crate::{BrokerEvent, RelayError, RelayMessage, RelaySink};
use bytes::Bytes;
use rumqttc::QoS;
use std::time::Duration;
use tokio::time::timeout;

fn cloud_message(n: u8) -> BrokerEvent {
    BrokerEvent::Message(RelayMessage::new(
        "fleet/1/out",
        Bytes::from(vec![n]),
        QoS::AtLeastOnce,
    ))
}

#[tokio::test]
async fn cloud_message_reaches_local_retained_and_unchanged() {
    let (cloud, local) = wired(1);
    let payload = Bytes::from_static(br#"{"dat":{"ls":7}}"#);

    cloud
        .session
        .handle_event(BrokerEvent::Message(RelayMessage::new(
            "fleet/42/out",
            payload.clone(),
            QoS::AtLeastOnce,
        )))
        .await;

    let published = local.client.published_to("fleet/42/out");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "fleet/42/out");
    assert_eq!(published[0].payload, payload);
    assert_eq!(published[0].qos, QoS::AtLeastOnce);
    assert!(published[0].retain);
}

#[tokio::test]
async fn cloud_message_keeps_its_own_qos() {
    let (cloud, local) = wired(1);

    cloud
        .session
        .handle_event(BrokerEvent::Message(RelayMessage::new(
            "fleet/1/out",
            Bytes::from_static(b"\x00\xff binary"),
            QoS::AtMostOnce,
        )))
        .await;

    let published = local.client.published_to("fleet/1/out");
    assert_eq!(published[0].qos, QoS::AtMostOnce);
    assert_eq!(&published[0].payload[..], b"\x00\xff binary");
}

#[tokio::test]
async fn local_command_reaches_cloud() {
    let (cloud, local) = wired(1);

    local
        .session
        .handle_event(BrokerEvent::Message(RelayMessage::new(
            "fleet/1/in",
            Bytes::from_static(br#"{"cmd":1}"#),
            QoS::AtLeastOnce,
        )))
        .await;

    let published = cloud.client.published_to("fleet/1/in");
    assert_eq!(published.len(), 1);
    assert_eq!(&published[0].payload[..], br#"{"cmd":1}"#);
    assert_eq!(published[0].qos, QoS::AtLeastOnce);
    assert!(!published[0].retain);
}

#[tokio::test]
async fn messages_keep_order_per_topic() {
    let (cloud, local) = wired(1);

    for n in 0..5u8 {
        cloud
            .session
            .handle_event(BrokerEvent::Message(RelayMessage::new(
                "fleet/1/out",
                Bytes::from(vec![n]),
                QoS::AtLeastOnce,
            )))
            .await;
    }

    let payloads: Vec<u8> = local
        .client
        .published_to("fleet/1/out")
        .iter()
        .map(|p| p.payload[0])
        .collect();
    assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn failed_forward_is_dropped_and_session_continues() {
    let (cloud, local) = wired(1);
    local.client.fail_publishes(true);

    cloud
        .session
        .handle_event(BrokerEvent::Message(RelayMessage::new(
            "fleet/1/out",
            Bytes::from_static(b"lost"),
            QoS::AtLeastOnce,
        )))
        .await;
    assert!(local.client.published().is_empty());

    local.client.fail_publishes(false);
    cloud
        .session
        .handle_event(BrokerEvent::Message(RelayMessage::new(
            "fleet/1/out",
            Bytes::from_static(b"kept"),
            QoS::AtLeastOnce,
        )))
        .await;
    assert_eq!(&local.client.published()[0].payload[..], b"kept");
}

#[tokio::test]
async fn status_poll_goes_out_on_inbound_topic() {
    let (cloud, _local) = wired(2);

    for device in cloud.session.devices().to_vec() {
        cloud
            .session
            .publish(RelayMessage::status_poll(&device.topics.inbound, QoS::AtLeastOnce))
            .await
            .unwrap();
    }

    let topics: Vec<String> = cloud.client.published().into_iter().map(|p| p.topic).collect();
    assert_eq!(topics, vec!["fleet/1/in", "fleet/2/in"]);
    assert_eq!(&cloud.client.published()[0].payload[..], br#"{"cmd":0}"#);
}

#[tokio::test]
async fn stalled_local_broker_does_not_block_cloud_events() {
    let (client, _eventloop) = stalled_client(4);
    let local = local_over(client, 1);
    let cloud = cloud_fixture(valid_tokens(), 1);
    cloud.session.set_relay_target(local);

    let mut handled = 0;
    for n in 0..10u8 {
        let delivered = timeout(
            Duration::from_secs(1),
            cloud.session.handle_event(cloud_message(n)),
        )
        .await;
        if delivered.is_err() {
            break;
        }
        handled += 1;
    }
    assert_eq!(handled, 10);

    // The cloud session still reacts to its own broker.
    cloud.session.handle_event(BrokerEvent::Dialing).await;
    cloud.session.handle_event(BrokerEvent::Connected).await;
    assert!(cloud.session.is_connected());
}

#[tokio::test]
async fn full_local_queue_reports_forward_error() {
    let (client, _eventloop) = stalled_client(2);
    let local = local_over(client, 1);

    for n in 0..2u8 {
        let message = RelayMessage::new("fleet/1/out", Bytes::from(vec![n]), QoS::AtLeastOnce);
        local.relay(message).await.unwrap();
    }
    let overflow = RelayMessage::new("fleet/1/out", Bytes::from_static(b"x"), QoS::AtLeastOnce);
    match local.relay(overflow).await {
        Err(RelayError::Forward { topic, .. }) => assert_eq!(topic, "fleet/1/out"),
        other => panic!("expected a forward error, got {other:?}"),
    }
}

#[tokio::test]
async fn stalled_cloud_broker_does_not_block_local_events() {
    let (client, _eventloop) = stalled_client(4);
    let cloud = cloud_over(client, 1);
    let local = local_fixture(1);
    local.session.set_relay_target(cloud);

    for n in 0..10u8 {
        let command = BrokerEvent::Message(RelayMessage::new(
            "fleet/1/in",
            Bytes::from(vec![n]),
            QoS::AtLeastOnce,
        ));
        timeout(Duration::from_secs(1), local.session.handle_event(command))
            .await
            .expect("local event handling stalled behind the cloud queue");
    }
}

//! Local session availability and one-shot discovery.

use super::harness::{local_fixture, AVAILABILITY_TOPIC};
use crate::{BrokerEvent, DisconnectReason, SessionState};
use rumqttc::QoS;

#[tokio::test]
async fn discovery_fires_once_across_reconnects() {
    let local = local_fixture(2);

    local.session.handle_event(BrokerEvent::Dialing).await;
    local.session.handle_event(BrokerEvent::Connected).await;
    local
        .session
        .handle_event(BrokerEvent::Disconnected(DisconnectReason::ConnectionLost(
            "reset".into(),
        )))
        .await;
    local.session.handle_event(BrokerEvent::Dialing).await;
    local.session.handle_event(BrokerEvent::Connected).await;

    assert_eq!(
        local.discovery.announcements(),
        vec![vec!["1".to_string(), "2".to_string()]]
    );
    assert!(local.session.discovery_sent());
}

#[tokio::test]
async fn every_connect_announces_online_and_subscribes() {
    let local = local_fixture(2);

    for _ in 0..2 {
        local.session.handle_event(BrokerEvent::Dialing).await;
        local.session.handle_event(BrokerEvent::Connected).await;
        assert_eq!(local.session.state(), SessionState::Connected);
    }

    let online = local.client.published_to(AVAILABILITY_TOPIC);
    assert_eq!(online.len(), 2);
    assert!(online.iter().all(|p| p.retain && &p.payload[..] == b"online"));

    let subscribed = local.client.subscribed();
    assert_eq!(subscribed.len(), 4);
    assert_eq!(subscribed[0], ("fleet/1/in".to_string(), QoS::AtLeastOnce));
    assert_eq!(subscribed[1], ("fleet/2/in".to_string(), QoS::AtLeastOnce));
}

#[tokio::test]
async fn shutdown_publishes_offline_before_disconnecting() {
    let local = local_fixture(1);
    local.session.handle_event(BrokerEvent::Connected).await;

    local.session.shutdown().await;
    local.session.shutdown().await;

    let calls = local.client.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[format!("publish {AVAILABILITY_TOPIC}"), "disconnect".to_string()]
    );
    let last = local.client.published_to(AVAILABILITY_TOPIC).pop().unwrap();
    assert_eq!(&last.payload[..], b"offline");
    assert!(last.retain);
    assert_eq!(local.client.disconnects(), 1);
    assert_eq!(local.session.state(), SessionState::Disconnected);
}

//! Token refresh supervisor, alone and driving a cloud session.

use super::harness::{cloud_fixture, RecordingReauth};
use crate::{
    cloud_credential_source, cloud_username, BrokerEvent, PumpCommand, SessionState,
    TokenRefreshSupervisor,
};
use bridge_config::{Brand, Credentials};
use cloud_auth::testing::ScriptedTransport;
use cloud_auth::{Authenticator, RestClient, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn authenticator(transport: ScriptedTransport) -> Arc<Authenticator<ScriptedTransport>> {
    let rest = RestClient::new(transport, RetryPolicy::default());
    Arc::new(
        Authenticator::new(
            rest,
            Brand::Worx.config(),
            Credentials::new("owner@example.com", "hunter2"),
        )
        .unwrap(),
    )
}

fn request_count(auth: &Authenticator<ScriptedTransport>) -> usize {
    auth.rest().transport().request_count()
}

#[tokio::test]
async fn second_start_does_not_spawn_another_loop() {
    let transport = ScriptedTransport::new();
    transport.push_token("first.a.b", "refresh-1", 1);
    transport.push_token("second.a.b", "refresh-2", 3600);
    let auth = authenticator(transport);
    auth.acquire().await.unwrap();
    let reauth = RecordingReauth::new();

    let supervisor =
        TokenRefreshSupervisor::new(auth.clone(), reauth.clone(), Duration::from_millis(100));
    assert!(supervisor.start());
    assert!(!supervisor.start());
    assert!(supervisor.is_running());

    sleep(Duration::from_secs(2)).await;

    assert_eq!(request_count(&auth), 2, "one acquire and one refresh");
    assert_eq!(reauth.calls(), 1);

    supervisor.stop().await;
    assert!(!supervisor.is_running());
}

#[tokio::test]
async fn expired_token_is_refreshed_and_cloud_redials_once() {
    let transport = ScriptedTransport::new();
    transport.push_token("old.a.b", "refresh-1", 1);
    transport.push_token("new.c.d", "refresh-2", 3600);
    let auth = authenticator(transport);
    auth.acquire().await.unwrap();

    let mut cloud = cloud_fixture(auth.tokens().clone(), 1);
    let credentials = cloud_credential_source(auth.tokens().clone());
    assert_eq!(credentials().unwrap().0, cloud_username("old.a.b"));
    cloud.session.handle_event(BrokerEvent::Dialing).await;
    cloud.session.handle_event(BrokerEvent::Connected).await;

    let supervisor =
        TokenRefreshSupervisor::new(auth.clone(), cloud.session.clone(), Duration::from_millis(200))
            .with_nudge(cloud.session.refresh_nudge());
    supervisor.start();

    sleep(Duration::from_secs(2)).await;

    assert_eq!(request_count(&auth), 2);
    let refresh = &auth.rest().transport().requests()[1];
    let body = refresh.body.as_ref().unwrap();
    assert_eq!(body["grant_type"], "refresh_token");
    assert_eq!(body["refresh_token"], "refresh-1");

    assert_eq!(cloud.control.try_recv().unwrap(), PumpCommand::Reconnect);
    assert!(cloud.control.try_recv().is_err(), "exactly one reconnect");
    assert_eq!(cloud.session.state(), SessionState::Connecting);
    assert_eq!(credentials().unwrap().0, cloud_username("new.c.d"));

    supervisor.stop().await;
}

#[tokio::test]
async fn failed_refresh_is_retried_on_next_check() {
    let transport = ScriptedTransport::new();
    transport.push_token("first.a.b", "refresh-1", 1);
    transport.push_status(401, r#"{"error":"invalid_grant"}"#);
    transport.push_token("second.a.b", "refresh-2", 3600);
    let auth = authenticator(transport);
    auth.acquire().await.unwrap();
    let reauth = RecordingReauth::new();

    let supervisor =
        TokenRefreshSupervisor::new(auth.clone(), reauth.clone(), Duration::from_millis(100));
    supervisor.start();

    sleep(Duration::from_millis(2500)).await;

    assert_eq!(request_count(&auth), 3);
    assert_eq!(reauth.calls(), 1);
    assert!(supervisor.is_running());
    assert_eq!(auth.tokens().current().unwrap().access_token, "second.a.b");

    supervisor.stop().await;
}

#[tokio::test]
async fn nudge_checks_before_the_next_tick() {
    let transport = ScriptedTransport::new();
    transport.push_token("first.a.b", "refresh-1", 1);
    transport.push_token("second.a.b", "refresh-2", 3600);
    let auth = authenticator(transport);
    auth.acquire().await.unwrap();
    let reauth = RecordingReauth::new();

    let supervisor =
        TokenRefreshSupervisor::new(auth.clone(), reauth.clone(), Duration::from_secs(3600));
    supervisor.start();

    sleep(Duration::from_millis(1200)).await;
    assert_eq!(reauth.calls(), 0);

    supervisor.nudge();
    sleep(Duration::from_millis(300)).await;

    assert_eq!(reauth.calls(), 1);
    supervisor.stop().await;
}

#[tokio::test]
async fn stop_then_start_again() {
    let transport = ScriptedTransport::new();
    transport.push_token("first.a.b", "refresh-1", 3600);
    let auth = authenticator(transport);
    auth.acquire().await.unwrap();

    let supervisor =
        TokenRefreshSupervisor::new(auth, RecordingReauth::new(), Duration::from_millis(50));
    supervisor.stop().await;

    assert!(supervisor.start());
    supervisor.stop().await;
    assert!(!supervisor.is_running());

    assert!(supervisor.start());
    supervisor.stop().await;
}

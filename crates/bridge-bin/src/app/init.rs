//! Bridge startup, supervision and shutdown.

use crate::app::monitor::monitor_sessions;
use crate::app::signals::shutdown_signal;
use crate::discovery::HomeAssistantDiscovery;
use crate::error::BridgeResult;
use bridge_config::BridgeConfig;
use bridge_relay::{
    cloud_credential_source, cloud_options, local_options, qos_level, CloudConnectParams,
    CloudSession, EventPump, LocalSession, ReconnectBackoff, RelayMessage, SessionSettings,
    TokenRefreshSupervisor,
};
use chrono::Utc;
use cloud_auth::{Authenticator, FleetDirectory, ReqwestTransport, RestClient, RetryPolicy};
use rumqttc::AsyncClient;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of each MQTT client's request queue.
const CLIENT_CAPACITY: usize = 64;

const PUMP_CONTROL_CAPACITY: usize = 4;

/// Run the bridge until a termination signal (`Ok`) or a fatal error.
pub async fn run_bridge(config: BridgeConfig) -> BridgeResult<()> {
    let tuning = &config.tuning;
    let qos = qos_level(tuning.qos)?;
    let settings = SessionSettings {
        qos,
        max_connect_failures: tuning.broker_connect_max_failures,
    };
    let backoff = || ReconnectBackoff::new(tuning.reconnect_min_delay(), tuning.reconnect_max_delay());

    info!(
        brand = config.brand.cloud_name,
        local_host = %config.local.host,
        local_port = config.local.port,
        local_login = config.local.credentials.is_some(),
        "Starting Mower MQTT Bridge"
    );

    // Local broker first; rumqttc dials once its pump starts polling
    let local_login = config
        .local
        .credentials
        .as_ref()
        .map(|c| (c.username.as_str(), c.password.as_str()));
    let local_mqtt = local_options(
        &tuning.local_client_id,
        &config.local.host,
        config.local.port,
        local_login,
        &tuning.availability_topic,
        qos,
        tuning.local_keep_alive(),
        config.local.tls,
    )?;
    let (local_client, local_eventloop) = AsyncClient::new(local_mqtt, CLIENT_CAPACITY);

    // Cloud account
    let rest = RestClient::new(
        ReqwestTransport::new(tuning.http_timeout())?,
        RetryPolicy::from(tuning),
    );
    let authenticator = Arc::new(Authenticator::new(
        rest.clone(),
        config.brand,
        config.account.clone(),
    )?);
    let token = authenticator.acquire().await?;

    let directory = FleetDirectory::new(rest, config.brand)?;
    let devices = Arc::new(directory.list_devices(&token.access_token).await?);

    let params = CloudConnectParams::derive(
        config.brand.code,
        &devices,
        &token,
        Uuid::new_v4(),
        Utc::now(),
        tuning.cloud_port,
    )?;
    info!(
        endpoint = %params.endpoint,
        client_id = %params.client_id,
        devices = devices.len(),
        "Cloud broker selected"
    );
    let cloud_mqtt = cloud_options(
        &params.client_id,
        &params.endpoint,
        params.port,
        &params.username,
        tuning.cloud_keep_alive(),
    )?;
    let (cloud_client, cloud_eventloop) = AsyncClient::new(cloud_mqtt, CLIENT_CAPACITY);

    // Sessions
    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::channel(PUMP_CONTROL_CAPACITY);
    let cloud = Arc::new(CloudSession::new(
        Arc::new(cloud_client),
        control_tx,
        Arc::clone(&devices),
        authenticator.tokens().clone(),
        settings,
        fatal_tx.clone(),
    ));
    let discovery = Arc::new(HomeAssistantDiscovery::new(
        tuning.discovery_prefix.as_str(),
        tuning.availability_topic.as_str(),
        config.brand.cloud_name,
        qos,
    ));
    let local = Arc::new(LocalSession::new(
        Arc::new(local_client),
        Arc::clone(&devices),
        tuning.availability_topic.as_str(),
        settings,
        discovery,
        fatal_tx,
    ));

    cloud.set_relay_target(local.clone());
    local.set_relay_target(cloud.clone());

    // Network I/O
    let (local_pump, local_events) = EventPump::new("local", local_eventloop, backoff());
    let (cloud_pump, cloud_events) = EventPump::new("cloud", cloud_eventloop, backoff());
    let cloud_pump = cloud_pump
        .with_control(control_rx)
        .with_credentials(cloud_credential_source(authenticator.tokens().clone()));
    let tasks = vec![
        local_pump.spawn(),
        local.spawn_event_loop(local_events),
        cloud_pump.spawn(),
        cloud.spawn_event_loop(cloud_events),
    ];

    let supervisor = TokenRefreshSupervisor::new(
        Arc::clone(&authenticator),
        cloud.clone(),
        tuning.token_refresh_interval(),
    )
    .with_nudge(cloud.refresh_nudge());
    supervisor.start();

    for device in devices.iter() {
        let poll = RelayMessage::status_poll(&device.topics.inbound, qos);
        if let Err(e) = cloud.publish(poll).await {
            warn!(device = %device.name, error = %e, "Failed to request initial status");
        }
    }

    info!(devices = devices.len(), "Mower MQTT Bridge running");

    let outcome = tokio::select! {
        _ = shutdown_signal() => Ok(()),
        Some(error) = fatal_rx.recv() => Err(error.into()),
        _ = monitor_sessions(cloud.clone(), local.clone(), tuning.monitor_interval()) => Ok(()),
    };

    info!("Stopping Mower MQTT Bridge...");
    let grace = tuning.shutdown_grace();
    if timeout(grace, local.shutdown()).await.is_err() {
        warn!("Local session did not close in time");
    }
    if timeout(grace, supervisor.stop()).await.is_err() {
        warn!("Token refresh supervisor did not stop in time");
    }
    if timeout(grace, cloud.shutdown()).await.is_err() {
        warn!("Cloud session did not close in time");
    }
    join_or_abort(tasks, grace).await;

    info!("Mower MQTT Bridge stopped");
    outcome
}

async fn join_or_abort(tasks: Vec<JoinHandle<()>>, grace: std::time::Duration) {
    for mut task in tasks {
        if timeout(grace, &mut task).await.is_err() {
            debug!("Background task still running after shutdown, aborting");
            task.abort();
        }
    }
}

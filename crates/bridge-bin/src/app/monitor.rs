//! Connectivity monitor.

use bridge_relay::{CloudSession, LocalSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// Remembers the last observed value of a flag and reports only changes.
#[derive(Debug, Default)]
pub struct EdgeTracker {
    last: Option<bool>,
}

impl EdgeTracker {
    /// Record `connected`; returns it when it differs from the last value.
    pub fn observe(&mut self, connected: bool) -> Option<bool> {
        if self.last == Some(connected) {
            return None;
        }
        self.last = Some(connected);
        Some(connected)
    }
}

/// Poll both sessions forever, logging connect and disconnect edges.
pub async fn monitor_sessions(cloud: Arc<CloudSession>, local: Arc<LocalSession>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cloud_edges = EdgeTracker::default();
    let mut local_edges = EdgeTracker::default();

    loop {
        ticker.tick().await;
        log_edge("cloud", cloud_edges.observe(cloud.is_connected()));
        log_edge("local", local_edges.observe(local.is_connected()));
    }
}

fn log_edge(broker: &'static str, edge: Option<bool>) {
    match edge {
        Some(true) => info!(broker, "MQTT broker connected"),
        Some(false) => warn!(broker, "MQTT broker disconnected"),
        None => {}
    }
}

//! rumqttc plumbing: connection options, TLS and the event pump.
//!
//! Each session owns one [`EventPump`] task driving its `EventLoop`. The pump
//! turns network activity into [`BrokerEvent`]s, waits a randomized backoff
//! after failures, and redials on request with fresh credentials.

use crate::{BrokerEvent, DisconnectReason, RelayError, RelayMessage, RelayResult};
use rand::Rng;
use rumqttc::{
    ConnectionError, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// ALPN protocol expected by the cloud broker on port 443.
pub const CLOUD_ALPN: &[u8] = b"mqtt";

const MAX_PACKET_SIZE: usize = 256 * 1024;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Produces the username/password to dial with, evaluated before every dial.
/// `None` holds the dial back until credentials become available.
pub type CredentialSource = Arc<dyn Fn() -> Option<(String, String)> + Send + Sync>;

/// Control requests for a running pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpCommand {
    /// Drop the current connection and dial again immediately.
    Reconnect,
}

/// Exponential backoff between reconnect attempts, jittered and clamped to
/// `[min, max]`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    min: Duration,
    max: Duration,
    failures: u32,
}

impl ReconnectBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            failures: 0,
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn next_delay(&mut self) -> Duration {
        let shift = self.failures.min(16);
        self.failures = self.failures.saturating_add(1);
        let base = self.min.saturating_mul(1u32 << shift).min(self.max);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        base.mul_f64(jitter).clamp(self.min, self.max)
    }
}

/// rustls client configuration trusting the platform roots.
pub fn tls_configuration(alpn: Option<&[u8]>) -> RelayResult<TlsConfiguration> {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs()
        .map_err(|e| RelayError::Tls(format!("cannot load platform certificates: {e}")))?;
    let (added, ignored) = roots.add_parsable_certificates(native);
    if added == 0 {
        return Err(RelayError::Tls("no usable platform root certificates".into()));
    }
    debug!(added, ignored, "Loaded platform root certificates");

    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    if let Some(protocol) = alpn {
        config.alpn_protocols = vec![protocol.to_vec()];
    }
    Ok(TlsConfiguration::Rustls(Arc::new(config)))
}

/// Options for the cloud broker: persistent session, ALPN over TLS, token
/// derived username with an empty password.
pub fn cloud_options(
    client_id: &str,
    endpoint: &str,
    port: u16,
    username: &str,
    keep_alive: Duration,
) -> RelayResult<MqttOptions> {
    let mut options = MqttOptions::new(client_id, endpoint, port);
    options
        .set_keep_alive(keep_alive)
        .set_clean_session(false)
        .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE)
        .set_credentials(username, "")
        .set_transport(Transport::tls_with_config(tls_configuration(Some(CLOUD_ALPN))?));
    Ok(options)
}

/// Options for the local broker, with the availability last will.
pub fn local_options(
    client_id: &str,
    host: &str,
    port: u16,
    credentials: Option<(&str, &str)>,
    availability_topic: &str,
    qos: QoS,
    keep_alive: Duration,
    tls: bool,
) -> RelayResult<MqttOptions> {
    let mut options = MqttOptions::new(client_id, host, port);
    options
        .set_keep_alive(keep_alive)
        .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE)
        .set_last_will(LastWill::new(availability_topic, "offline", qos, true));
    if let Some((username, password)) = credentials {
        options.set_credentials(username, password);
    }
    if tls {
        options.set_transport(Transport::tls_with_config(tls_configuration(None)?));
    }
    Ok(options)
}

/// Owner of one `EventLoop`.
pub struct EventPump {
    name: &'static str,
    eventloop: EventLoop,
    events: mpsc::Sender<BrokerEvent>,
    control: Option<mpsc::Receiver<PumpCommand>>,
    credentials: Option<CredentialSource>,
    backoff: ReconnectBackoff,
}

impl EventPump {
    /// Build a pump and the receiver its events arrive on.
    pub fn new(
        name: &'static str,
        eventloop: EventLoop,
        backoff: ReconnectBackoff,
    ) -> (Self, mpsc::Receiver<BrokerEvent>) {
        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pump = Self {
            name,
            eventloop,
            events,
            control: None,
            credentials: None,
            backoff,
        };
        (pump, rx)
    }

    pub fn with_control(mut self, control: mpsc::Receiver<PumpCommand>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialSource) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&mut self) {
        let mut dialing = true;

        loop {
            if dialing {
                if !self.apply_credentials() {
                    let delay = self.backoff.next_delay();
                    debug!(
                        session = self.name,
                        retry_in_secs = delay.as_secs(),
                        "No valid credentials, holding off dial"
                    );
                    self.wait(delay).await;
                    continue;
                }
                if !self.emit(BrokerEvent::Dialing).await {
                    break;
                }
                dialing = false;
            }

            tokio::select! {
                command = next_command(&mut self.control) => match command {
                    Some(PumpCommand::Reconnect) => {
                        info!(session = self.name, "Reconnecting with fresh credentials");
                        self.eventloop.clean();
                        self.backoff.reset();
                        dialing = true;
                    }
                    None => self.control = None,
                },
                polled = self.eventloop.poll() => match polled {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        self.backoff.reset();
                        if !self.emit(BrokerEvent::Connected).await {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if !self.emit(BrokerEvent::Message(RelayMessage::from(publish))).await {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        self.eventloop.clean();
                        if !self.emit(BrokerEvent::Disconnected(DisconnectReason::ServerInitiated)).await {
                            break;
                        }
                        dialing = true;
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        let _ = self.emit(BrokerEvent::Disconnected(DisconnectReason::Requested)).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(ConnectionError::RequestsDone) => {
                        debug!(session = self.name, "All client handles dropped");
                        break;
                    }
                    Err(error) => {
                        if !self.emit(BrokerEvent::from_connection_error(&error)).await {
                            break;
                        }
                        let delay = self.backoff.next_delay();
                        warn!(
                            session = self.name,
                            error = %error,
                            failures = self.backoff.failures(),
                            retry_in_secs = delay.as_secs(),
                            "MQTT connection error, waiting before reconnect"
                        );
                        self.wait(delay).await;
                        dialing = true;
                    }
                },
            }
        }

        debug!(session = self.name, "Event pump stopped");
    }

    /// Sleep out a backoff delay; a reconnect request cuts it short.
    async fn wait(&mut self, delay: Duration) {
        tokio::select! {
            _ = sleep(delay) => {}
            command = next_command(&mut self.control) => match command {
                Some(PumpCommand::Reconnect) => {
                    debug!(session = self.name, "Reconnect requested during backoff");
                    self.backoff.reset();
                }
                None => self.control = None,
            },
        }
    }

    /// Install fresh credentials before a dial. False when the source has
    /// none to offer.
    fn apply_credentials(&mut self) -> bool {
        let Some(source) = &self.credentials else {
            return true;
        };
        match source() {
            Some((username, password)) => {
                self.eventloop.mqtt_options.set_credentials(username, password);
                true
            }
            None => false,
        }
    }

    async fn emit(&mut self, event: BrokerEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

async fn next_command(control: &mut Option<mpsc::Receiver<PumpCommand>>) -> Option<PumpCommand> {
    match control {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rumqttc::AsyncClient;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::timeout;

    const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    /// A port nothing listens on.
    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn pump_to(port: u16) -> (AsyncClient, EventPump, mpsc::Receiver<BrokerEvent>) {
        let options = MqttOptions::new("pump-test", "127.0.0.1", port);
        let (client, eventloop) = AsyncClient::new(options, 10);
        let backoff = ReconnectBackoff::new(Duration::from_secs(10), Duration::from_secs(300));
        let (pump, events) = EventPump::new("test", eventloop, backoff);
        (client, pump, events)
    }

    #[tokio::test(start_paused = true)]
    async fn dial_waits_for_credentials_until_reconnect() {
        let (_client, pump, mut events) = pump_to(closed_port());
        let login: Arc<Mutex<Option<(String, String)>>> = Arc::default();
        let source_login = Arc::clone(&login);
        let (control, control_rx) = mpsc::channel(4);
        let mut pump = pump
            .with_control(control_rx)
            .with_credentials(Arc::new(move || source_login.lock().clone()));

        let driver = async {
            // Several backoff periods pass without a dial
            assert!(timeout(Duration::from_secs(120), events.recv()).await.is_err());

            *login.lock() = Some(("bot?jwt=fresh".into(), String::new()));
            control.send(PumpCommand::Reconnect).await.unwrap();
            let next = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
            assert_eq!(next, Some(BrokerEvent::Dialing));
        };
        tokio::select! {
            _ = pump.run() => panic!("pump stopped"),
            _ = driver => {}
        }

        assert_eq!(
            pump.eventloop.mqtt_options.credentials(),
            Some(("bot?jwt=fresh".to_string(), String::new()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn credentials_are_rederived_before_every_dial() {
        let (_client, pump, mut events) = pump_to(closed_port());
        let dials = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&dials);
        let mut pump = pump.with_credentials(Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Some((format!("user-{n}"), String::new()))
        }));

        let driver = async {
            let mut dialed = 0;
            while dialed < 3 {
                match events.recv().await {
                    Some(BrokerEvent::Dialing) => dialed += 1,
                    Some(BrokerEvent::Disconnected(DisconnectReason::ConnectionLost(_))) => {}
                    other => panic!("unexpected event {other:?}"),
                }
            }
        };
        tokio::select! {
            _ = pump.run() => panic!("pump stopped"),
            _ = driver => {}
        }

        assert_eq!(dials.load(Ordering::SeqCst), 3);
        assert_eq!(
            pump.eventloop.mqtt_options.credentials(),
            Some(("user-3".to_string(), String::new()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_cuts_backoff_short() {
        let (_client, pump, mut events) = pump_to(closed_port());
        let (control, control_rx) = mpsc::channel(4);
        let mut pump = pump.with_control(control_rx);

        let driver = async {
            assert_eq!(events.recv().await, Some(BrokerEvent::Dialing));
            assert!(matches!(
                events.recv().await,
                Some(BrokerEvent::Disconnected(DisconnectReason::ConnectionLost(_)))
            ));

            // The pump now sleeps at least ten seconds before the next dial
            let started = tokio::time::Instant::now();
            control.send(PumpCommand::Reconnect).await.unwrap();
            assert_eq!(events.recv().await, Some(BrokerEvent::Dialing));
            assert!(started.elapsed() < Duration::from_secs(10));
        };
        tokio::select! {
            _ = pump.run() => panic!("pump stopped"),
            _ = driver => {}
        }
    }

    #[tokio::test]
    async fn pump_stops_after_requested_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(&CONNACK_ACCEPTED).await.unwrap();
            // Held open until the client says goodbye
            let _ = socket.read(&mut buf).await;
        });

        let (client, pump, mut events) = pump_to(port);
        let task = pump.spawn();
        let within = Duration::from_secs(5);

        assert_eq!(timeout(within, events.recv()).await.unwrap(), Some(BrokerEvent::Dialing));
        assert_eq!(timeout(within, events.recv()).await.unwrap(), Some(BrokerEvent::Connected));

        client.disconnect().await.unwrap();
        assert_eq!(
            timeout(within, events.recv()).await.unwrap(),
            Some(BrokerEvent::Disconnected(DisconnectReason::Requested))
        );
        timeout(within, task).await.unwrap().unwrap();
        timeout(within, broker).await.unwrap().unwrap();
    }

    #[test]
    fn backoff_stays_within_bounds() {
        let min = Duration::from_secs(10);
        let max = Duration::from_secs(300);
        let mut backoff = ReconnectBackoff::new(min, max);

        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay >= min, "{delay:?} below minimum");
            assert!(delay <= max, "{delay:?} above maximum");
        }
        assert_eq!(backoff.failures(), 20);
    }

    #[test]
    fn backoff_grows_then_resets() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(10), Duration::from_secs(300));
        let first = backoff.next_delay();
        for _ in 0..6 {
            backoff.next_delay();
        }
        let late = backoff.next_delay();
        assert!(first <= Duration::from_secs(12));
        assert!(late >= Duration::from_secs(240));

        backoff.reset();
        assert!(backoff.next_delay() <= Duration::from_secs(12));
    }

    #[test]
    fn local_options_carry_last_will_and_login() {
        let options = local_options(
            "mower_mqtt_bridge",
            "192.168.1.10",
            1883,
            Some(("user", "secret")),
            "mower_mqtt_bridge/status",
            QoS::AtLeastOnce,
            Duration::from_secs(60),
            false,
        )
        .unwrap();

        assert_eq!(options.client_id(), "mower_mqtt_bridge");
        assert_eq!(options.broker_address(), ("192.168.1.10".to_string(), 1883));
        assert_eq!(
            options.credentials(),
            Some(("user".to_string(), "secret".to_string()))
        );
        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "mower_mqtt_bridge/status");
        assert_eq!(&will.message[..], b"offline");
        assert!(will.retain);
    }

    #[test]
    fn local_options_without_login() {
        let options = local_options(
            "mower_mqtt_bridge",
            "localhost",
            1883,
            None,
            "mower_mqtt_bridge/status",
            QoS::AtLeastOnce,
            Duration::from_secs(60),
            false,
        )
        .unwrap();
        assert!(options.credentials().is_none());
    }
}

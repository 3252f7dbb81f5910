//! MQTT relay between the vendor cloud broker and a local broker.
//!
//! This crate provides:
//! - [`CloudSession`] and [`LocalSession`], each driving one broker
//!   connection through an [`EventPump`] and a shared session state machine
//! - Bidirectional relaying through the [`RelaySink`] seam
//! - [`TokenRefreshSupervisor`], which refreshes expired tokens and makes the
//!   cloud session redial with the new credentials

mod broker;
mod cloud;
mod credentials;
mod error;
mod local;
mod message;
mod refresh;
mod relay;
mod state;
mod transport;

#[cfg(test)]
mod tests;

pub use broker::{BrokerClient, BrokerEvent, ConnectRefusal, DisconnectReason};
pub use cloud::CloudSession;
pub use credentials::{cloud_credential_source, cloud_username, CloudConnectParams};
pub use error::{RelayError, RelayResult};
pub use local::{LocalSession, AVAILABILITY_OFFLINE, AVAILABILITY_ONLINE};
pub use message::{qos_level, RelayMessage, STATUS_POLL_PAYLOAD};
pub use refresh::TokenRefreshSupervisor;
pub use relay::{DiscoveryAnnouncer, Reauthenticate, RelaySink, SessionSettings};
pub use state::{
    ConnectFailures, SessionInput, SessionMachine, SessionMachineState, SessionState,
    SessionStatus,
};
pub use transport::{
    cloud_options, local_options, tls_configuration, CredentialSource, EventPump, PumpCommand,
    ReconnectBackoff, CLOUD_ALPN,
};

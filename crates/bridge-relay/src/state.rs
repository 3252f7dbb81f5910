//! Broker session state machine using rust-fsm.
//!
//! ```text
//!            Dial                ConnAccepted
//! Disconnected ───► Connecting ───────────────► Connected
//!      ▲               │  ▲                        │
//!      │ ConnectFailed │  │ CredentialsReady       │ Reauthenticate
//!      │ TransportError│  │                        ▼
//!      └───────────────┘  └───────────────── Authenticating
//! ```
//!
//! `TransportError` from `Connected` returns to `Disconnected`; `Shutdown`
//! is accepted everywhere.

use parking_lot::Mutex;
use rust_fsm::*;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::watch;
use tracing::debug;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Disconnected)

    Disconnected => {
        Dial => Connecting,
        Reauthenticate => Authenticating,
        TransportError => Disconnected,
        Shutdown => Disconnected
    },
    Connecting => {
        Dial => Connecting,
        ConnAccepted => Connected,
        ConnectFailed => Disconnected,
        TransportError => Disconnected,
        Reauthenticate => Authenticating,
        Shutdown => Disconnected
    },
    Connected => {
        TransportError => Disconnected,
        Reauthenticate => Authenticating,
        Shutdown => Disconnected
    },
    Authenticating => {
        // The pump may redial before the new credentials are announced
        Dial => Authenticating,
        CredentialsReady => Connecting,
        ConnAccepted => Connected,
        ConnectFailed => Authenticating,
        TransportError => Authenticating,
        Shutdown => Disconnected
    }
}

pub use session_machine::Input as SessionInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Public view of a session's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Disconnected => SessionState::Disconnected,
            SessionMachineState::Connecting => SessionState::Connecting,
            SessionMachineState::Connected => SessionState::Connected,
            SessionMachineState::Authenticating => SessionState::Authenticating,
        }
    }
}

/// Thread-safe state holder for one broker session.
pub struct SessionStatus {
    name: &'static str,
    machine: Mutex<SessionMachine>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionStatus {
    pub fn new(name: &'static str) -> Self {
        let (state_tx, _rx) = watch::channel(SessionState::Disconnected);
        Self {
            name,
            machine: Mutex::new(SessionMachine::new()),
            state_tx,
        }
    }

    /// Feed an input to the machine. Inputs that make no sense in the
    /// current state are logged and leave it unchanged.
    pub fn apply(&self, input: SessionInput) -> SessionState {
        let mut machine = self.machine.lock();
        let old_state = SessionState::from(machine.state());

        if machine.consume(&input).is_err() {
            debug!(
                session = self.name,
                state = ?old_state,
                input = ?input,
                "Ignoring session input invalid for current state"
            );
            return old_state;
        }

        let new_state = SessionState::from(machine.state());
        if new_state != old_state {
            debug!(
                session = self.name,
                old_state = ?old_state,
                new_state = ?new_state,
                "Session state transition"
            );
            self.state_tx.send_replace(new_state);
        }
        new_state
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Consecutive broker refusals since the last accepted CONNACK.
#[derive(Debug)]
pub struct ConnectFailures {
    count: AtomicU32,
    max: u32,
}

impl ConnectFailures {
    pub fn new(max: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            max: max.max(1),
        }
    }

    /// Count one refusal. True exactly when the limit is reached.
    pub fn record(&self) -> bool {
        self.count.fetch_add(1, Ordering::SeqCst) + 1 == self.max
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

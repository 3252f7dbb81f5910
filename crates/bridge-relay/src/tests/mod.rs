//! Scenario tests for the relay sessions.
//!
//! - `harness.rs`    - Recording broker client, discovery and reauth fakes
//! - `relay.rs`      - Message fidelity in both directions
//! - `discovery.rs`  - Availability and one-shot discovery on the local side
//! - `failures.rs`   - Refusals, dropped connections and shutdown
//! - `supervisor.rs` - Token refresh supervisor and the expiry scenario

mod discovery;
mod relay;
mod supervisor;

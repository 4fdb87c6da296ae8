//! pfg-guardian
//!
//! Per-account guardian for prop-firm accounts.
//!
//! - Applies ticks and fills to the account ledger and re-evaluates
//!   compliance after every event
//! - Drives the ACTIVE / WARNING / FLATTENING / LOCKED / VIOLATED / PASSED
//!   state machine
//! - Runs the emergency stop (cancel all, flatten, confirm) through an
//!   [`ExecutionBridge`] and escalates unconfirmed stops to a fatal alert
//! - Persists a snapshot after every fill and state change and restores it
//!   fail-closed on boot
//! - Sizes signals against the post-event compliance state
//!
//! The state machine itself ([`transition`]) is pure; all IO goes through
//! the ports in [`ports`] and [`store`].

pub mod audit;
mod emergency;
mod error;
mod guardian;
pub mod ports;
mod reload;
mod state;
pub mod store;

pub use audit::{verify_chain, verify_chain_str, ChainCheck, TransitionAudit, TransitionRecord};
pub use emergency::{run_emergency_stop, StopFailure, StopReport};
pub use error::GuardianError;
pub use guardian::{EventOutcome, Guardian, GuardianDeps, GuardianEvent, GuardianSetup};
pub use ports::{
    AlertSink, ExecutionBridge, ExecutionFailure, FatalAlert, FlattenLeg, LogAlerts, OrderAck,
    OrderRequest, RecordingAlerts,
};
pub use reload::{check_snapshot, StateCorruption};
pub use state::{escalate_fatal, transition, Effect, EventKind, Machine, Transition};
pub use store::{JsonFileStore, MemoryStore, SnapshotStore};

//! pfg-coordinator
//!
//! Runs one guardian per configured account, each on its own task, and
//! fans signals, market data and operator commands out to them.
//!
//! - Signals go to every account that trades the symbol and accepts the
//!   strategy tag; each account sizes independently.
//! - Requests to one account are processed in arrival order. Accounts never
//!   share mutable state.
//! - An emergency stop cancels every signal still queued for the account
//!   before it is applied.
//! - Status changes, fatal alerts and routed orders are published on a
//!   broadcast bus for the daemon's event stream.

mod capability;
mod coordinator;
mod error;
mod report;
mod worker;

pub use capability::{CapabilityRegistry, QueuedSignals, SignalProvider};
pub use coordinator::{system_clock, Clock, Coordinator, CoordinatorDeps};
pub use error::CoordinatorError;
pub use report::{
    AccountReport, AggregateReport, AggregateTotals, CoordinatorEvent, RoutedSignal,
    StopConfirmation, StopTarget,
};

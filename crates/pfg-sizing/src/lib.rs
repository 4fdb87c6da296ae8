//! pfg-sizing
//!
//! Position sizing under a compliance risk budget.
//!
//! A sizer turns a [`Signal`](pfg_schemas::Signal) plus the account's
//! equity, risk state and remaining risk budget into a whole number of
//! contracts. Sizers are pure and total: every rejection is a zero-contract
//! [`SizingDecision`] carrying a [`SizingReason`].

mod kelly;
mod registry;
mod types;

pub use kelly::{kelly_fraction, raw_kelly, KellySizer};
pub use registry::{RegistryError, SizerFactory, SizerMeta, SizerRegistry};
pub use types::*;

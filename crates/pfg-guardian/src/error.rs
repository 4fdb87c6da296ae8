use pfg_config::ConfigurationError;
use pfg_ledger::LedgerError;

use crate::reload::StateCorruption;

#[derive(Debug, Clone, PartialEq)]
pub enum GuardianError {
    /// The event could not be applied to the ledger. Nothing changed.
    Ledger(LedgerError),
    Config(ConfigurationError),
    UnknownSizer { name: String },
    /// Operator reset preconditions not met.
    ResetRefused { reason: String },
    StateCorruption(StateCorruption),
}

impl std::fmt::Display for GuardianError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ledger(e) => write!(f, "{e}"),
            Self::Config(e) => write!(f, "{e}"),
            Self::UnknownSizer { name } => write!(f, "no sizer named '{name}' is registered"),
            Self::ResetRefused { reason } => write!(f, "operator reset refused: {reason}"),
            Self::StateCorruption(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for GuardianError {}

impl From<LedgerError> for GuardianError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}

impl From<ConfigurationError> for GuardianError {
    fn from(e: ConfigurationError) -> Self {
        Self::Config(e)
    }
}

impl From<StateCorruption> for GuardianError {
    fn from(e: StateCorruption) -> Self {
        Self::StateCorruption(e)
    }
}

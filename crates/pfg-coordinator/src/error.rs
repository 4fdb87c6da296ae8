use pfg_config::ConfigurationError;
use pfg_guardian::GuardianError;
use pfg_schemas::AccountId;

#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    UnknownAccount { account_id: AccountId },
    /// The account's worker is gone (panicked or shut down). Other accounts
    /// are unaffected.
    AccountUnavailable { account_id: AccountId },
    Guardian { account_id: AccountId, source: GuardianError },
    Config(ConfigurationError),
    UnknownSizer { name: String },
    UnknownProvider { name: String },
    DuplicateProvider { name: String },
    /// Superseded by an emergency stop before it ran.
    Cancelled { account_id: AccountId },
}

impl std::fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAccount { account_id } => write!(f, "unknown account '{account_id}'"),
            Self::AccountUnavailable { account_id } => {
                write!(f, "account '{account_id}' worker is unavailable")
            }
            Self::Guardian { account_id, source } => write!(f, "account '{account_id}': {source}"),
            Self::Config(e) => write!(f, "{e}"),
            Self::UnknownSizer { name } => write!(f, "no sizer named '{name}' is registered"),
            Self::UnknownProvider { name } => {
                write!(f, "no signal provider named '{name}' is registered")
            }
            Self::DuplicateProvider { name } => {
                write!(f, "signal provider '{name}' is already registered")
            }
            Self::Cancelled { account_id } => {
                write!(f, "request for '{account_id}' cancelled by emergency stop")
            }
        }
    }
}

impl std::error::Error for CoordinatorError {}

impl From<ConfigurationError> for CoordinatorError {
    fn from(e: ConfigurationError) -> Self {
        Self::Config(e)
    }
}

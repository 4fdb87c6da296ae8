/// Invalid rule set or account configuration. Raised at load time only;
/// a guardian is never built from a configuration that failed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A percentage is outside (0, 1] or not finite.
    PercentOutOfRange { field: &'static str, value: f64 },
    /// `min_days > max_days`.
    DayWindowInverted { min_days: u32, max_days: u32 },
    MultiplierOutOfRange { account: String, value: f64 },
    ConfidenceOutOfRange { account: String, value: f64 },
    ProbabilityOutOfRange { account: String, value: f64 },
    NonPositivePayoff { account: String, value: f64 },
    ZeroMaxContracts { account: String },
    NonPositiveBalance { account: String, value: f64 },
    EmptyAccountId,
    DuplicateAccount { account: String },
    DuplicateInstrument { symbol: String },
    UnknownInstrument { account: String, symbol: String },
    InvalidInstrument { symbol: String },
    UnknownTimezone { value: String },
    RolloverHourOutOfRange { hour: u32 },
    RetryAttemptsOutOfRange { attempts: u32 },
    NoAccounts,
}

impl std::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PercentOutOfRange { field, value } => {
                write!(f, "CONFIG_INVALID {field}={value}: must be in (0, 1]")
            }
            Self::DayWindowInverted { min_days, max_days } => {
                write!(f, "CONFIG_INVALID min_days={min_days} > max_days={max_days}")
            }
            Self::MultiplierOutOfRange { account, value } => {
                write!(f, "CONFIG_INVALID account={account} aggressiveness={value}: must be in [0.5, 1.5]")
            }
            Self::ConfidenceOutOfRange { account, value } => {
                write!(f, "CONFIG_INVALID account={account} minimum_confidence={value}: must be in [0, 1]")
            }
            Self::ProbabilityOutOfRange { account, value } => {
                write!(f, "CONFIG_INVALID account={account} default_win_probability={value}: must be in (0, 1)")
            }
            Self::NonPositivePayoff { account, value } => {
                write!(f, "CONFIG_INVALID account={account} default_payoff_ratio={value}: must be > 0")
            }
            Self::ZeroMaxContracts { account } => {
                write!(f, "CONFIG_INVALID account={account} max_contracts must be >= 1")
            }
            Self::NonPositiveBalance { account, value } => {
                write!(f, "CONFIG_INVALID account={account} initial_balance={value}: must be > 0")
            }
            Self::EmptyAccountId => write!(f, "CONFIG_INVALID account id must not be empty"),
            Self::DuplicateAccount { account } => {
                write!(f, "CONFIG_INVALID duplicate account id '{account}'")
            }
            Self::DuplicateInstrument { symbol } => {
                write!(f, "CONFIG_INVALID duplicate instrument '{symbol}'")
            }
            Self::UnknownInstrument { account, symbol } => {
                write!(f, "CONFIG_INVALID account={account} trades unknown instrument '{symbol}'")
            }
            Self::InvalidInstrument { symbol } => {
                write!(f, "CONFIG_INVALID instrument '{symbol}': point_value must be a positive finite number")
            }
            Self::UnknownTimezone { value } => {
                write!(f, "CONFIG_INVALID unknown timezone '{value}'")
            }
            Self::RolloverHourOutOfRange { hour } => {
                write!(f, "CONFIG_INVALID rollover hour {hour}: must be in 0..=23")
            }
            Self::RetryAttemptsOutOfRange { attempts } => {
                write!(f, "CONFIG_INVALID emergency_stop.max_attempts={attempts}: must be in 1..=3")
            }
            Self::NoAccounts => write!(f, "CONFIG_INVALID no accounts configured"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

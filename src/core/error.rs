//! Unified error handling for dnslb
//!
//! Every fallible operation in the crate returns [`BalanceResult`], so the
//! balancer, the health monitor and the resolvers share one error type.

use std::fmt;

/// Unified error types for the balancer
#[derive(Debug)]
pub enum BalanceError {
    /// Neither the primary nor the backup tier has an enabled endpoint
    NoServerAvailable(String),

    /// Configuration-related errors
    Configuration(String),

    /// Validation errors
    Validation(String),

    /// Network and I/O errors
    Network(std::io::Error),

    /// DNS resolution failures on the pass-through path
    DnsResolution(String),

    /// Health check failures
    HealthCheck(String),

    /// Internal system errors
    Internal(String),
}

impl fmt::Display for BalanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceError::NoServerAvailable(domain) => {
                write!(f, "No server available for domain {domain}")
            }
            BalanceError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            BalanceError::Validation(msg) => write!(f, "Validation error: {msg}"),
            BalanceError::Network(err) => write!(f, "Network error: {err}"),
            BalanceError::DnsResolution(msg) => write!(f, "DNS resolution failed: {msg}"),
            BalanceError::HealthCheck(msg) => write!(f, "Health check failed: {msg}"),
            BalanceError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for BalanceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BalanceError::Network(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BalanceError {
    fn from(err: std::io::Error) -> Self {
        BalanceError::Network(err)
    }
}

impl BalanceError {
    /// Whether this error means the pool had nothing to hand out.
    pub fn is_no_server_available(&self) -> bool {
        matches!(self, BalanceError::NoServerAvailable(_))
    }
}

/// Result type alias for balancer operations
pub type BalanceResult<T> = std::result::Result<T, BalanceError>;

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::BalanceError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::BalanceError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::core::BalanceError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::BalanceError::Internal(format!($fmt, $($arg)*))
    };
}

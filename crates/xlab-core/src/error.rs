//! Error type shared by the xlab library crates.
//!
//! `XlabError` consolidates the failures that can happen while reaching an
//! instrument and talking to it:
//!
//! - **Lookup errors** (`BackendNotKnown`, `InvalidInterfaceId`, `NoMatch`,
//!   `MultipleMatches`, `NoDriver`, `MultipleDrivers`): raised by the registry
//!   when an interface id or identity string cannot be resolved to exactly one
//!   interface or driver.
//! - **Parameter errors** (`InvalidParameter`): a value was rejected before
//!   anything was sent to the instrument.
//! - **Communication errors** (`Timeout`, `Protocol`, `Io`): the instrument did
//!   not answer in time, answered something unexpected, or the transport
//!   failed.
//! - **Availability errors** (`Unsupported`, `NotAvailable`): the interface
//!   cannot perform the operation, or the backend was not compiled in / its
//!   runtime is missing.
//!
//! The binary and the experiment callbacks wrap these in `anyhow` for context.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type Result<T> = std::result::Result<T, XlabError>;

/// Primary error type of the xlab library crates.
#[derive(Error, Debug)]
pub enum XlabError {
    /// The backend part of an interface id is not registered.
    #[error("Backend '{0}' not known")]
    BackendNotKnown(String),

    /// The interface id has no `backend:resource` form.
    #[error("Invalid interface id '{0}': expected '<backend>:<resource>'")]
    InvalidInterfaceId(String),

    /// No interface id matched a search pattern.
    #[error("No instrument was found to match '{0}'")]
    NoMatch(String),

    /// Several interface ids matched a search pattern.
    #[error("Multiple instruments were found to match '{pattern}': {matches:?}")]
    MultipleMatches {
        /// The search pattern
        pattern: String,
        /// All matching interface ids
        matches: Vec<String>,
    },

    /// No driver pattern matched the identity of an instrument.
    #[error("No driver found for instrument '{identity}' on interface '{interface}'")]
    NoDriver {
        /// Identity reported by the instrument
        identity: String,
        /// Interface id the identity was read from
        interface: String,
    },

    /// Several driver patterns matched the identity of an instrument.
    #[error(
        "Multiple drivers found for instrument '{identity}' on interface '{interface}': {drivers:?}"
    )]
    MultipleDrivers {
        /// Identity reported by the instrument
        identity: String,
        /// Interface id the identity was read from
        interface: String,
        /// Driver types whose pattern matched
        drivers: Vec<String>,
    },

    /// A parameter was rejected before it was sent.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The instrument did not answer in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The instrument answered something that could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The interface cannot perform the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A backend or runtime library is not available on this system.
    #[error("Not available: {0}")]
    NotAvailable(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A search or driver pattern is not a valid regular expression.
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),
}

impl XlabError {
    /// Shorthand for [`XlabError::InvalidParameter`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    /// Shorthand for [`XlabError::Protocol`].
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// True for errors that a retry could plausibly clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_matches_lists_candidates() {
        let err = XlabError::MultipleMatches {
            pattern: "visa:.*".into(),
            matches: vec!["visa:A".into(), "visa:B".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("visa:.*"));
        assert!(msg.contains("visa:A"));
        assert!(msg.contains("visa:B"));
    }

    #[test]
    fn transient_classification() {
        assert!(XlabError::Timeout("t".into()).is_transient());
        assert!(!XlabError::invalid("bad").is_transient());
        let io: XlabError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(io.is_transient());
    }
}

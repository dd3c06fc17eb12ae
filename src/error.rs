//! Custom error types for the crate.
//!
//! This module defines the primary error type, `DaqError`, used across the link,
//! buffering and register layers. Using the `thiserror` crate, it provides a
//! centralized and consistent way to describe what went wrong, from transport
//! failures to register layout mistakes.
//!
//! ## Error Hierarchy
//!
//! - **`Transport`**: opening, closing or writing the serial link failed. Reported, the
//!   operation returns failure, the reader keeps running.
//! - **`ProtocolParse`**: a telemetry line could not be parsed. Carries the raw line and
//!   the [`TelemetryParseError`] cause. The pipeline continues.
//! - **`Device`**: the device sent an explicit error line (ending in `!`).
//! - **`Timeout`**: a command or connection wait exceeded its bound.
//! - **`RegisterLayout`**: a multi-word register type has an odd word length. This is a
//!   construction-time failure of the register map and must not be swallowed.
//! - **`Config`** / **`Configuration`**: loading or validating [`crate::config::AppConfig`].
//!
//! Only construction and configuration errors are returned to callers as `Err`.
//! Runtime errors on the link are published as events (see [`crate::events`]).

use std::num::{ParseFloatError, ParseIntError};
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Why a telemetry line was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryParseError {
    /// No `:` between code and value
    #[error("missing ':' delimiter")]
    MissingDelimiter,

    /// Code is not a hex byte
    #[error("invalid channel code '{text}': {source}")]
    BadChannel {
        /// Text before the delimiter
        text: String,
        /// Integer parser error
        #[source]
        source: ParseIntError,
    },

    /// Value is not a float
    #[error("invalid value '{text}': {source}")]
    BadValue {
        /// Text after the delimiter
        text: String,
        /// Float parser error
        #[source]
        source: ParseFloatError,
    },
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Loading or merging the configuration failed
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A configuration value is out of range
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Opening, reading or writing the link failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// A telemetry line did not parse
    #[error("Malformed telemetry line '{line}': {source}")]
    ProtocolParse {
        /// The line as received
        line: String,
        /// Why it was rejected
        #[source]
        source: TelemetryParseError,
    },

    /// The device sent an error line
    #[error("Device reported error: {0}")]
    Device(String),

    /// A wait ran past its bound
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// What was being waited for
        operation: &'static str,
        /// The bound that elapsed
        timeout: Duration,
    },

    /// Multi-word register types must span an even number of words.
    #[error("Register '{name}' spans {words} words; multi-word registers need an even, non-zero length")]
    RegisterLayout {
        /// Register name
        name: String,
        /// Requested length
        words: u16,
    },

    /// No register with that name in the namespace
    #[error("Register '{0}' not found")]
    RegisterNotFound(String),

    /// Word data does not fit the register's type
    #[error("Register buffer has {actual} bytes, type needs {expected}")]
    RegisterSize {
        /// Bytes the type needs
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// Value of the wrong type for a register
    #[error("Register '{name}' holds {expected}, got {actual}")]
    RegisterType {
        /// Register name
        name: String,
        /// The register's type
        expected: String,
        /// Type of the rejected value
        actual: String,
    },

    /// Array command longer than the count field allows
    #[error("Command payload has {len} elements, the wire format allows at most {max}")]
    CommandPayload {
        /// Elements supplied
        len: usize,
        /// Largest count the wire format can carry
        max: usize,
    },

    /// A channel expression failed to parse or evaluate
    #[error("Invalid channel expression '{expression}': {message}")]
    Expression {
        /// Source text of the expression
        expression: String,
        /// Evaluator message
        message: String,
    },

    /// The crate was built without the `serial` feature
    #[error("Serial support not enabled. Rebuild with --features serial")]
    SerialFeatureDisabled,
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether the link can keep running after this error.
    ///
    /// Layout and configuration problems are fatal; everything that happens on a live
    /// link is reported and survived.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DaqError::Transport(_)
            | DaqError::ProtocolParse { .. }
            | DaqError::Device(_)
            | DaqError::Timeout { .. }
            | DaqError::Io(_) => true,
            DaqError::Config(_)
            | DaqError::Configuration(_)
            | DaqError::RegisterLayout { .. }
            | DaqError::RegisterNotFound(_)
            | DaqError::RegisterSize { .. }
            | DaqError::RegisterType { .. }
            | DaqError::CommandPayload { .. }
            | DaqError::Expression { .. }
            | DaqError::SerialFeatureDisabled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_keeps_raw_line() {
        let source = "zz".parse::<u8>().unwrap_err();
        let err = DaqError::ProtocolParse {
            line: "zz:1.0".into(),
            source: TelemetryParseError::BadChannel {
                text: "zz".into(),
                source,
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("zz:1.0"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn layout_errors_are_fatal() {
        let err = DaqError::RegisterLayout {
            name: "BLOB".into(),
            words: 3,
        };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("spans 3 words"));
    }

    #[test]
    fn timeout_message_names_operation() {
        let err = DaqError::Timeout {
            operation: "command completion",
            timeout: Duration::from_millis(250),
        };
        assert_eq!(
            err.to_string(),
            "command completion timed out after 250ms"
        );
    }
}

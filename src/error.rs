//! Custom error types for the controller client.
//!
//! `BtcError` is the single error type of the library. It consolidates the
//! three families of failures that can occur while talking to a Büchi
//! temperature controller:
//!
//! - **Transport errors** (`PortOpen`, `Io`, `Timeout`, `UnexpectedEof`): the
//!   serial link could not be opened, written to, or read from. These are
//!   fatal to the current operation and are never retried automatically.
//! - **Protocol errors** (`Protocol`, `Status`): the controller answered, but
//!   the payload was malformed or reported an error state.
//! - **Usage errors** (`ReadOnly`, `InvalidValue`, `InvalidCommand`,
//!   `UnknownParameter`): rejected locally before anything reaches the wire.
//!
//! Configuration problems surface through `Config`, log file problems
//! through `Csv`. By using `#[from]`,
//! `BtcError` can be created from the underlying error types with `?`.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, BtcError>;

/// Errors raised by the transport, the device facade and the sampler.
#[derive(Error, Debug)]
pub enum BtcError {
    /// Layered configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but holds semantically invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The serial port could not be opened.
    #[error("Failed to open serial port '{port}': {reason}")]
    PortOpen {
        /// Port identifier as given by the caller.
        port: String,
        /// Message from the serial backend.
        reason: String,
    },

    /// Write, flush or read on the underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No complete response line arrived in time.
    #[error("Serial read timeout after {0:?}")]
    Timeout(Duration),

    /// The stream closed while a response was expected.
    #[error("Unexpected EOF from serial port")]
    UnexpectedEof,

    /// A response was received but could not be interpreted.
    #[error("Malformed response to '{command}': {reason}")]
    Protocol {
        /// Command that elicited the response.
        command: String,
        /// What was wrong with the payload.
        reason: String,
    },

    /// The controller's `status` query reported an error message.
    #[error("Controller reported an error status: {0}")]
    Status(String),

    /// A set was attempted on a get-only parameter.
    #[error("Parameter '{0}' is read-only")]
    ReadOnly(&'static str),

    /// A value of the wrong kind or outside the documented range.
    #[error("Invalid value for '{parameter}': {reason}")]
    InvalidValue {
        /// Property name of the parameter.
        parameter: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The transfer sequence would contain forbidden bytes.
    #[error("Invalid transfer sequence: {0}")]
    InvalidCommand(String),

    /// A friendly name did not resolve to any parameter.
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    /// The CSV log could not be written.
    #[error("Log file error: {0}")]
    Csv(#[from] csv::Error),

    /// The sampler was started from a state other than idle.
    #[error("Sampler cannot start: {0}")]
    InvalidState(String),

    /// Functionality compiled out via feature flags.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl BtcError {
    /// True for failures of the serial link itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BtcError::PortOpen { .. }
                | BtcError::Io(_)
                | BtcError::Timeout(_)
                | BtcError::UnexpectedEof
        )
    }

    /// True when the controller answered with something unusable.
    pub fn is_protocol(&self) -> bool {
        matches!(self, BtcError::Protocol { .. } | BtcError::Status(_))
    }
}

impl From<figment::Error> for BtcError {
    fn from(err: figment::Error) -> Self {
        BtcError::Config(Box::new(err))
    }
}

//! Error types for shell supervision

use thiserror::Error;

use crate::supervisor::SupervisorState;

/// Unified error type for the supervisor and the command runner
#[derive(Error, Debug)]
pub enum Error {
    /// The launch configuration violates one of its invariants
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected
        reason: String,
    },

    /// The interpreter process could not be created
    #[error("failed to start interpreter `{program}`: {source}")]
    Startup {
        /// The interpreter program that failed to start
        program: String,
        /// The underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// An operation was attempted in a state that forbids it
    #[error("cannot {operation} while the supervisor is {state}")]
    InvalidState {
        /// The rejected operation
        operation: &'static str,
        /// The state the supervisor was in
        state: SupervisorState,
    },

    /// An event handler panicked while processing a notification
    #[error("{event} handler panicked: {message}")]
    Invocation {
        /// The event being delivered when the handler failed
        event: &'static str,
        /// The panic payload, if it was a string
        message: String,
    },

    /// Writing a command to the interpreter's stdin failed
    #[error("failed to write command to stdin: {0}")]
    StdinWrite(#[source] std::io::Error),

    /// Reading one of the interpreter's output streams failed
    #[error("failed to read {stream}: {source}")]
    StreamRead {
        /// Which stream failed
        stream: &'static str,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: &'static str, state: SupervisorState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Build an invocation error from a caught panic payload
    pub(crate) fn from_panic(event: &'static str, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Invocation { event, message }
    }

    /// Returns true for [`Error::InvalidState`]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

//! Events raised by the supervisor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::process::ExitStatus;

/// An event observed on the supervised interpreter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellEvent {
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The type of event
    pub kind: ShellEventKind,
    /// The line, command text or fault message carried by the event
    pub data: Option<String>,
}

impl ShellEvent {
    /// Create a new event without data
    pub fn new(kind: ShellEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            data: None,
        }
    }

    /// Create a new event with data
    pub fn new_with_data(kind: ShellEventKind, data: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            data: Some(data.into()),
        }
    }

    /// The carried data, or an empty string
    pub fn text(&self) -> &str {
        self.data.as_deref().unwrap_or_default()
    }
}

/// Types of supervisor events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShellEventKind {
    /// A line read from stdout
    Output,
    /// A line read from stderr
    Error,
    /// A queued command is about to be written to stdin
    ExecutingCommand,
    /// The interpreter process terminated
    Exited {
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Terminating signal (Unix only)
        signal: Option<i32>,
    },
    /// The supervisor itself hit an error
    Fault,
}

impl ShellEventKind {
    /// Exited kind from a process exit status
    pub fn exited(status: &ExitStatus) -> Self {
        Self::Exited {
            code: status.code,
            signal: status.signal,
        }
    }

    /// Short name, used when reporting handler failures
    pub fn name(&self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::Error => "error",
            Self::ExecutingCommand => "executing_command",
            Self::Exited { .. } => "exited",
            Self::Fault => "fault",
        }
    }
}

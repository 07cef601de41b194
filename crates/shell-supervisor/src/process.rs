//! Process exit status and stop outcomes

use serde::{Deserialize, Serialize};

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (always `None` off Unix)
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Returns true if the process was terminated by a signal
    pub fn terminated_by_signal(&self) -> bool {
        self.signal.is_some()
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
            #[cfg(not(unix))]
            signal: None,
        }
    }
}

/// How a call to `stop` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The interpreter exited on its own within the timeout
    Exited(ExitStatus),
    /// The timeout elapsed and the interpreter was killed
    TimedOut,
    /// The interpreter had never been started
    NotStarted,
    /// The supervisor was already disposed
    AlreadyDisposed,
}

impl StopOutcome {
    /// The exit status, if the interpreter exited on its own
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            Self::Exited(status) => Some(*status),
            _ => None,
        }
    }
}

//! Buffered command runner
//!
//! [`CommandRunner`] wraps one [`ShellSupervisor`] for callers that want
//! "run these commands and give me what they printed" rather than live
//! events. It starts the interpreter on the first command and collects
//! every non-empty stdout and stderr line in arrival order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::config::{Interpreter, ShellConfig};
use crate::error::{Error, Result};
use crate::process::StopOutcome;
use crate::supervisor::{ShellSupervisor, SupervisorState};

/// Default time `stop` waits for the interpreter to exit
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for a [`CommandRunner`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Environment overrides for the interpreter
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Working directory of the interpreter
    pub working_directory: PathBuf,
    /// Interpreter to launch
    #[serde(default)]
    pub interpreter: Interpreter,
    /// Stop the interpreter after every submitted batch
    #[serde(default)]
    pub stop_after_execution: bool,
    /// How long `stop` waits before killing the interpreter
    #[serde(default = "default_stop_timeout", with = "millis")]
    pub stop_timeout: Duration,
}

fn default_stop_timeout() -> Duration {
    DEFAULT_STOP_TIMEOUT
}

mod millis {
    use serde::ser::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis())
            .map_err(|_| S::Error::custom(format!("{value:?} does not fit in u64 milliseconds")))?;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl RunnerSettings {
    /// Settings for the platform interpreter in `working_directory`
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            environment: BTreeMap::new(),
            working_directory: working_directory.into(),
            interpreter: Interpreter::platform_default(),
            stop_after_execution: false,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Stop after every batch of commands
    pub fn with_stop_after_execution(mut self, stop: bool) -> Self {
        self.stop_after_execution = stop;
        self
    }

    /// Use a specific interpreter
    pub fn with_interpreter(mut self, interpreter: Interpreter) -> Self {
        self.interpreter = interpreter;
        self
    }

    /// Override an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Set the stop timeout
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    fn shell_config(&self) -> Result<ShellConfig> {
        ShellConfig::new(&self.working_directory)
            .with_envs(self.environment.clone())
            .with_interpreter(self.interpreter.clone())
    }
}

/// Runs commands in one interpreter and buffers what they print
#[derive(Debug)]
pub struct CommandRunner {
    settings: RunnerSettings,
    supervisor: ShellSupervisor,
    output: Arc<Mutex<Vec<String>>>,
    errors: Arc<Mutex<Vec<String>>>,
    disposed: AtomicBool,
}

impl CommandRunner {
    /// Create a runner; the interpreter starts with the first command
    pub fn new(settings: RunnerSettings) -> Result<Self> {
        let supervisor = ShellSupervisor::new(settings.shell_config()?)?;
        let output = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        {
            let output = output.clone();
            supervisor.on_output(move |line| append(&output, line));
        }
        {
            let errors = errors.clone();
            supervisor.on_error(move |line| append(&errors, line));
        }

        Ok(Self {
            settings,
            supervisor,
            output,
            errors,
            disposed: AtomicBool::new(false),
        })
    }

    /// Run one command
    pub fn execute_command(&self, command: impl Into<String>) -> Result<()> {
        self.execute_commands([command])
    }

    /// Run several commands in order
    pub fn execute_commands<I, S>(&self, commands: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_started()?;
        self.supervisor.execute_commands(commands)?;

        if self.settings.stop_after_execution {
            self.stop();
        }
        Ok(())
    }

    /// Stop the interpreter gracefully and dispose the runner
    pub fn stop(&self) -> StopOutcome {
        let outcome = self.supervisor.stop(self.settings.stop_timeout);
        debug!(?outcome, "command runner stopped");
        self.dispose();
        outcome
    }

    /// Kill the interpreter and dispose the runner
    pub fn abort(&self) {
        self.supervisor.abort();
        self.dispose();
    }

    /// Dispose the runner; buffered output stays readable
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.supervisor.dispose();
        }
    }

    /// Lines printed to stdout so far
    pub fn output(&self) -> Vec<String> {
        snapshot(&self.output)
    }

    /// Lines printed to stderr so far
    pub fn errors(&self) -> Vec<String> {
        snapshot(&self.errors)
    }

    /// Whether the interpreter is running
    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// The underlying supervisor, for event subscriptions
    pub fn supervisor(&self) -> &ShellSupervisor {
        &self.supervisor
    }

    fn ensure_started(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::invalid_state(
                "execute a command",
                SupervisorState::Disposed,
            ));
        }
        if self.supervisor.state() != SupervisorState::Created {
            return Ok(());
        }

        match self.supervisor.start() {
            // Another caller started it between the check and the start.
            Err(Error::InvalidState {
                state: SupervisorState::Running | SupervisorState::Stopped,
                ..
            }) => Ok(()),
            other => other,
        }
    }
}

fn append(buffer: &Mutex<Vec<String>>, line: &str) {
    if !line.is_empty() {
        buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}

fn snapshot(buffer: &Mutex<Vec<String>>) -> Vec<String> {
    buffer
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

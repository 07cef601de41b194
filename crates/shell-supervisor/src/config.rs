//! Launch configuration for the supervised interpreter
//!
//! [`ShellConfig`] describes WHAT to launch: which interpreter, in which
//! directory, with which environment overrides, and optionally which
//! script to source as the first command. It is immutable once built and
//! is read once when the supervisor is created.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// How a configured script is handed to the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptInvocation {
    /// Send the bare file name, relying on the interpreter's own lookup
    FileName,
    /// Source the file from the working directory (`. ./name`)
    Source,
}

/// The command interpreter to launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpreter {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    script_extensions: Vec<String>,
    exit_command: String,
    script_invocation: ScriptInvocation,
}

impl Interpreter {
    /// Create a custom interpreter description
    ///
    /// Scripts are invoked by bare file name and `exit` is used as the
    /// graceful-termination command.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            script_extensions: Vec::new(),
            exit_command: "exit".to_string(),
            script_invocation: ScriptInvocation::FileName,
        }
    }

    /// The Windows command prompt
    pub fn cmd() -> Self {
        Self::new("cmd.exe").with_script_extensions(["bat", "cmd", "btm"])
    }

    /// A POSIX shell reading commands from stdin
    pub fn sh() -> Self {
        Self::new("sh")
            .with_script_extensions(["sh"])
            .with_script_invocation(ScriptInvocation::Source)
    }

    /// The native interpreter for the current platform
    pub fn platform_default() -> Self {
        if cfg!(windows) { Self::cmd() } else { Self::sh() }
    }

    /// Add arguments passed to the interpreter at launch
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the script extensions this interpreter accepts (without dots)
    pub fn with_script_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script_extensions = extensions
            .into_iter()
            .map(|ext| ext.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Set the command that asks the interpreter to terminate
    pub fn with_exit_command(mut self, command: impl Into<String>) -> Self {
        self.exit_command = command.into();
        self
    }

    /// Set how scripts are invoked
    pub fn with_script_invocation(mut self, invocation: ScriptInvocation) -> Self {
        self.script_invocation = invocation;
        self
    }

    /// Get the program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the launch arguments
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Get the graceful-termination command
    pub fn exit_command(&self) -> &str {
        &self.exit_command
    }

    /// Check whether `path` has one of the accepted script extensions
    pub fn accepts_script(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.script_extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }

    /// The command line that runs the script `file_name`
    pub fn script_command(&self, file_name: &str) -> String {
        match self.script_invocation {
            ScriptInvocation::FileName => file_name.to_string(),
            ScriptInvocation::Source => format!(". ./{file_name}"),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// Immutable description of how to launch the interpreter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellConfig {
    #[serde(default)]
    script_path: Option<PathBuf>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    working_directory: PathBuf,
    #[serde(default)]
    interpreter: Interpreter,
}

impl ShellConfig {
    /// Launch the platform interpreter in `working_directory`
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            script_path: None,
            environment: BTreeMap::new(),
            working_directory: working_directory.into(),
            interpreter: Interpreter::platform_default(),
        }
    }

    /// Launch the platform interpreter and run `script` first
    ///
    /// The working directory becomes the script's directory.
    pub fn from_script(script: impl Into<PathBuf>) -> Result<Self> {
        Self::from_script_with(script, Interpreter::platform_default())
    }

    /// Launch `interpreter` and run `script` first
    pub fn from_script_with(script: impl Into<PathBuf>, interpreter: Interpreter) -> Result<Self> {
        let script = script.into();
        let working_directory = script_directory(&script);

        let config = Self {
            script_path: Some(script),
            environment: BTreeMap::new(),
            working_directory,
            interpreter,
        };
        config.validate()?;
        Ok(config)
    }

    /// Replace the interpreter
    ///
    /// Fails if a configured script is not accepted by the new interpreter.
    pub fn with_interpreter(mut self, interpreter: Interpreter) -> Result<Self> {
        self.interpreter = interpreter;
        self.validate()?;
        Ok(self)
    }

    /// Override an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Override several environment variables
    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.environment.insert(key.into(), value.into());
        }
        self
    }

    /// Check the invariants
    ///
    /// Builders already enforce them; this exists for configurations that
    /// were deserialized.
    pub fn validate(&self) -> Result<()> {
        if let Some(script) = &self.script_path {
            if script.file_name().is_none() {
                return Err(Error::invalid_config(format!(
                    "script path `{}` has no file name",
                    script.display()
                )));
            }
            if !self.interpreter.accepts_script(script) {
                return Err(Error::invalid_config(format!(
                    "`{}` is not a script file for `{}`",
                    script.display(),
                    self.interpreter.program()
                )));
            }
            if self.working_directory != script_directory(script) {
                return Err(Error::invalid_config(format!(
                    "working directory `{}` is not the directory of script `{}`",
                    self.working_directory.display(),
                    script.display()
                )));
            }
        }

        if self.working_directory.as_os_str().is_empty() {
            return Err(Error::invalid_config("working directory must not be empty"));
        }

        if self.interpreter.program().is_empty() {
            return Err(Error::invalid_config("interpreter program must not be empty"));
        }

        Ok(())
    }

    /// Get the script path
    pub fn script_path(&self) -> Option<&Path> {
        self.script_path.as_deref()
    }

    /// Get the environment overrides
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Get the working directory
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Get the interpreter
    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// The first command to send, if a script is configured
    pub fn startup_command(&self) -> Option<String> {
        let file_name = self.script_path.as_deref()?.file_name()?;
        Some(self.interpreter.script_command(&file_name.to_string_lossy()))
    }
}

/// The directory a script runs from: its parent, or `.` for a bare name
fn script_directory(script: &Path) -> PathBuf {
    match script.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

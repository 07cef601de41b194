//! Supervision of a long-lived interactive shell process
//!
//! This crate starts one persistent command interpreter, feeds it commands
//! from any number of producers, and fans its stdout and stderr out to
//! observers, with orderly startup, submission and shutdown under
//! concurrent access.
//!
//! - [`ShellSupervisor`] owns the process and its worker threads.
//! - [`CommandRunner`] buffers output for run-and-collect callers.
//! - [`ChannelQueue`] is the per-direction queue both are built on.
//!
//! ```no_run
//! use shell_supervisor::{ShellConfig, ShellSupervisor};
//! use std::time::Duration;
//!
//! # fn main() -> shell_supervisor::Result<()> {
//! let supervisor = ShellSupervisor::new(ShellConfig::new("/tmp"))?;
//! supervisor.on_output(|line| println!("{line}"));
//! supervisor.start()?;
//! supervisor.execute_command("echo hello")?;
//! supervisor.stop(Duration::from_secs(5));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod event;
mod observer;
pub mod process;
pub mod queue;
pub mod runner;
mod stdin;
pub mod supervisor;
mod worker;

pub use config::{Interpreter, ScriptInvocation, ShellConfig};
pub use error::{Error, Result};
pub use event::{ShellEvent, ShellEventKind};
pub use process::{ExitStatus, StopOutcome};
pub use queue::ChannelQueue;
pub use runner::{CommandRunner, RunnerSettings};
pub use supervisor::{ShellSupervisor, SupervisorState};

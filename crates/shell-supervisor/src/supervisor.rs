//! The interpreter process supervisor
//!
//! [`ShellSupervisor`] owns one interpreter process and the three queues
//! that carry traffic to and from it. Callers submit commands with
//! [`ShellSupervisor::execute_command`]; worker threads write them to the
//! interpreter's stdin and turn its stdout/stderr into events.
//!
//! ```text
//! Created --start()--> Running --exit / stop()--> Stopped
//!    |                    |                          |
//!    +--------------------+-- dispose()/abort() -----+--> Disposed
//! ```
//!
//! Dropping the supervisor disposes it, killing the interpreter if it is
//! still alive.

use async_channel::Receiver;
use async_process::{Child, Stdio};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ShellConfig;
use crate::error::{Error, Result};
use crate::event::{ShellEvent, ShellEventKind};
use crate::observer::Observers;
use crate::process::{ExitStatus, StopOutcome};
use crate::queue::ChannelQueue;
use crate::stdin::CommandWriter;
use crate::worker::{self, Stream};

/// Lifecycle state of a supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Constructed, process not yet spawned
    Created,
    /// Process spawned and accepting commands
    Running,
    /// Process has exited; no further commands are accepted
    Stopped,
    /// Torn down; terminal
    Disposed,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// State shared between the supervisor and its worker threads
pub(crate) struct Shared {
    state: Mutex<SupervisorState>,
    alive: AtomicBool,
    exit_status: Mutex<Option<ExitStatus>>,
    pub(crate) observers: Observers,
    pub(crate) commands: ChannelQueue<String>,
    pub(crate) stdout: ChannelQueue<String>,
    pub(crate) stderr: ChannelQueue<String>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(SupervisorState::Created),
            alive: AtomicBool::new(false),
            exit_status: Mutex::new(None),
            observers: Observers::default(),
            commands: ChannelQueue::new(),
            stdout: ChannelQueue::new(),
            stderr: ChannelQueue::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether workers should keep delivering
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Move `Running` to `Stopped`; returns whether the state was `Running`
    pub(crate) fn mark_stopped(&self) -> bool {
        let mut state = self.lock_state();
        if *state == SupervisorState::Running {
            *state = SupervisorState::Stopped;
            true
        } else {
            false
        }
    }

    pub(crate) fn record_exit(&self, status: ExitStatus) {
        *self
            .exit_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(status);
    }
}

/// Resources that only exist while the process does
struct ProcessParts {
    child: Child,
    pid: u32,
    /// Closed when the exit monitor has observed termination
    exited: Receiver<()>,
    /// Closed when both output pumps have finished
    drained: Receiver<()>,
}

/// Supervisor for one long-lived interpreter process
pub struct ShellSupervisor {
    config: ShellConfig,
    shared: Arc<Shared>,
    process: Mutex<Option<ProcessParts>>,
}

impl ShellSupervisor {
    /// Create a supervisor for `config`; nothing is spawned yet
    pub fn new(config: ShellConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shared: Arc::new(Shared::new()),
            process: Mutex::new(None),
        })
    }

    /// The configuration this supervisor launches
    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> SupervisorState {
        *self.shared.lock_state()
    }

    /// Whether commands are currently accepted
    pub fn is_running(&self) -> bool {
        self.state() == SupervisorState::Running && self.shared.is_alive()
    }

    /// OS process id of the interpreter, until disposal
    pub fn pid(&self) -> Option<u32> {
        self.lock_process().as_ref().map(|parts| parts.pid)
    }

    /// Exit status, once the interpreter has terminated
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self
            .shared
            .exit_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the interpreter and start the worker threads
    ///
    /// If a script is configured, its invocation is queued before any
    /// other command can be. On failure the supervisor is disposed and
    /// the error returned.
    pub fn start(&self) -> Result<()> {
        let mut state = self.shared.lock_state();
        if *state != SupervisorState::Created {
            return Err(Error::invalid_state("start", *state));
        }

        match self.launch() {
            Ok(()) => {
                *state = SupervisorState::Running;
                if let Some(command) = self.config.startup_command() {
                    debug!(command = %command, "queueing startup script");
                    self.shared.commands.enqueue(command);
                }
                Ok(())
            }
            Err(err) => {
                drop(state);
                error!(
                    program = self.config.interpreter().program(),
                    error = %err,
                    "failed to start interpreter"
                );
                self.dispose();
                Err(err)
            }
        }
    }

    fn launch(&self) -> Result<()> {
        let interpreter = self.config.interpreter();
        let program = interpreter.program().to_string();

        let mut command = async_process::Command::new(&program);
        command
            .args(interpreter.args())
            .envs(self.config.environment())
            .current_dir(self.config.working_directory())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            use async_process::windows::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = command.spawn().map_err(|source| Error::Startup {
            program: program.clone(),
            source,
        })?;

        let pid = child.id();
        let missing = |stream: &str| Error::Startup {
            program: program.clone(),
            source: std::io::Error::other(format!("{stream} was not captured")),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        let status = child.status();

        info!(
            pid,
            program = %program,
            working_directory = %self.config.working_directory().display(),
            "interpreter spawned"
        );

        let (exited_tx, exited) = async_channel::bounded::<()>(1);
        let (drained_tx, drained) = async_channel::bounded::<()>(1);

        // Workers check `alive` before delivering, so it is set first.
        self.shared.alive.store(true, Ordering::SeqCst);
        *self.lock_process() = Some(ProcessParts {
            child,
            pid,
            exited,
            drained,
        });

        let shared = self.shared.clone();
        let writer = CommandWriter::new(stdin);
        worker::spawn_worker(worker::DISPATCH_WORKER, async move {
            worker::dispatch_commands(&shared, writer).await;
        })?;

        let shared = self.shared.clone();
        let drained_stdout = drained_tx.clone();
        worker::spawn_worker("shell-stdout", async move {
            futures::join!(
                worker::read_lines(&shared, Stream::Stdout, stdout),
                worker::pump_lines(&shared, Stream::Stdout, drained_stdout),
            );
        })?;

        let shared = self.shared.clone();
        worker::spawn_worker("shell-stderr", async move {
            futures::join!(
                worker::read_lines(&shared, Stream::Stderr, stderr),
                worker::pump_lines(&shared, Stream::Stderr, drained_tx),
            );
        })?;

        let shared = self.shared.clone();
        worker::spawn_worker(worker::EXIT_WORKER, async move {
            worker::watch_exit(&shared, status, pid, exited_tx).await;
        })?;

        Ok(())
    }

    /// Queue `command` for the interpreter
    ///
    /// Fails with [`Error::InvalidState`] unless the supervisor is running.
    pub fn execute_command(&self, command: impl Into<String>) -> Result<()> {
        let state = self.shared.lock_state();
        if *state != SupervisorState::Running {
            return Err(Error::invalid_state("execute a command", *state));
        }

        let command = command.into();
        if !self.shared.commands.enqueue(command) {
            debug!("command queue closed; command dropped");
        }
        Ok(())
    }

    /// Queue several commands in order, stopping at the first rejection
    pub fn execute_commands<I, S>(&self, commands: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for command in commands {
            self.execute_command(command)?;
        }
        Ok(())
    }

    /// Ask the interpreter to exit, wait up to `timeout`, then dispose
    ///
    /// Within the same deadline, output written before the exit is
    /// delivered before this returns. If the interpreter does not exit in
    /// time it is killed; this never blocks much past `timeout`. A timeout
    /// too large to form a deadline waits without one.
    ///
    /// Called from an event handler, `stop` does not wait for the worker
    /// it is running on: the output still queued on that worker is
    /// discarded. From an `on_exited` handler the recorded status is
    /// returned immediately; from an `on_executing_command` handler a
    /// running interpreter is killed.
    pub fn stop(&self, timeout: Duration) -> StopOutcome {
        let deadline = Instant::now().checked_add(timeout);
        let worker = worker::current_worker();

        match self.state() {
            SupervisorState::Disposed => return StopOutcome::AlreadyDisposed,
            SupervisorState::Created => {
                self.dispose();
                return StopOutcome::NotStarted;
            }
            SupervisorState::Running => {
                let exit_command = self.config.interpreter().exit_command().to_string();
                if let Err(err) = self.execute_command(exit_command) {
                    debug!(error = %err, "interpreter stopped before exit command was queued");
                }
            }
            SupervisorState::Stopped => {}
        }

        let signals = self
            .lock_process()
            .as_ref()
            .map(|parts| (parts.exited.clone(), parts.drained.clone()));

        let outcome = match signals {
            Some((exited, drained)) => {
                let exited_in_time = match worker {
                    // The exit watcher records the status before raising `Exited`.
                    Some(worker::EXIT_WORKER) => true,
                    // The exit command cannot be written while this handler runs.
                    Some(worker::DISPATCH_WORKER) => self.exit_status().is_some(),
                    _ => smol::block_on(closed_before(exited, deadline)),
                };
                if exited_in_time {
                    if worker.is_some() {
                        debug!("stop called from a handler; not waiting for output");
                    } else if !smol::block_on(closed_before(drained, deadline)) {
                        warn!("output still pending at stop deadline");
                    }
                    StopOutcome::Exited(self.exit_status().unwrap_or(ExitStatus {
                        code: None,
                        signal: None,
                    }))
                } else {
                    warn!(?timeout, "interpreter ignored exit command; killing");
                    StopOutcome::TimedOut
                }
            }
            None => StopOutcome::AlreadyDisposed,
        };

        self.dispose();
        outcome
    }

    /// Dispose immediately, without asking the interpreter to exit
    pub fn abort(&self) {
        self.dispose();
    }

    /// Tear everything down; idempotent
    ///
    /// Commands still queued are discarded. Only the first call does any
    /// work, including when several threads race here. Once it returns no
    /// handler is running or will run again, except that a call made from
    /// a handler does not wait for handlers on other workers.
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.shared.lock_state(), SupervisorState::Disposed);
        if previous == SupervisorState::Disposed {
            // Still wait out handlers the first caller may be waiting on.
            self.shared.observers.close();
            return;
        }

        self.shared.alive.store(false, Ordering::SeqCst);
        self.shared.commands.close();
        self.shared.stdout.close();
        self.shared.stderr.close();

        let parts = self.lock_process().take();
        if let Some(mut parts) = parts {
            match parts.child.try_status() {
                Ok(Some(_)) => {}
                _ => {
                    if let Err(e) = parts.child.kill() {
                        warn!(pid = parts.pid, error = %e, "failed to kill interpreter");
                    }
                }
            }
            info!(pid = parts.pid, previous = %previous, "supervisor disposed");
        } else {
            debug!(previous = %previous, "supervisor disposed without a process");
        }

        self.shared.observers.close();
    }

    /// Register a handler for every event
    pub fn subscribe(&self, handler: impl Fn(&ShellEvent) + Send + Sync + 'static) {
        self.shared.observers.subscribe(handler);
    }

    /// Register a handler for stdout lines
    pub fn on_output(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.subscribe(move |event| {
            if event.kind == ShellEventKind::Output {
                handler(event.text());
            }
        });
    }

    /// Register a handler for stderr lines
    pub fn on_error(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.subscribe(move |event| {
            if event.kind == ShellEventKind::Error {
                handler(event.text());
            }
        });
    }

    /// Register a handler called just before each command is written
    pub fn on_executing_command(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.subscribe(move |event| {
            if event.kind == ShellEventKind::ExecutingCommand {
                handler(event.text());
            }
        });
    }

    /// Register a handler for interpreter termination
    pub fn on_exited(&self, handler: impl Fn(ExitStatus) + Send + Sync + 'static) {
        self.subscribe(move |event| {
            if let ShellEventKind::Exited { code, signal } = event.kind {
                handler(ExitStatus { code, signal });
            }
        });
    }

    /// Register a handler for the supervisor's own errors
    pub fn on_fault(&self, handler: impl Fn(&Error) + Send + Sync + 'static) {
        self.shared.observers.on_fault(handler);
    }

    /// Receive every event through a channel
    ///
    /// The channel closes when the supervisor is disposed.
    pub fn events(&self) -> Receiver<ShellEvent> {
        let (tx, rx) = async_channel::unbounded();
        self.subscribe(move |event| {
            let _ = tx.try_send(event.clone());
        });
        rx
    }

    fn lock_process(&self) -> MutexGuard<'_, Option<ProcessParts>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ShellSupervisor {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ShellSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellSupervisor")
            .field("program", &self.config.interpreter().program())
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}

/// Whether `signal` closes before `deadline`; without one, waits for it
async fn closed_before(signal: Receiver<()>, deadline: Option<Instant>) -> bool {
    let closed = async {
        while signal.recv().await.is_ok() {}
        true
    };
    let expired = async {
        deadline.map_or_else(smol::Timer::never, smol::Timer::at).await;
        false
    };
    smol::future::or(closed, expired).await
}

//! Common test utilities

#![allow(dead_code)]

use shell_supervisor::{Interpreter, ShellConfig, ShellSupervisor};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How long tests wait for asynchronous delivery before failing
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Thread-safe line collector for observer callbacks
#[derive(Clone, Default)]
pub struct Lines(Arc<Mutex<Vec<String>>>);

impl Lines {
    /// Record a line
    pub fn push(&self, line: &str) {
        self.0.lock().unwrap().push(line.to_string());
    }

    /// Snapshot of everything recorded
    pub fn get(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Number of recorded lines
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// Wait until at least `count` lines were recorded
    pub fn wait_for(&self, count: usize) -> Vec<String> {
        assert!(
            wait_until(DELIVERY_TIMEOUT, || self.len() >= count),
            "expected {count} lines, got {:?}",
            self.get()
        );
        self.get()
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// A `sh` supervisor in `dir` with its stdout and stderr collected
pub fn sh_supervisor(dir: &Path) -> (ShellSupervisor, Lines, Lines) {
    let config = ShellConfig::new(dir)
        .with_interpreter(Interpreter::sh())
        .unwrap();
    collecting(config)
}

/// A supervisor for `config` with its stdout and stderr collected
pub fn collecting(config: ShellConfig) -> (ShellSupervisor, Lines, Lines) {
    let supervisor = ShellSupervisor::new(config).unwrap();
    let output = Lines::default();
    let errors = Lines::default();
    {
        let output = output.clone();
        supervisor.on_output(move |line| output.push(line));
    }
    {
        let errors = errors.clone();
        supervisor.on_error(move |line| errors.push(line));
    }
    (supervisor, output, errors)
}

/// Whether a process with `pid` still exists
pub fn is_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

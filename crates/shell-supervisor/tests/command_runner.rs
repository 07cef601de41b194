//! Tests for the buffered command runner
#![cfg(unix)]

mod common;

use common::{DELIVERY_TIMEOUT, wait_until};
use shell_supervisor::{CommandRunner, Interpreter, RunnerSettings, StopOutcome};
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn sh_settings(dir: &std::path::Path) -> RunnerSettings {
    RunnerSettings::new(dir)
        .with_interpreter(Interpreter::sh())
        .with_stop_timeout(DELIVERY_TIMEOUT)
}

#[test]
fn test_stop_after_execution_collects_everything() {
    let dir = tempfile::tempdir().unwrap();
    let runner =
        CommandRunner::new(sh_settings(dir.path()).with_stop_after_execution(true)).unwrap();

    runner
        .execute_commands(["echo one", "echo", "echo two", "echo oops >&2"])
        .unwrap();

    // Empty lines are not buffered.
    assert_eq!(runner.output(), vec!["one", "two"]);
    assert_eq!(runner.errors(), vec!["oops"]);
    assert!(!runner.is_running());

    let err = runner.execute_command("echo again").unwrap_err();
    assert!(err.is_invalid_state());
}

#[test]
fn test_lazy_start_and_manual_stop() {
    let dir = tempfile::tempdir().unwrap();
    let runner = CommandRunner::new(sh_settings(dir.path()).with_env("RUNNER_VAR", "v1")).unwrap();
    assert!(!runner.is_running());

    runner.execute_command("echo $RUNNER_VAR").unwrap();
    assert!(runner.is_running());

    runner.execute_command("echo second").unwrap();
    assert!(wait_until(DELIVERY_TIMEOUT, || runner.output().len() == 2));
    assert_eq!(runner.output(), vec!["v1", "second"]);

    let outcome = runner.stop();
    assert!(matches!(outcome, StopOutcome::Exited(status) if status.success()));
    assert!(!runner.is_running());
    // Buffers survive disposal.
    assert_eq!(runner.output(), vec!["v1", "second"]);
}

#[test]
fn test_abort_disposes_runner() {
    let dir = tempfile::tempdir().unwrap();
    let runner = CommandRunner::new(sh_settings(dir.path())).unwrap();

    runner.execute_command("sleep 30").unwrap();
    let pid = runner.supervisor().pid().unwrap();

    runner.abort();

    assert!(!runner.is_running());
    assert!(runner.execute_command("echo hi").unwrap_err().is_invalid_state());
    assert!(wait_until(DELIVERY_TIMEOUT, || !common::is_alive(pid)));
}

#[test]
fn test_stop_timeout_applies_to_unresponsive_interpreter() {
    let dir = tempfile::tempdir().unwrap();
    let settings = RunnerSettings::new(dir.path())
        .with_interpreter(Interpreter::new("cat"))
        .with_stop_timeout(Duration::from_millis(200))
        .with_stop_after_execution(true);
    let runner = CommandRunner::new(settings).unwrap();

    let started = std::time::Instant::now();
    runner.execute_command("hello").unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!runner.is_running());
}

#[test]
fn test_concurrent_first_commands_share_one_start() {
    for _ in 0..5 {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(CommandRunner::new(sh_settings(dir.path())).unwrap());
        let barrier = Arc::new(Barrier::new(2));

        let submitters: Vec<_> = ["echo a", "echo b"]
            .into_iter()
            .map(|command| {
                let runner = runner.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    runner.execute_command(command)
                })
            })
            .collect();
        for submitter in submitters {
            submitter.join().unwrap().unwrap();
        }

        assert!(wait_until(DELIVERY_TIMEOUT, || runner.output().len() == 2));
        let mut output = runner.output();
        output.sort();
        assert_eq!(output, vec!["a", "b"]);
        runner.abort();
    }
}

#[test]
fn test_unbounded_stop_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let settings = RunnerSettings::new(dir.path())
        .with_interpreter(Interpreter::sh())
        .with_stop_timeout(Duration::MAX)
        .with_stop_after_execution(true);
    let runner = CommandRunner::new(settings).unwrap();

    runner.execute_command("echo finished").unwrap();

    assert_eq!(runner.output(), vec!["finished"]);
    assert!(!runner.is_running());
}

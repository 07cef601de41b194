//! Ordering and delivery tests for commands, output and events
#![cfg(unix)]

mod common;

use common::{DELIVERY_TIMEOUT, Lines, collecting, sh_supervisor, wait_until};
use shell_supervisor::{Error, Interpreter, ShellConfig, ShellEventKind, StopOutcome};
use std::sync::Arc;

#[test]
fn test_commands_reach_interpreter_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let (supervisor, output, _errors) = sh_supervisor(dir.path());
    supervisor.start().unwrap();

    let expected: Vec<String> = (0..200).map(|i| i.to_string()).collect();
    for i in &expected {
        supervisor.execute_command(format!("echo {i}")).unwrap();
    }

    assert_eq!(output.wait_for(expected.len()), expected);
    supervisor.abort();
}

#[test]
fn test_executing_command_precedes_each_write() {
    let dir = tempfile::tempdir().unwrap();
    let (supervisor, _output, _errors) = sh_supervisor(dir.path());
    let announced = Lines::default();
    {
        let announced = announced.clone();
        supervisor.on_executing_command(move |command| announced.push(command));
    }

    supervisor.start().unwrap();
    supervisor
        .execute_commands(["true", "echo one", "echo two"])
        .unwrap();

    assert_eq!(announced.wait_for(3), vec!["true", "echo one", "echo two"]);
    supervisor.abort();
}

#[test]
fn test_stdout_and_stderr_lines_are_delivered_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let (supervisor, output, errors) = sh_supervisor(dir.path());
    supervisor.start().unwrap();

    supervisor
        .execute_commands([
            "echo '  padded line  '",
            "echo first-error >&2",
            "printf 'a\\nb\\n'",
            "echo second-error >&2",
            "printf 'crlf\\r\\n'",
        ])
        .unwrap();
    supervisor.stop(DELIVERY_TIMEOUT);

    assert_eq!(output.get(), vec!["  padded line  ", "a", "b", "crlf"]);
    assert_eq!(errors.get(), vec!["first-error", "second-error"]);
}

#[test]
fn test_script_invocation_is_first_command() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("build.bat");
    std::fs::write(&script, "@echo off\r\n").unwrap();

    // `cat` echoes stdin back, exposing exactly what was written.
    let interpreter = Interpreter::new("cat").with_script_extensions(["bat", "cmd", "btm"]);
    let config = ShellConfig::from_script_with(&script, interpreter).unwrap();
    assert_eq!(config.working_directory(), dir.path());

    let (supervisor, output, _errors) = collecting(config);
    supervisor.start().unwrap();
    supervisor.execute_command("echo hi").unwrap();

    assert_eq!(output.wait_for(2), vec!["build.bat", "echo hi"]);
    supervisor.abort();
}

#[test]
fn test_sourced_script_environment_persists() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("setup.sh");
    std::fs::write(&script, "SCRIPT_VALUE=42\n").unwrap();

    let config = ShellConfig::from_script_with(&script, Interpreter::sh()).unwrap();
    let (supervisor, output, errors) = collecting(config);
    supervisor.start().unwrap();
    supervisor.execute_command("echo $SCRIPT_VALUE").unwrap();

    let outcome = supervisor.stop(DELIVERY_TIMEOUT);
    assert!(matches!(outcome, StopOutcome::Exited(_)));
    assert_eq!(output.get(), vec!["42"]);
    assert!(errors.get().is_empty(), "unexpected stderr: {:?}", errors.get());
}

#[test]
fn test_back_to_back_commands_precede_later_submission() {
    let dir = tempfile::tempdir().unwrap();
    let (supervisor, output, _errors) = sh_supervisor(dir.path());
    let supervisor = Arc::new(supervisor);
    supervisor.start().unwrap();

    supervisor.execute_command("X=1").unwrap();
    supervisor.execute_command("echo $X").unwrap();

    let other = {
        let supervisor = supervisor.clone();
        std::thread::spawn(move || supervisor.execute_command("echo later"))
    };
    other.join().unwrap().unwrap();

    assert_eq!(output.wait_for(2), vec!["1", "later"]);
    supervisor.abort();
}

#[test]
fn test_panicking_observer_does_not_stop_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let (supervisor, output, _errors) = sh_supervisor(dir.path());
    let faults = Lines::default();

    supervisor.on_output(|line| {
        if line == "boom" {
            panic!("observer cannot handle {line}");
        }
    });
    {
        let faults = faults.clone();
        supervisor.on_fault(move |err| {
            assert!(matches!(err, Error::Invocation { event: "output", .. }));
            faults.push(&err.to_string());
        });
    }

    supervisor.start().unwrap();
    supervisor
        .execute_commands(["echo before", "echo boom", "echo after"])
        .unwrap();

    assert_eq!(output.wait_for(3), vec!["before", "boom", "after"]);
    assert!(wait_until(DELIVERY_TIMEOUT, || faults.len() == 1));
    assert_eq!(
        faults.get(),
        vec!["output handler panicked: observer cannot handle boom"]
    );
    supervisor.abort();
}

#[smol_potat::test]
async fn test_event_channel_sees_every_kind() {
    let dir = tempfile::tempdir().unwrap();
    let (supervisor, _output, _errors) = sh_supervisor(dir.path());
    let events = supervisor.events();

    supervisor.start().unwrap();
    supervisor
        .execute_commands(["echo out", "echo err >&2", "exit 0"])
        .unwrap();

    let mut kinds = Vec::new();
    let seen_all = |kinds: &[ShellEventKind]| {
        kinds.contains(&ShellEventKind::Output)
            && kinds.contains(&ShellEventKind::Error)
            && kinds
                .iter()
                .any(|kind| matches!(kind, ShellEventKind::Exited { .. }))
    };
    let collect = async {
        while let Ok(event) = events.recv().await {
            kinds.push(event.kind);
            if seen_all(&kinds) {
                break;
            }
        }
    };
    let expired = async {
        smol::Timer::after(DELIVERY_TIMEOUT).await;
    };
    smol::future::or(collect, expired).await;

    assert!(seen_all(&kinds), "missing events: {kinds:?}");
    assert!(kinds.contains(&ShellEventKind::ExecutingCommand));
    assert!(kinds.contains(&ShellEventKind::Exited {
        code: Some(0),
        signal: None
    }));

    supervisor.dispose();

    // Disposal unregisters the channel's sender.
    let closed = async {
        while events.recv().await.is_ok() {}
        true
    };
    let expired = async {
        smol::Timer::after(DELIVERY_TIMEOUT).await;
        false
    };
    assert!(smol::future::or(closed, expired).await);
}

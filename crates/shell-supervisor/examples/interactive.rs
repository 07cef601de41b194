//! Interactive shell through a supervisor
//!
//! Lines typed on the terminal are forwarded to a supervised interpreter and
//! its output is printed back. End input (Ctrl+D) to stop.
//!
//! Run with: cargo run -p shell-supervisor --example interactive [SCRIPT]

use anyhow::Result;
use shell_supervisor::{ShellConfig, ShellSupervisor, StopOutcome};
use std::io::BufRead;
use std::time::Duration;
use tracing::{Level, info};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .init();

    let config = match std::env::args().nth(1) {
        Some(script) => ShellConfig::from_script(script)?,
        None => ShellConfig::new(std::env::current_dir()?),
    };

    let supervisor = ShellSupervisor::new(config)?;
    supervisor.on_output(|line| println!("{line}"));
    supervisor.on_error(|line| eprintln!("{line}"));
    supervisor.on_executing_command(|command| info!(command, "executing"));
    supervisor.on_exited(|status| info!(?status, "interpreter exited"));
    supervisor.on_fault(|err| eprintln!("supervisor fault: {err}"));

    supervisor.start()?;
    info!(pid = ?supervisor.pid(), "type commands, Ctrl+D to stop");

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if let Err(err) = supervisor.execute_command(line) {
            eprintln!("{err}");
            break;
        }
    }

    match supervisor.stop(Duration::from_secs(5)) {
        StopOutcome::Exited(status) => info!(?status, "stopped"),
        outcome => info!(?outcome, "stopped"),
    }
    Ok(())
}

//! Worker loops run by the supervisor
//!
//! Every loop has the same shape: wait on its queue, then handle the whole
//! batch in FIFO order while the supervisor is alive. A loop ends when its
//! queue is closed and drained (stream EOF or dispose) or when the
//! supervisor is no longer alive; an empty queue alone never ends it.

use async_channel::Sender;
use futures_lite::io::{AsyncBufReadExt, AsyncRead, BufReader};
use std::cell::Cell;
use std::future::Future;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::event::{ShellEvent, ShellEventKind};
use crate::process::ExitStatus;
use crate::queue::ChannelQueue;
use crate::stdin::CommandWriter;
use crate::supervisor::Shared;

/// Which output stream a reader/pump pair serves
#[derive(Debug, Clone, Copy)]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn name(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }

    fn event_kind(self) -> ShellEventKind {
        match self {
            Self::Stdout => ShellEventKind::Output,
            Self::Stderr => ShellEventKind::Error,
        }
    }

    fn queue(self, shared: &Shared) -> &ChannelQueue<String> {
        match self {
            Self::Stdout => &shared.stdout,
            Self::Stderr => &shared.stderr,
        }
    }
}

/// Name of the thread that writes commands to stdin
pub(crate) const DISPATCH_WORKER: &str = "shell-dispatch";
/// Name of the thread that waits for the interpreter to exit
pub(crate) const EXIT_WORKER: &str = "shell-exit";

thread_local! {
    static CURRENT_WORKER: Cell<Option<&'static str>> = const { Cell::new(None) };
}

/// The worker running on this thread, if any
pub(crate) fn current_worker() -> Option<&'static str> {
    CURRENT_WORKER.get()
}

/// Run `future` to completion on a dedicated, named thread
pub(crate) fn spawn_worker<F>(name: &'static str, future: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            CURRENT_WORKER.set(Some(name));
            smol::block_on(future)
        })
        .map(|_| ())
        .map_err(|source| Error::Startup {
            program: format!("worker thread `{name}`"),
            source,
        })
}

/// Write queued commands to stdin, announcing each one first
pub(crate) async fn dispatch_commands(shared: &Shared, mut writer: CommandWriter) {
    while let Some(batch) = shared.commands.wait_for_items(None).await {
        for command in batch {
            if !shared.is_alive() {
                debug!(command = %command, "discarding undispatched command");
                continue;
            }

            shared.observers.emit(&ShellEvent::new_with_data(
                ShellEventKind::ExecutingCommand,
                command.as_str(),
            ));

            debug!(command = %command, "writing command to stdin");
            if let Err(e) = writer.write_line(&command).await {
                shared.observers.fault(Error::StdinWrite(e));
            }
        }

        if !shared.is_alive() {
            break;
        }
    }

    writer.close();
    debug!("dispatch loop finished");
}

/// Read `source` line by line into the stream's queue
///
/// Only enqueues; delivery happens in [`pump_lines`]. The queue is closed
/// at EOF so the pump can finish once it has drained.
pub(crate) async fn read_lines<R>(shared: &Shared, stream: Stream, source: R)
where
    R: AsyncRead + Unpin,
{
    let queue = stream.queue(shared);
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                // Interpreters may emit non-UTF-8 code-page output.
                let line = String::from_utf8_lossy(&buf).into_owned();
                if !queue.enqueue(line) {
                    break;
                }
            }
            Err(source) => {
                shared.observers.fault(Error::StreamRead {
                    stream: stream.name(),
                    source,
                });
                break;
            }
        }
    }

    queue.close();
    debug!(stream = stream.name(), "reader finished");
}

/// Raise one event per queued line, in arrival order
pub(crate) async fn pump_lines(shared: &Shared, stream: Stream, _drained: Sender<()>) {
    let queue = stream.queue(shared);
    let kind = stream.event_kind();

    while let Some(batch) = queue.wait_for_items(None).await {
        for line in batch {
            if !shared.is_alive() {
                debug!(stream = stream.name(), "supervisor disposed; pump stopping");
                return;
            }
            shared
                .observers
                .emit(&ShellEvent::new_with_data(kind.clone(), line));
        }
    }

    debug!(stream = stream.name(), "pump finished");
}

/// Wait for the interpreter to terminate and publish it
///
/// Dropping `_exited` on return is what `stop` waits for.
pub(crate) async fn watch_exit<F>(shared: &Shared, status: F, pid: u32, _exited: Sender<()>)
where
    F: Future<Output = std::io::Result<std::process::ExitStatus>>,
{
    let status = match status.await {
        Ok(status) => ExitStatus::from(status),
        Err(e) => {
            shared.observers.fault(Error::Io(e));
            shared.mark_stopped();
            return;
        }
    };

    shared.record_exit(status);
    let was_running = shared.mark_stopped();

    info!(
        pid,
        code = ?status.code,
        signal = ?status.signal,
        "interpreter exited"
    );

    // Terminations caused by dispose are not reported.
    if was_running && shared.is_alive() {
        shared
            .observers
            .emit(&ShellEvent::new(ShellEventKind::exited(&status)));
    }
}

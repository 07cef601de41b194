//! Command writer for the interpreter's stdin

use futures::io::AsyncWriteExt;

/// Handle for writing commands to the interpreter's stdin
pub(crate) struct CommandWriter {
    stdin: Option<async_process::ChildStdin>,
}

impl CommandWriter {
    pub(crate) fn new(stdin: async_process::ChildStdin) -> Self {
        Self { stdin: Some(stdin) }
    }

    /// Write one command followed by a newline and flush it
    pub(crate) async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        stdin.write_all(&buf).await?;
        stdin.flush().await
    }

    /// Close stdin by dropping the writer
    pub(crate) fn close(&mut self) {
        self.stdin.take();
    }
}

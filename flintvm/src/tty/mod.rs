//! Console/TTY client.
//!
//! The serial console is a single raw byte stream. Each command is one round
//! trip: write the framed command, read until the end marker or the timeout,
//! return everything in between as one buffered string. Callers must
//! serialize access; the owning instance keeps the client behind a mutex.

mod sentinel;

use crate::host::ConsoleStreams;
use flintvm_shared::{FlintError, FlintResult};
use sentinel::Sentinel;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

const READ_CHUNK: usize = 4096;

/// Buffered result of one console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    /// Shell status of the command; `None` if the marker carried no number.
    pub exit_code: Option<i32>,
}

pub struct TtyClient {
    input: Box<dyn AsyncWrite + Send + Unpin>,
    output: Box<dyn AsyncRead + Send + Unpin>,
    command_timeout: Duration,
    commands: u64,
}

impl TtyClient {
    pub fn new(streams: ConsoleStreams, command_timeout: Duration) -> Self {
        Self {
            input: streams.input,
            output: streams.output,
            command_timeout,
            commands: 0,
        }
    }

    pub fn command_count(&self) -> u64 {
        self.commands
    }

    pub async fn run_buffered_command(&mut self, command_line: &str) -> FlintResult<String> {
        self.run_command(command_line).await.map(|out| out.output)
    }

    pub async fn run_command(&mut self, command_line: &str) -> FlintResult<CommandOutput> {
        self.run_command_with_timeout(command_line, self.command_timeout)
            .await
    }

    pub async fn run_command_with_timeout(
        &mut self,
        command_line: &str,
        timeout: Duration,
    ) -> FlintResult<CommandOutput> {
        if command_line.contains('\n') || command_line.contains('\r') {
            return Err(FlintError::InvalidConfiguration(
                "console command must be a single line".into(),
            ));
        }

        let sentinel = Sentinel::new();
        let deadline = Instant::now() + timeout;
        self.commands += 1;

        let script = sentinel.script(command_line);
        let write = async {
            self.input.write_all(script.as_bytes()).await?;
            self.input.flush().await
        };
        match tokio::time::timeout_at(deadline, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(FlintError::Transport(format!("console write failed: {e}")));
            }
            Err(_) => {
                return Err(FlintError::CommandTimeout {
                    timeout,
                    partial_output: String::new(),
                });
            }
        }

        let mut buffer = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some(frame) = sentinel.find_frame(&buffer) {
                tracing::trace!(
                    exit_code = ?frame.exit_code,
                    bytes = frame.output.len(),
                    "Console command completed"
                );
                return Ok(CommandOutput {
                    output: frame.output,
                    exit_code: frame.exit_code,
                });
            }

            match tokio::time::timeout_at(deadline, self.output.read(&mut chunk)).await {
                Ok(Ok(0)) => return Err(FlintError::Transport("console closed".into())),
                Ok(Ok(n)) => buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => {
                    return Err(FlintError::Transport(format!("console read failed: {e}")));
                }
                Err(_) => {
                    return Err(FlintError::CommandTimeout {
                        timeout,
                        partial_output: sentinel.partial(&buffer),
                    });
                }
            }
        }
    }
}

//! Host implementation for the local machine.

use super::{ConsoleStreams, Host, HostProcess, ProcessExit, ProcessSignal, ProcessSpec};
use crate::management::{ApiTransport, UnixApiTransport};
use async_trait::async_trait;
use flintvm_shared::{FlintError, FlintResult, Transport};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// Runs hypervisors as child processes of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalHost;

impl LocalHost {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Host for LocalHost {
    async fn spawn_process(&self, spec: ProcessSpec) -> FlintResult<Box<dyn HostProcess>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        // Pass RUST_LOG to subprocess if set
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            cmd.env("RUST_LOG", rust_log);
        }

        // stdin/stdout carry the serial console, stderr is forwarded to tracing.
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            let err_msg = format!(
                "Failed to spawn {}: {}",
                spec.program.display(),
                e
            );
            tracing::error!(vm_id = %spec.label, "{}", err_msg);
            FlintError::Spawn(err_msg)
        })?;

        if let Some(stderr) = child.stderr.take() {
            let label = spec.label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(vm_id = %label, "hypervisor: {}", line);
                }
            });
        }

        tracing::debug!(
            vm_id = %spec.label,
            pid = ?child.id(),
            program = %spec.program.display(),
            "Spawned process"
        );

        Ok(Box::new(LocalProcess { child }))
    }

    async fn path_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_dir_all(&self, path: &Path) -> FlintResult<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> FlintResult<()> {
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    async fn create_new_file(&self, path: &Path) -> FlintResult<bool> {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(&self, path: &Path) -> FlintResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn connect(
        &self,
        transport: &Transport,
        request_timeout: Duration,
    ) -> FlintResult<Box<dyn ApiTransport>> {
        let transport = UnixApiTransport::connect(transport.path(), request_timeout).await?;
        Ok(Box::new(transport))
    }
}

struct LocalProcess {
    child: Child,
}

fn exit_from(status: std::process::ExitStatus) -> ProcessExit {
    ProcessExit {
        code: status.code(),
        signal: status.signal(),
    }
}

#[async_trait]
impl HostProcess for LocalProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn signal(&mut self, kind: ProcessSignal) -> FlintResult<()> {
        let Some(pid) = self.child.id() else {
            // Already reaped.
            return Ok(());
        };

        match kind {
            ProcessSignal::Kill => self.child.start_kill()?,
            ProcessSignal::Terminate => {
                match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                    Err(errno) => {
                        return Err(FlintError::Internal(format!(
                            "failed to send SIGTERM to {}: {}",
                            pid, errno
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn try_wait(&mut self) -> FlintResult<Option<ProcessExit>> {
        Ok(self.child.try_wait()?.map(exit_from))
    }

    async fn wait(&mut self, timeout: Duration) -> FlintResult<Option<ProcessExit>> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => Ok(Some(exit_from(status?))),
            Err(_) => Ok(None),
        }
    }

    fn take_console(&mut self) -> Option<ConsoleStreams> {
        let input = self.child.stdin.take()?;
        let output = self.child.stdout.take()?;
        Some(ConsoleStreams {
            input: Box::new(input),
            output: Box::new(output),
        })
    }
}

//! VmmHandler - runtime operations on a spawned hypervisor.

use crate::host::{ConsoleStreams, HostProcess, ProcessExit, ProcessSignal};
use async_trait::async_trait;
use flintvm_shared::FlintResult;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on reaping a process after SIGKILL.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process was gone before any signal was sent.
    AlreadyExited(ProcessExit),
    /// The process exited within the grace period after SIGTERM.
    Exited(ProcessExit),
    /// The grace period elapsed and the process was SIGKILLed.
    ForcedKill,
}

/// Runtime operations on a spawned hypervisor process.
///
/// Separates operations on a live process from spawning (`VmmController`).
#[async_trait]
pub trait VmmHandler: Send {
    fn pid(&self) -> Option<u32>;

    fn socket_path(&self) -> &Path;

    fn is_running(&mut self) -> bool;

    /// SIGTERM, wait up to `grace`, then SIGKILL.
    async fn stop(&mut self, grace: Duration) -> FlintResult<StopOutcome>;

    /// Wait for the process to exit on its own. `Ok(None)` on timeout.
    async fn wait_exit(&mut self, timeout: Duration) -> FlintResult<Option<ProcessExit>>;

    /// Console streams, available once.
    fn take_console(&mut self) -> Option<ConsoleStreams>;

    /// Synchronous best-effort kill for drop paths.
    fn kill_now(&mut self);
}

/// Owns a hypervisor process from launch on.
///
/// Dropping a handler whose process is still running kills it, whatever the
/// [`Host`](crate::host::Host) does with dropped processes.
pub struct HypervisorHandler {
    process: Box<dyn HostProcess>,
    vm_id: String,
    socket_path: PathBuf,
    boot_pid: Option<u32>,
}

impl HypervisorHandler {
    pub fn new(
        process: Box<dyn HostProcess>,
        vm_id: impl Into<String>,
        socket_path: PathBuf,
    ) -> Self {
        let boot_pid = process.pid();
        Self {
            process,
            vm_id: vm_id.into(),
            socket_path,
            boot_pid,
        }
    }

    pub(super) fn process_mut(&mut self) -> &mut dyn HostProcess {
        self.process.as_mut()
    }
}

impl Drop for HypervisorHandler {
    fn drop(&mut self) {
        if let Ok(None) = self.process.try_wait() {
            tracing::warn!(
                vm_id = %self.vm_id,
                pid = ?self.boot_pid,
                "Handler dropped, killing hypervisor"
            );
            self.kill_now();
        }
    }
}

#[async_trait]
impl VmmHandler for HypervisorHandler {
    fn pid(&self) -> Option<u32> {
        self.process.pid().or(self.boot_pid)
    }

    fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn is_running(&mut self) -> bool {
        matches!(self.process.try_wait(), Ok(None))
    }

    async fn stop(&mut self, grace: Duration) -> FlintResult<StopOutcome> {
        if let Some(exit) = self.process.try_wait()? {
            tracing::debug!(vm_id = %self.vm_id, %exit, "Hypervisor already exited");
            return Ok(StopOutcome::AlreadyExited(exit));
        }

        self.process.signal(ProcessSignal::Terminate)?;
        if let Some(exit) = self.process.wait(grace).await? {
            tracing::debug!(vm_id = %self.vm_id, %exit, "Hypervisor exited after SIGTERM");
            return Ok(StopOutcome::Exited(exit));
        }

        tracing::warn!(
            vm_id = %self.vm_id,
            pid = ?self.boot_pid,
            grace_ms = grace.as_millis() as u64,
            "Hypervisor ignored SIGTERM, sending SIGKILL"
        );
        self.process.signal(ProcessSignal::Kill)?;
        if self.process.wait(KILL_REAP_TIMEOUT).await?.is_none() {
            tracing::error!(
                vm_id = %self.vm_id,
                pid = ?self.boot_pid,
                "Hypervisor not reaped after SIGKILL"
            );
        }
        Ok(StopOutcome::ForcedKill)
    }

    async fn wait_exit(&mut self, timeout: Duration) -> FlintResult<Option<ProcessExit>> {
        self.process.wait(timeout).await
    }

    fn take_console(&mut self) -> Option<ConsoleStreams> {
        self.process.take_console()
    }

    fn kill_now(&mut self) {
        if let Err(e) = self.process.signal(ProcessSignal::Kill) {
            tracing::warn!(vm_id = %self.vm_id, "Failed to kill hypervisor: {}", e);
        }
    }
}

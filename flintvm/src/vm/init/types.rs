//! Boot pipeline context and failure cleanup.

use crate::host::{ConsoleStreams, Host};
use crate::management::{ApiSchema, ManagementClient, VmInfo};
use crate::vm::{VmId, VmState};
use crate::vmm::InstanceSpec;
use crate::vmm::controller::{LaunchLayout, ProcessSupervisor, VmmHandler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Bound on reaping the hypervisor after a rollback kill.
const ROLLBACK_REAP_TIMEOUT: Duration = Duration::from_secs(1);

/// RAII guard for resources acquired during boot.
///
/// The async [`rollback`](Self::rollback) is the normal failure path. If the
/// boot future is dropped mid-flight, `Drop` falls back to a synchronous kill,
/// schedules file removal on the current runtime and resets the state.
pub(crate) struct CleanupGuard {
    vm_id: VmId,
    host: Arc<dyn Host>,
    state: Arc<watch::Sender<VmState>>,
    handler: Option<Box<dyn VmmHandler>>,
    owned_paths: Vec<PathBuf>,
    armed: bool,
}

impl CleanupGuard {
    pub fn new(vm_id: VmId, host: Arc<dyn Host>, state: Arc<watch::Sender<VmState>>) -> Self {
        Self {
            vm_id,
            host,
            state,
            handler: None,
            owned_paths: Vec::new(),
            armed: true,
        }
    }

    /// Register a host path this boot is responsible for removing.
    pub fn own_path(&mut self, path: PathBuf) {
        if !self.owned_paths.contains(&path) {
            self.owned_paths.push(path);
        }
    }

    pub fn set_handler(&mut self, handler: Box<dyn VmmHandler>) {
        self.handler = Some(handler);
    }

    pub fn take_handler(&mut self) -> Option<Box<dyn VmmHandler>> {
        self.handler.take()
    }

    pub fn take_owned_paths(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.owned_paths)
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Kill the process if spawned and remove every owned path.
    ///
    /// Paths are removed in reverse registration order, so the transport
    /// claim goes last.
    pub async fn rollback(&mut self) {
        if let Some(mut handler) = self.handler.take() {
            tracing::debug!(vm_id = %self.vm_id, pid = ?handler.pid(), "Killing hypervisor");
            handler.kill_now();
            if let Ok(None) = handler.wait_exit(ROLLBACK_REAP_TIMEOUT).await {
                tracing::warn!(vm_id = %self.vm_id, "Hypervisor not reaped after kill");
            }
        }

        for path in self.owned_paths.drain(..).rev() {
            if let Err(e) = self.host.remove_file(&path).await {
                tracing::warn!(
                    vm_id = %self.vm_id,
                    path = %path.display(),
                    "Failed to remove: {}",
                    e
                );
            }
        }

        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        tracing::warn!(vm_id = %self.vm_id, "VM boot abandoned, cleaning up");

        if let Some(ref mut handler) = self.handler {
            handler.kill_now();
        }

        let paths = std::mem::take(&mut self.owned_paths);
        if !paths.is_empty() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let host = Arc::clone(&self.host);
                    runtime.spawn(async move {
                        for path in paths.iter().rev() {
                            let _ = host.remove_file(path).await;
                        }
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        vm_id = %self.vm_id,
                        "No runtime available, leaving {} path(s) behind",
                        paths.len()
                    );
                }
            }
        }

        self.state.send_modify(|state| {
            *state = match *state {
                VmState::Booting => VmState::Uninitialized,
                VmState::ShuttingDown => VmState::Terminated,
                other => other,
            }
        });
    }
}

/// Shared boot pipeline context.
pub(crate) struct BootContext {
    pub spec: InstanceSpec,
    pub layout: LaunchLayout,
    pub schema: ApiSchema,
    pub host: Arc<dyn Host>,
    pub supervisor: ProcessSupervisor,
    pub guard: CleanupGuard,
    pub console: Option<ConsoleStreams>,
    pub management: Option<Arc<ManagementClient>>,
    pub info: Option<VmInfo>,
}

impl BootContext {
    pub fn new(
        spec: InstanceSpec,
        layout: LaunchLayout,
        schema: ApiSchema,
        host: Arc<dyn Host>,
        state: Arc<watch::Sender<VmState>>,
    ) -> Self {
        let guard = CleanupGuard::new(spec.vm_id.clone(), Arc::clone(&host), state);
        let supervisor = ProcessSupervisor::new(Arc::clone(&host));
        Self {
            spec,
            layout,
            schema,
            host,
            supervisor,
            guard,
            console: None,
            management: None,
            info: None,
        }
    }
}

/// Resources handed to the instance when boot commits.
pub(crate) struct BootOutput {
    pub handler: Box<dyn VmmHandler>,
    pub management: Arc<ManagementClient>,
    pub console: Option<ConsoleStreams>,
    pub info: VmInfo,
    pub owned_paths: Vec<PathBuf>,
}

//! VmInstance - the aggregate root for one microVM.

use super::metrics::{VmMetrics, VmMetricsStorage};
use super::{VmId, VmState};
use crate::config::VmConfiguration;
use crate::host::{Host, LocalHost};
use crate::install::HypervisorInstall;
use crate::management::{ApiSchema, ManagementClient, VmInfo};
use crate::options::{TransportOptions, VmOptions};
use crate::tty::TtyClient;
use crate::util::kill_process;
use crate::vmm::InstanceSpec;
use crate::vmm::controller::{LaunchLayout, ProcessSupervisor, VmmHandler};
use flintvm_shared::{FlintError, FlintResult, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, watch};

/// Resources that exist only between a committed boot and shutdown.
pub(crate) struct VmResources {
    pub handler: Mutex<Box<dyn VmmHandler>>,
    pub management: Arc<ManagementClient>,
    pub tty: Option<Mutex<TtyClient>>,
    pub info: VmInfo,
    pub pid: Option<u32>,
    /// Removed at Terminated, last to first.
    pub owned_paths: Vec<PathBuf>,
}

/// A microVM driven through its lifecycle.
///
/// The instance exclusively owns the hypervisor process and its transport.
/// Every public operation returns an [`Outcome`](flintvm_shared::Outcome);
/// operations that are illegal in the current [`VmState`] are rejected
/// without side effects.
///
/// Lifecycle transitions are serialized by an internal lock. Management and
/// console traffic are each serialized separately, so concurrent callers
/// queue rather than interleave.
pub struct VmInstance {
    pub(super) id: VmId,
    pub(super) configuration: VmConfiguration,
    pub(super) install: HypervisorInstall,
    pub(super) transport: TransportOptions,
    pub(super) options: VmOptions,
    pub(super) schema: ApiSchema,
    pub(super) layout: LaunchLayout,
    pub(super) host: Arc<dyn Host>,
    pub(super) supervisor: ProcessSupervisor,
    pub(super) state: Arc<watch::Sender<VmState>>,
    pub(super) transition: Mutex<()>,
    pub(super) resources: RwLock<Option<Arc<VmResources>>>,
    pub(super) metrics: VmMetricsStorage,
}

impl VmInstance {
    pub fn builder(
        configuration: VmConfiguration,
        install: HypervisorInstall,
    ) -> VmInstanceBuilder {
        VmInstanceBuilder::new(configuration, install)
    }

    pub fn id(&self) -> &VmId {
        &self.id
    }

    pub fn state(&self) -> VmState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<VmState> {
        self.state.subscribe()
    }

    pub fn configuration(&self) -> &VmConfiguration {
        &self.configuration
    }

    pub fn install(&self) -> &HypervisorInstall {
        &self.install
    }

    pub fn transport_options(&self) -> &TransportOptions {
        &self.transport
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// Control socket as seen from the host.
    pub fn transport(&self) -> Transport {
        self.layout.transport()
    }

    /// Hypervisor PID while the instance owns a process.
    pub fn pid(&self) -> Option<u32> {
        self.resources
            .try_read()
            .ok()
            .and_then(|resources| resources.as_ref().and_then(|r| r.pid))
    }

    /// Info reported by the hypervisor when the boot committed.
    pub async fn boot_info(&self) -> Option<VmInfo> {
        self.resources
            .read()
            .await
            .as_ref()
            .map(|resources| resources.info.clone())
    }

    pub fn metrics(&self) -> VmMetrics {
        self.metrics.snapshot()
    }

    pub(super) fn set_state(&self, next: VmState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(vm_id = %self.id, from = %previous, to = %next, "VM state changed");
        }
    }

    pub(super) fn instance_spec(&self) -> InstanceSpec {
        InstanceSpec {
            vm_id: self.id.clone(),
            install: self.install.clone(),
            transport: self.transport.clone(),
            configuration: self.configuration.clone(),
            options: self.options.clone(),
        }
    }

    /// Resources for an operation that needs a connected VM.
    pub(super) async fn connected(&self, operation: &str) -> FlintResult<Arc<VmResources>> {
        let state = self.state();
        if !state.is_connected() {
            return Err(state.reject(operation));
        }
        self.resources
            .read()
            .await
            .clone()
            .ok_or_else(|| self.state().reject(operation))
    }
}

impl Drop for VmInstance {
    fn drop(&mut self) {
        let Some(resources) = self.resources.get_mut().take() else {
            return;
        };

        tracing::warn!(
            vm_id = %self.id,
            pid = ?resources.pid,
            "VmInstance dropped without shutdown, killing hypervisor"
        );

        match resources.handler.try_lock() {
            Ok(mut handler) => handler.kill_now(),
            Err(_) => {
                if let Some(pid) = resources.pid
                    && !kill_process(pid)
                {
                    tracing::warn!(vm_id = %self.id, pid, "Failed to kill hypervisor");
                }
            }
        }

        let paths = resources.owned_paths.clone();
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
                    vm_id = %self.id,
                    "No runtime available, leaving transport files behind"
                );
            }
        }

        self.state.send_replace(VmState::Terminated);
    }
}

/// Builder for [`VmInstance`].
///
/// Defaults: a generated id, a unique socket in the user runtime directory,
/// [`VmOptions::default`] and [`LocalHost`].
pub struct VmInstanceBuilder {
    id: Option<VmId>,
    configuration: VmConfiguration,
    install: HypervisorInstall,
    transport: Option<TransportOptions>,
    options: VmOptions,
    host: Option<Arc<dyn Host>>,
}

impl VmInstanceBuilder {
    pub fn new(configuration: VmConfiguration, install: HypervisorInstall) -> Self {
        Self {
            id: None,
            configuration,
            install,
            transport: None,
            options: VmOptions::default(),
            host: None,
        }
    }

    pub fn id(mut self, id: VmId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn transport(mut self, transport: TransportOptions) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn options(mut self, options: VmOptions) -> Self {
        self.options = options;
        self
    }

    pub fn host(mut self, host: Arc<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    /// Validate everything that can be checked without touching the host.
    pub fn build(self) -> FlintResult<VmInstance> {
        let id = self.id.unwrap_or_else(VmId::generate);
        let transport = self.transport.unwrap_or_default();
        let host = self.host.unwrap_or_else(|| Arc::new(LocalHost::new()));
        let schema = ApiSchema::for_version(&self.install.version)?;

        if self.options.boot_timeout.is_zero() {
            return Err(FlintError::InvalidConfiguration(
                "boot_timeout must be greater than zero".into(),
            ));
        }

        let spec = InstanceSpec {
            vm_id: id.clone(),
            install: self.install.clone(),
            transport: transport.clone(),
            configuration: self.configuration.clone(),
            options: self.options.clone(),
        };
        let layout = LaunchLayout::resolve(&spec, host.as_ref())?;

        tracing::debug!(
            vm_id = %id,
            version = %schema,
            socket = %layout.socket_path.display(),
            "VmInstance created"
        );

        let (state, _) = watch::channel(VmState::Uninitialized);

        Ok(VmInstance {
            id,
            configuration: self.configuration,
            install: self.install,
            transport,
            options: self.options,
            schema,
            layout,
            supervisor: ProcessSupervisor::new(Arc::clone(&host)),
            host,
            state: Arc::new(state),
            transition: Mutex::new(()),
            resources: RwLock::new(None),
            metrics: VmMetricsStorage::default(),
        })
    }
}

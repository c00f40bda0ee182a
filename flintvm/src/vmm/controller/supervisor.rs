//! Process Supervisor: launch, socket wait, termination.

use super::handler::{HypervisorHandler, StopOutcome, VmmHandler};
use super::spawn::{LaunchLayout, build_command};
use super::VmmController;
use crate::config::VmConfiguration;
use crate::host::{Host, HostProcess};
use crate::install::HypervisorInstall;
use crate::management::ApiSchema;
use crate::options::{TransportOptions, VmOptions};
use crate::vm::VmId;
use crate::vmm::InstanceSpec;
use async_trait::async_trait;
use flintvm_shared::{FlintError, FlintResult, Outcome, SoftFailure};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long to wait for a killed process to be reaped during rollback.
const ROLLBACK_REAP_TIMEOUT: Duration = Duration::from_secs(1);

/// Launches hypervisors through a [`Host`] and reaps them on termination.
#[derive(Clone)]
pub struct ProcessSupervisor {
    host: Arc<dyn Host>,
}

impl ProcessSupervisor {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host }
    }

    /// Spawn a hypervisor for `configuration` and wait for its control socket.
    pub async fn spawn(
        &self,
        install: &HypervisorInstall,
        transport: &TransportOptions,
        configuration: &VmConfiguration,
        options: &VmOptions,
    ) -> Outcome<Box<dyn VmmHandler>> {
        let spec = InstanceSpec {
            vm_id: VmId::generate(),
            install: install.clone(),
            transport: transport.clone(),
            configuration: configuration.clone(),
            options: options.clone(),
        };
        self.start(&spec).await.into()
    }

    /// Stop the process: SIGTERM, `grace`, then SIGKILL.
    ///
    /// Success if it exited (or was already gone); `SoftFailure(ForcedKill)`
    /// if it had to be killed.
    pub async fn terminate(&self, handler: &mut dyn VmmHandler, grace: Duration) -> Outcome<()> {
        let pid = handler.pid();
        match handler.stop(grace).await {
            Ok(StopOutcome::AlreadyExited(_)) | Ok(StopOutcome::Exited(_)) => Outcome::Success(()),
            Ok(StopOutcome::ForcedKill) => {
                Outcome::SoftFailure(SoftFailure::ForcedKill { pid, grace })
            }
            Err(e) => Outcome::Failure(e),
        }
    }

    async fn wait_for_socket(
        &self,
        spec: &InstanceSpec,
        layout: &LaunchLayout,
        process: &mut dyn HostProcess,
    ) -> FlintResult<()> {
        let timeout = spec.options.boot_timeout;
        let poll = spec.options.socket_poll_interval.max(Duration::from_millis(1));
        let start = Instant::now();

        loop {
            if self.host.path_exists(&layout.socket_path).await {
                tracing::debug!(
                    vm_id = %spec.vm_id,
                    socket = %layout.socket_path.display(),
                    waited_ms = start.elapsed().as_millis() as u64,
                    "Control socket ready"
                );
                return Ok(());
            }

            if let Some(exit) = process.try_wait()? {
                return Err(FlintError::Spawn(format!(
                    "hypervisor exited with {} before creating {}",
                    exit,
                    layout.socket_path.display()
                )));
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(FlintError::BootTimeout {
                    socket: layout.socket_path.display().to_string(),
                    waited,
                });
            }
            tokio::time::sleep(poll.min(timeout - waited)).await;
        }
    }

    async fn rollback(&self, layout: &LaunchLayout, handler: Option<&mut HypervisorHandler>) {
        if let Some(handler) = handler {
            handler.kill_now();
            let _ = handler.wait_exit(ROLLBACK_REAP_TIMEOUT).await;
        }
        if let Err(e) = self.host.remove_file(&layout.socket_path).await {
            tracing::warn!(
                socket = %layout.socket_path.display(),
                "Failed to remove socket: {}",
                e
            );
        }
        if let Some(config_file) = &layout.config_file
            && let Err(e) = self.host.remove_file(config_file).await
        {
            tracing::warn!(path = %config_file.display(), "Failed to remove config file: {}", e);
        }
    }
}

#[async_trait]
impl VmmController for ProcessSupervisor {
    async fn start(&self, spec: &InstanceSpec) -> FlintResult<Box<dyn VmmHandler>> {
        let layout = LaunchLayout::resolve(spec, self.host.as_ref())?;

        // Never touch files another instance may own.
        if self.host.path_exists(&layout.socket_path).await {
            return Err(FlintError::Transport(format!(
                "address already in use: {}",
                layout.socket_path.display()
            )));
        }

        if let Some(directory) = layout.socket_directory()
            && spec.install.jailer_binary.is_none()
        {
            self.host.create_dir_all(&directory).await?;
        }

        if let Some(config_file) = &layout.config_file {
            let schema = ApiSchema::for_version(&spec.install.version)?;
            let json = schema.config_file_json(&spec.configuration)?;
            if let Err(e) = self.host.write_file(config_file, json.as_bytes()).await {
                self.rollback(&layout, None).await;
                return Err(e);
            }
        }

        let command = build_command(spec, &layout);
        tracing::info!(
            vm_id = %spec.vm_id,
            program = %command.program.display(),
            socket = %layout.socket_path.display(),
            "Launching hypervisor"
        );

        let process = match self.host.spawn_process(command).await {
            Ok(process) => process,
            Err(e) => {
                self.rollback(&layout, None).await;
                return Err(e);
            }
        };

        // From here on a dropped future still kills the process.
        let mut handler =
            HypervisorHandler::new(process, spec.vm_id.to_string(), layout.socket_path.clone());

        if let Err(e) = self.wait_for_socket(spec, &layout, handler.process_mut()).await {
            tracing::warn!(vm_id = %spec.vm_id, error = %e, "Hypervisor failed to come up");
            self.rollback(&layout, Some(&mut handler)).await;
            return Err(e);
        }

        Ok(Box::new(handler))
    }
}

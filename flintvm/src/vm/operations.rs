//! Management and console operations on a booted VM.

use super::instance::VmInstance;
use super::VmState;
use crate::config::VmMachineConfiguration;
use crate::management::{ActionType, VmInfo};
use crate::tty::CommandOutput;
use flintvm_shared::{FlintError, FlintResult, Outcome};
use std::path::Path;

impl VmInstance {
    /// Id, state and version as reported by the hypervisor.
    pub async fn get_info(&self) -> Outcome<VmInfo> {
        let outcome: Outcome<VmInfo> = async {
            let resources = self.connected("get info").await?;
            self.metrics.management_request();
            resources.management.get_info().await
        }
        .await
        .into();
        self.metrics.observe(&outcome);
        outcome
    }

    pub async fn get_version(&self) -> Outcome<String> {
        let outcome: Outcome<String> = async {
            let resources = self.connected("get version").await?;
            self.metrics.management_request();
            resources.management.get_version().await
        }
        .await
        .into();
        self.metrics.observe(&outcome);
        outcome
    }

    pub async fn get_machine_config(&self) -> Outcome<VmMachineConfiguration> {
        let outcome: Outcome<VmMachineConfiguration> = async {
            let resources = self.connected("get machine config").await?;
            self.metrics.management_request();
            resources.management.get_machine_config().await
        }
        .await
        .into();
        self.metrics.observe(&outcome);
        outcome
    }

    /// Point a configured drive at a new backing file.
    pub async fn update_drive(
        &self,
        drive_id: &str,
        path_on_host: impl AsRef<Path>,
    ) -> Outcome<()> {
        let outcome: Outcome<()> = async {
            if self.configuration.drive(drive_id).is_none() {
                return Err(FlintError::InvalidConfiguration(format!(
                    "unknown drive '{drive_id}'"
                )));
            }
            let resources = self.connected("update drive").await?;
            self.metrics.management_request();
            resources
                .management
                .patch_drive(drive_id, path_on_host.as_ref())
                .await
        }
        .await
        .into();
        self.metrics.observe(&outcome);
        outcome
    }

    /// Issue a synchronous action. `InstanceStart` belongs to boot and is
    /// always rejected here.
    pub async fn perform_action(&self, action: ActionType) -> Outcome<()> {
        let outcome: Outcome<()> = async {
            if action == ActionType::InstanceStart {
                return Err(self.state().reject("start instance"));
            }
            let resources = self.connected("perform action").await?;
            self.metrics.management_request();
            resources.management.perform_action(action).await
        }
        .await
        .into();
        self.metrics.observe(&outcome);
        outcome
    }

    /// Run one command on the serial console and return its buffered output.
    pub async fn run_buffered_command(&self, command_line: &str) -> Outcome<String> {
        self.run_command(command_line).await.map(|out| out.output)
    }

    /// Like [`run_buffered_command`](Self::run_buffered_command), with the exit status.
    ///
    /// Only accepted while Running. Concurrent callers queue on the console.
    pub async fn run_command(&self, command_line: &str) -> Outcome<CommandOutput> {
        let outcome: Outcome<CommandOutput> = self.run_command_inner(command_line).await.into();
        self.metrics.observe(&outcome);
        outcome
    }

    async fn run_command_inner(&self, command_line: &str) -> FlintResult<CommandOutput> {
        let state = self.state();
        if state != VmState::Running {
            return Err(state.reject("run console command"));
        }

        let resources = self.connected("run console command").await?;
        let tty = resources
            .tty
            .as_ref()
            .ok_or_else(|| FlintError::Transport("console not available for this VM".into()))?;

        let mut tty = tty.lock().await;
        self.metrics.console_command();
        tracing::debug!(vm_id = %self.id, command = %command_line, "Running console command");

        tty.run_command(command_line).await.inspect_err(|e| {
            tracing::debug!(vm_id = %self.id, error = %e, "Console command failed");
        })
    }
}

//! Tasks: push the configuration over the API, then start the guest.
//!
//! Only planned for the API-calls boot method; with a config file the
//! hypervisor has both already.

use super::{BootCtx, log_task_error, task_start};
use crate::management::{ActionType, ManagementClient};
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use flintvm_shared::{FlintError, FlintResult};
use std::sync::Arc;

async fn management(ctx: &BootCtx) -> FlintResult<Arc<ManagementClient>> {
    ctx.lock()
        .await
        .management
        .clone()
        .ok_or_else(|| FlintError::Internal("api_connect task must run first".into()))
}

pub(crate) struct VmConfigureTask;

#[async_trait]
impl PipelineTask<BootCtx> for VmConfigureTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> FlintResult<()> {
        let task_name = self.name();
        let vm_id = task_start(&ctx, task_name).await;

        let client = management(&ctx).await?;
        let configuration = ctx.lock().await.spec.configuration.clone();

        let result = async {
            client.put_boot_source(configuration.boot_source()).await?;
            client
                .put_machine_config(configuration.machine_configuration())
                .await?;
            for drive in configuration.drives() {
                client.put_drive(drive).await?;
            }
            Ok::<(), FlintError>(())
        }
        .await;

        result.inspect_err(|e| log_task_error(&vm_id, task_name, e))
    }

    fn name(&self) -> &'static str {
        "vm_configure"
    }
}

pub(crate) struct InstanceStartTask;

#[async_trait]
impl PipelineTask<BootCtx> for InstanceStartTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> FlintResult<()> {
        let task_name = self.name();
        let vm_id = task_start(&ctx, task_name).await;

        management(&ctx)
            .await?
            .perform_action(ActionType::InstanceStart)
            .await
            .inspect_err(|e| log_task_error(&vm_id, task_name, e))
    }

    fn name(&self) -> &'static str {
        "instance_start"
    }
}

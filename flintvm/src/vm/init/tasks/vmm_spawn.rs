//! Task: VMM Spawn - launch the hypervisor and wait for its control socket.

use super::{BootCtx, log_task_error, task_start};
use crate::pipeline::PipelineTask;
use crate::vmm::controller::VmmController;
use async_trait::async_trait;
use flintvm_shared::FlintResult;

pub(crate) struct VmmSpawnTask;

#[async_trait]
impl PipelineTask<BootCtx> for VmmSpawnTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> FlintResult<()> {
        let task_name = self.name();
        let vm_id = task_start(&ctx, task_name).await;

        let (supervisor, spec) = {
            let ctx = ctx.lock().await;
            (ctx.supervisor.clone(), ctx.spec.clone())
        };

        let mut handler = supervisor
            .start(&spec)
            .await
            .inspect_err(|e| log_task_error(&vm_id, task_name, e))?;

        let console = handler.take_console();
        if console.is_none() {
            tracing::debug!(vm_id = %vm_id, "Host provided no console streams");
        }

        tracing::info!(vm_id = %vm_id, pid = ?handler.pid(), "Hypervisor started");

        let mut ctx = ctx.lock().await;
        ctx.guard.set_handler(handler);
        ctx.console = console;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "vmm_spawn"
    }
}

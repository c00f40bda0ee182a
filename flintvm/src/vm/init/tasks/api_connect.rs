//! Task: open the management channel and check it with `GET /`.

use super::{BootCtx, log_task_error, task_start};
use crate::management::ManagementClient;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use flintvm_shared::FlintResult;
use std::sync::Arc;

pub(crate) struct ApiConnectTask;

#[async_trait]
impl PipelineTask<BootCtx> for ApiConnectTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> FlintResult<()> {
        let task_name = self.name();
        let vm_id = task_start(&ctx, task_name).await;

        let (host, transport, schema, request_timeout) = {
            let ctx = ctx.lock().await;
            (
                ctx.host.clone(),
                ctx.layout.transport(),
                ctx.schema,
                ctx.spec.options.request_timeout,
            )
        };

        let channel = host
            .connect(&transport, request_timeout)
            .await
            .inspect_err(|e| log_task_error(&vm_id, task_name, e))?;
        let client = ManagementClient::new(schema, channel);

        let info = client
            .get_info()
            .await
            .inspect_err(|e| log_task_error(&vm_id, task_name, e))?;

        tracing::debug!(
            vm_id = %vm_id,
            transport = %transport,
            vmm_version = %info.vmm_version,
            hypervisor_state = %info.state,
            "Management channel connected"
        );

        let mut ctx = ctx.lock().await;
        ctx.management = Some(Arc::new(client));
        ctx.info = Some(info);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "api_connect"
    }
}

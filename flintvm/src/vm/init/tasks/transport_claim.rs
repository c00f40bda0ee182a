//! Tasks: prepare the socket directory and claim the socket path.
//!
//! The claim is a `<socket>.lock` file created with create-new semantics.
//! Whoever creates it owns the socket path, the config file next to it and
//! the lock itself. A loser never touches any of them.

use super::{BootCtx, log_task_error, task_start};
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use flintvm_shared::{FlintError, FlintResult};

pub(crate) struct SocketDirectoryTask;

#[async_trait]
impl PipelineTask<BootCtx> for SocketDirectoryTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> FlintResult<()> {
        let task_name = self.name();
        let vm_id = task_start(&ctx, task_name).await;

        let (host, directory) = {
            let ctx = ctx.lock().await;
            (ctx.host.clone(), ctx.layout.socket_directory())
        };
        if let Some(directory) = directory {
            host.create_dir_all(&directory)
                .await
                .inspect_err(|e| log_task_error(&vm_id, task_name, e))?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "socket_directory"
    }
}

pub(crate) struct TransportClaimTask;

#[async_trait]
impl PipelineTask<BootCtx> for TransportClaimTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> FlintResult<()> {
        let task_name = self.name();
        let vm_id = task_start(&ctx, task_name).await;

        // Held for the whole task so the claim and its registration cannot be separated.
        let mut ctx = ctx.lock().await;
        let host = ctx.host.clone();
        let layout = ctx.layout.clone();

        let in_use = || {
            FlintError::Transport(format!(
                "address already in use: {}",
                layout.socket_path.display()
            ))
        };

        if !host.create_new_file(&layout.lock_path).await? {
            let err = in_use();
            log_task_error(&vm_id, task_name, &err);
            return Err(err);
        }
        ctx.guard.own_path(layout.lock_path.clone());

        // A socket without a claim belongs to something outside our control.
        if host.path_exists(&layout.socket_path).await {
            let err = in_use();
            log_task_error(&vm_id, task_name, &err);
            return Err(err);
        }
        ctx.guard.own_path(layout.socket_path.clone());
        if let Some(config_file) = &layout.config_file {
            ctx.guard.own_path(config_file.clone());
        }

        tracing::debug!(
            vm_id = %vm_id,
            socket = %layout.socket_path.display(),
            "Claimed transport path"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "transport_claim"
    }
}

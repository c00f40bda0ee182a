//! Boot pipeline tasks.

mod api_connect;
mod configure;
mod transport_claim;
mod validate;
mod vmm_spawn;

pub(crate) use api_connect::ApiConnectTask;
pub(crate) use configure::{InstanceStartTask, VmConfigureTask};
pub(crate) use transport_claim::{SocketDirectoryTask, TransportClaimTask};
pub(crate) use validate::ValidateArtifactsTask;
pub(crate) use vmm_spawn::VmmSpawnTask;

use super::types::BootContext;
use crate::vm::VmId;
use flintvm_shared::FlintError;
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) type BootCtx = Arc<Mutex<BootContext>>;

pub(super) async fn task_start(ctx: &BootCtx, task_name: &str) -> VmId {
    let ctx = ctx.lock().await;
    tracing::debug!(vm_id = %ctx.spec.vm_id, task = task_name, "Boot task started");
    ctx.spec.vm_id.clone()
}

pub(super) fn log_task_error(vm_id: &VmId, task_name: &str, error: &FlintError) {
    tracing::error!(vm_id = %vm_id, task = task_name, error = %error, "Boot task failed");
}

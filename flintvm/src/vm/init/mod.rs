//! VM boot orchestration.
//!
//! ## Architecture
//!
//! Boot is table-driven, with the plan chosen by boot method:
//!
//! ```text
//! ApiCalls:
//!   1. ValidateArtifacts ─┬─  (kernel, initrd, drive images exist)
//!      SocketDirectory   ─┘   (create socket directory)
//!   2. TransportClaim         (claim <socket>.lock)
//!   3. VmmSpawn               (launch hypervisor, wait for socket)
//!   4. ApiConnect             (connect, check GET /)
//!   5. VmConfigure            (boot-source, machine-config, drives)
//!   6. InstanceStart          (InstanceStart action)
//!
//! ConfigFile:
//!   1-4 as above; the config file is written by VmmSpawn and the
//!   hypervisor starts the guest itself.
//! ```
//!
//! `CleanupGuard` owns everything acquired along the way until the boot
//! commits.

mod tasks;
mod types;

pub(crate) use tasks::BootCtx;
pub(crate) use types::{BootContext, BootOutput};

use crate::options::BootMethod;
use crate::pipeline::{BoxedTask, ExecutionPlan, PipelineExecutor, Stage};
use crate::vm::VmState;
use crate::vm::metrics::BootMetrics;
use flintvm_shared::{FlintError, FlintResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};

use tasks::{
    ApiConnectTask, InstanceStartTask, SocketDirectoryTask, TransportClaimTask,
    ValidateArtifactsTask, VmConfigureTask, VmmSpawnTask,
};

fn execution_plan(method: BootMethod) -> ExecutionPlan<BootCtx> {
    let mut stages: Vec<Stage<BootCtx>> = vec![
        Stage::parallel(vec![
            Box::new(ValidateArtifactsTask) as BoxedTask<BootCtx>,
            Box::new(SocketDirectoryTask),
        ]),
        Stage::single(Box::new(TransportClaimTask)),
        Stage::single(Box::new(VmmSpawnTask)),
        Stage::single(Box::new(ApiConnectTask)),
    ];

    if method == BootMethod::ApiCalls {
        stages.push(Stage::single(Box::new(VmConfigureTask)));
        stages.push(Stage::single(Box::new(InstanceStartTask)));
    }

    ExecutionPlan::new(stages)
}

pub(crate) fn new_context(context: BootContext) -> BootCtx {
    Arc::new(Mutex::new(context))
}

/// Run the boot plan, bounded by `timeout` and abandoned as soon as the
/// instance enters [`VmState::ShuttingDown`].
///
/// Acquired resources stay in `ctx` either way; the caller decides between
/// [`commit`] and [`rollback`].
pub(crate) async fn execute(
    ctx: &BootCtx,
    timeout: Duration,
    mut state: watch::Receiver<VmState>,
) -> FlintResult<BootMetrics> {
    let start = Instant::now();
    let (method, socket) = {
        let ctx = ctx.lock().await;
        (
            ctx.spec.options.boot_method,
            ctx.layout.socket_path.display().to_string(),
        )
    };

    let plan = execution_plan(method);
    let run = tokio::time::timeout(timeout, PipelineExecutor::execute(plan, Arc::clone(ctx)));

    tokio::select! {
        result = run => match result {
            Ok(pipeline) => Ok(BootMetrics::from_pipeline(&pipeline?, start.elapsed())),
            Err(_) => Err(FlintError::BootTimeout { socket, waited: start.elapsed() }),
        },
        _ = state.wait_for(|s| *s == VmState::ShuttingDown) => {
            Err(FlintError::Cancelled("shutdown requested during boot".into()))
        }
    }
}

/// Hand the acquired resources over and disarm the guard.
pub(crate) async fn commit(ctx: &BootCtx) -> FlintResult<BootOutput> {
    let mut ctx = ctx.lock().await;

    let handler = ctx
        .guard
        .take_handler()
        .ok_or_else(|| FlintError::Internal("vmm_spawn task must run first".into()))?;
    let management = match ctx.management.take() {
        Some(management) => management,
        None => {
            ctx.guard.set_handler(handler);
            return Err(FlintError::Internal("api_connect task must run first".into()));
        }
    };
    let info = match ctx.info.take() {
        Some(info) => info,
        None => {
            ctx.guard.set_handler(handler);
            return Err(FlintError::Internal("api_connect task must run first".into()));
        }
    };

    let owned_paths = ctx.guard.take_owned_paths();
    ctx.guard.disarm();

    Ok(BootOutput {
        handler,
        management,
        console: ctx.console.take(),
        info,
        owned_paths,
    })
}

/// Release everything acquired so far.
pub(crate) async fn rollback(ctx: &BootCtx) {
    let mut ctx = ctx.lock().await;
    ctx.management = None;
    ctx.console = None;
    ctx.guard.rollback().await;
}

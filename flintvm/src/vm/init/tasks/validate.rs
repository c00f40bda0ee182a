//! Task: check that kernel, initrd and drive images exist on the host.
//!
//! Skipped under a jailer, where paths are resolved inside the chroot.

use super::{BootCtx, log_task_error, task_start};
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use flintvm_shared::{FlintError, FlintResult};
use std::path::PathBuf;

pub(crate) struct ValidateArtifactsTask;

#[async_trait]
impl PipelineTask<BootCtx> for ValidateArtifactsTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> FlintResult<()> {
        let task_name = self.name();
        let vm_id = task_start(&ctx, task_name).await;

        let (host, artifacts) = {
            let ctx = ctx.lock().await;
            if ctx.spec.install.is_jailed() {
                return Ok(());
            }
            let config = &ctx.spec.configuration;
            let boot = config.boot_source();

            let mut artifacts: Vec<(String, PathBuf)> =
                vec![("kernel image".into(), boot.kernel_image_path.clone())];
            if let Some(initrd) = &boot.initrd_path {
                artifacts.push(("initrd".into(), initrd.clone()));
            }
            for drive in config.drives() {
                artifacts.push((format!("drive '{}'", drive.drive_id), drive.path_on_host.clone()));
            }
            (ctx.host.clone(), artifacts)
        };

        for (what, path) in artifacts {
            if !host.path_exists(&path).await {
                let err = FlintError::InvalidConfiguration(format!(
                    "{} not found: {}",
                    what,
                    path.display()
                ));
                log_task_error(&vm_id, task_name, &err);
                return Err(err);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "validate_artifacts"
    }
}

use async_trait::async_trait;
use flintvm_shared::FlintResult;

/// One unit of work in a pipeline.
#[async_trait]
pub trait PipelineTask<Ctx>: Send + Sync {
    async fn run(self: Box<Self>, ctx: Ctx) -> FlintResult<()>;

    /// Stable name used in logs and metrics.
    fn name(&self) -> &'static str;
}

pub type BoxedTask<Ctx> = Box<dyn PipelineTask<Ctx>>;

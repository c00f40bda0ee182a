use super::metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
use super::stage::{ExecutionMode, Stage};
use super::task::BoxedTask;
use flintvm_shared::FlintResult;
use futures::future::try_join_all;
use std::time::Instant;

/// Ordered list of stages.
pub struct ExecutionPlan<Ctx> {
    stages: Vec<Stage<Ctx>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    pub fn new(stages: Vec<Stage<Ctx>>) -> Self {
        Self { stages }
    }
}

pub struct PipelineExecutor;

impl PipelineExecutor {
    pub async fn execute<Ctx>(plan: ExecutionPlan<Ctx>, ctx: Ctx) -> FlintResult<PipelineMetrics>
    where
        Ctx: Clone + Send + 'static,
    {
        let total_start = Instant::now();
        let mut stages = Vec::with_capacity(plan.stages.len());

        for (index, stage) in plan.stages.into_iter().enumerate() {
            let stage_start = Instant::now();
            let mode = stage.mode;

            let tasks = match mode {
                ExecutionMode::Parallel => {
                    let runs = stage
                        .tasks
                        .into_iter()
                        .map(|task| run_task(index, task, ctx.clone()));
                    try_join_all(runs).await?
                }
                ExecutionMode::Sequential => {
                    let mut tasks = Vec::with_capacity(stage.tasks.len());
                    for task in stage.tasks {
                        tasks.push(run_task(index, task, ctx.clone()).await?);
                    }
                    tasks
                }
            };

            stages.push(StageMetrics {
                index,
                mode,
                duration: stage_start.elapsed(),
                tasks,
            });
        }

        Ok(PipelineMetrics {
            total: total_start.elapsed(),
            stages,
        })
    }
}

async fn run_task<Ctx>(stage: usize, task: BoxedTask<Ctx>, ctx: Ctx) -> FlintResult<TaskMetrics> {
    let name = task.name();
    let start = Instant::now();
    tracing::trace!(stage, task = name, "Task starting");

    task.run(ctx).await.inspect_err(|e| {
        tracing::debug!(stage, task = name, error = %e, "Task failed");
    })?;

    Ok(TaskMetrics {
        name,
        duration: start.elapsed(),
    })
}

//! Table-driven staged execution.
//!
//! ```text
//! ExecutionPlan → Stage (parallel | sequential) → PipelineTask
//! ```
//!
//! Stages run in order. A stage's tasks run concurrently or one after the
//! other; the first task error aborts the plan and is returned unchanged.
//! Tasks share a cloneable context, so writes go through interior
//! mutability.

mod executor;
mod metrics;
mod stage;
mod task;

pub use executor::{ExecutionPlan, PipelineExecutor};
pub use metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
pub use stage::{ExecutionMode, Stage};
pub use task::{BoxedTask, PipelineTask};

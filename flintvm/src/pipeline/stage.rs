use super::task::BoxedTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Parallel,
    Sequential,
}

/// Tasks that run together under one execution mode.
pub struct Stage<Ctx> {
    pub(crate) tasks: Vec<BoxedTask<Ctx>>,
    pub(crate) mode: ExecutionMode,
}

impl<Ctx> Stage<Ctx> {
    pub fn parallel(tasks: Vec<BoxedTask<Ctx>>) -> Self {
        Self {
            tasks,
            mode: ExecutionMode::Parallel,
        }
    }

    pub fn sequential(tasks: Vec<BoxedTask<Ctx>>) -> Self {
        Self {
            tasks,
            mode: ExecutionMode::Sequential,
        }
    }

    /// Single-task sequential stage.
    pub fn single(task: BoxedTask<Ctx>) -> Self {
        Self::sequential(vec![task])
    }
}

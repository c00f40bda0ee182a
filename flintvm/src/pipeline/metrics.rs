use super::stage::ExecutionMode;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TaskMetrics {
    pub name: &'static str,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct StageMetrics {
    pub index: usize,
    pub mode: ExecutionMode,
    pub duration: Duration,
    pub tasks: Vec<TaskMetrics>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub total: Duration,
    pub stages: Vec<StageMetrics>,
}

impl PipelineMetrics {
    pub fn task_duration(&self, name: &str) -> Option<Duration> {
        self.stages
            .iter()
            .flat_map(|stage| stage.tasks.iter())
            .find(|task| task.name == name)
            .map(|task| task.duration)
    }

    pub fn task_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages
            .iter()
            .flat_map(|stage| stage.tasks.iter().map(|t| t.name))
    }
}

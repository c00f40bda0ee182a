//! Per-instance metrics.

use crate::pipeline::PipelineMetrics;
use chrono::{DateTime, Utc};
use flintvm_shared::Outcome;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-stage timings of the last successful boot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootMetrics {
    /// Wall-clock time the boot committed.
    pub completed_at: Option<DateTime<Utc>>,
    pub total: Duration,
    pub validate: Option<Duration>,
    pub transport_claim: Option<Duration>,
    pub vmm_spawn: Option<Duration>,
    pub api_connect: Option<Duration>,
    pub configure: Option<Duration>,
    pub instance_start: Option<Duration>,
}

impl BootMetrics {
    pub(crate) fn from_pipeline(pipeline: &PipelineMetrics, total: Duration) -> Self {
        Self {
            completed_at: Some(Utc::now()),
            total,
            validate: pipeline.task_duration("validate_artifacts"),
            transport_claim: pipeline.task_duration("transport_claim"),
            vmm_spawn: pipeline.task_duration("vmm_spawn"),
            api_connect: pipeline.task_duration("api_connect"),
            configure: pipeline.task_duration("vm_configure"),
            instance_start: pipeline.task_duration("instance_start"),
        }
    }

    pub(crate) fn log(&self, vm_id: &str) {
        let ms = |d: Option<Duration>| d.map(|d| d.as_millis() as u64);
        tracing::info!(
            vm_id = %vm_id,
            total_ms = self.total.as_millis() as u64,
            validate_ms = ?ms(self.validate),
            claim_ms = ?ms(self.transport_claim),
            spawn_ms = ?ms(self.vmm_spawn),
            connect_ms = ?ms(self.api_connect),
            configure_ms = ?ms(self.configure),
            start_ms = ?ms(self.instance_start),
            "VM boot stages"
        );
    }
}

/// Snapshot returned by [`VmInstance::metrics`](super::VmInstance::metrics).
///
/// Counters are monotonic for the life of the instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmMetrics {
    pub boots_attempted: u64,
    pub boots_failed: u64,
    pub management_requests: u64,
    pub console_commands: u64,
    pub operation_errors: u64,
    pub boot: Option<BootMetrics>,
}

#[derive(Debug, Default)]
pub(crate) struct VmMetricsStorage {
    boots_attempted: AtomicU64,
    boots_failed: AtomicU64,
    management_requests: AtomicU64,
    console_commands: AtomicU64,
    operation_errors: AtomicU64,
    boot: Mutex<Option<BootMetrics>>,
}

impl VmMetricsStorage {
    pub fn boot_attempted(&self) {
        self.boots_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn boot_failed(&self) {
        self.boots_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_boot(&self, metrics: BootMetrics) {
        *self.boot.lock() = Some(metrics);
    }

    pub fn management_request(&self) {
        self.management_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn console_command(&self) {
        self.console_commands.fetch_add(1, Ordering::Relaxed);
    }

    /// Count failures; soft failures are not errors.
    pub fn observe<T>(&self, outcome: &Outcome<T>) {
        if outcome.is_failure() {
            self.operation_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> VmMetrics {
        VmMetrics {
            boots_attempted: self.boots_attempted.load(Ordering::Relaxed),
            boots_failed: self.boots_failed.load(Ordering::Relaxed),
            management_requests: self.management_requests.load(Ordering::Relaxed),
            console_commands: self.console_commands.load(Ordering::Relaxed),
            operation_errors: self.operation_errors.load(Ordering::Relaxed),
            boot: self.boot.lock().clone(),
        }
    }
}

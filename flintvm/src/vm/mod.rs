//! VM instances and their lifecycle.
//!
//! - `state`: lifecycle states and ids
//! - `init`: boot orchestration (pipeline tasks, rollback)
//! - `lifecycle`: boot, pause/resume, shutdown
//! - `operations`: management and console calls on a booted VM
//! - `metrics`: per-instance counters and boot timings

mod init;
mod instance;
mod lifecycle;
mod metrics;
mod operations;
mod state;

pub use instance::{VmInstance, VmInstanceBuilder};
pub use metrics::{BootMetrics, VmMetrics};
pub use state::{MAX_VM_ID_LEN, VmId, VmState};

//! Hypervisor controller management.
//!
//! ## Architecture
//!
//! - **VmmController**: spawning (creates a VmmHandler once the control socket exists)
//! - **VmmHandler**: runtime operations on the spawned process (stop, console, pid)
//!
//! [`ProcessSupervisor`] is the controller backed by a [`Host`](crate::host::Host).

mod handler;
mod spawn;
mod supervisor;

use crate::vmm::InstanceSpec;
use async_trait::async_trait;
use flintvm_shared::FlintResult;

pub use handler::{HypervisorHandler, StopOutcome, VmmHandler};
pub use spawn::{LaunchLayout, build_command};
pub use supervisor::ProcessSupervisor;

/// Trait for spawning hypervisors.
#[async_trait]
pub trait VmmController: Send + Sync {
    /// Launch the hypervisor and wait for its control socket.
    ///
    /// On error nothing is left behind: the process is killed and any socket
    /// or config file created for it is removed.
    async fn start(&self, spec: &InstanceSpec) -> FlintResult<Box<dyn VmmHandler>>;
}

//! Hypervisor process supervision.

pub mod controller;

use crate::config::VmConfiguration;
use crate::install::HypervisorInstall;
use crate::options::{TransportOptions, VmOptions};
use crate::vm::VmId;

/// Everything needed to launch one hypervisor process.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub vm_id: VmId,
    pub install: HypervisorInstall,
    pub transport: TransportOptions,
    pub configuration: VmConfiguration,
    pub options: VmOptions,
}

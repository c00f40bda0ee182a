//! Immutable VM configuration.
//!
//! Built once before boot and handed to the hypervisor either through API
//! calls or a config file. Runtime mutations (drive swaps, state changes) go
//! through the management client, never through this object.

use flintvm_shared::{FlintError, FlintResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Upper bound the hypervisor accepts for `vcpu_count`.
pub const MAX_VCPU_COUNT: u8 = 32;

/// Kernel, command line and optional initrd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmBootSource {
    pub kernel_image_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_args: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initrd_path: Option<PathBuf>,
}

impl VmBootSource {
    pub fn new(kernel_image_path: impl Into<PathBuf>) -> Self {
        Self {
            kernel_image_path: kernel_image_path.into(),
            boot_args: None,
            initrd_path: None,
        }
    }

    pub fn boot_args(mut self, args: impl Into<String>) -> Self {
        self.boot_args = Some(args.into());
        self
    }

    pub fn initrd(mut self, path: impl Into<PathBuf>) -> Self {
        self.initrd_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmMachineConfiguration {
    pub mem_size_mib: u32,
    pub vcpu_count: u8,
    /// Simultaneous multithreading. Only honoured by hypervisors that support it.
    #[serde(default)]
    pub smt: bool,
}

impl VmMachineConfiguration {
    pub fn new(mem_size_mib: u32, vcpu_count: u8) -> Self {
        Self {
            mem_size_mib,
            vcpu_count,
            smt: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmDrive {
    pub drive_id: String,
    pub is_root_device: bool,
    pub path_on_host: PathBuf,
    #[serde(default)]
    pub is_read_only: bool,
}

impl VmDrive {
    pub fn new(
        drive_id: impl Into<String>,
        is_root_device: bool,
        path_on_host: impl Into<PathBuf>,
    ) -> Self {
        Self {
            drive_id: drive_id.into(),
            is_root_device,
            path_on_host: path_on_host.into(),
            is_read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.is_read_only = true;
        self
    }
}

/// Validated VM configuration.
///
/// Invariants: exactly one drive is the root device, drive ids are unique and
/// non-empty, memory is non-zero and the vCPU count is within
/// `1..=MAX_VCPU_COUNT`. Deserialization goes through the same validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawVmConfiguration", into = "RawVmConfiguration")]
pub struct VmConfiguration {
    boot_source: VmBootSource,
    machine_configuration: VmMachineConfiguration,
    drives: Vec<VmDrive>,
}

#[derive(Serialize, Deserialize)]
struct RawVmConfiguration {
    #[serde(rename = "boot-source")]
    boot_source: VmBootSource,
    #[serde(rename = "machine-config")]
    machine_configuration: VmMachineConfiguration,
    drives: Vec<VmDrive>,
}

impl TryFrom<RawVmConfiguration> for VmConfiguration {
    type Error = FlintError;

    fn try_from(raw: RawVmConfiguration) -> FlintResult<Self> {
        VmConfiguration::new(raw.boot_source, raw.machine_configuration, raw.drives)
    }
}

impl From<VmConfiguration> for RawVmConfiguration {
    fn from(config: VmConfiguration) -> Self {
        RawVmConfiguration {
            boot_source: config.boot_source,
            machine_configuration: config.machine_configuration,
            drives: config.drives,
        }
    }
}

impl VmConfiguration {
    pub fn new(
        boot_source: VmBootSource,
        machine_configuration: VmMachineConfiguration,
        drives: Vec<VmDrive>,
    ) -> FlintResult<Self> {
        validate_machine(&machine_configuration)?;
        validate_drives(&drives)?;

        if boot_source.kernel_image_path.as_os_str().is_empty() {
            return Err(FlintError::InvalidConfiguration(
                "kernel image path must not be empty".into(),
            ));
        }

        Ok(Self {
            boot_source,
            machine_configuration,
            drives,
        })
    }

    pub fn boot_source(&self) -> &VmBootSource {
        &self.boot_source
    }

    pub fn machine_configuration(&self) -> &VmMachineConfiguration {
        &self.machine_configuration
    }

    pub fn drives(&self) -> &[VmDrive] {
        &self.drives
    }

    pub fn root_drive(&self) -> &VmDrive {
        // Construction guarantees exactly one root drive.
        self.drives
            .iter()
            .find(|d| d.is_root_device)
            .unwrap_or(&self.drives[0])
    }

    pub fn drive(&self, drive_id: &str) -> Option<&VmDrive> {
        self.drives.iter().find(|d| d.drive_id == drive_id)
    }

    /// Serialize in the hypervisor's `--config-file` layout.
    pub fn to_config_file_json(&self) -> FlintResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn validate_machine(machine: &VmMachineConfiguration) -> FlintResult<()> {
    if machine.mem_size_mib == 0 {
        return Err(FlintError::InvalidConfiguration(
            "mem_size_mib must be greater than zero".into(),
        ));
    }
    if machine.vcpu_count == 0 || machine.vcpu_count > MAX_VCPU_COUNT {
        return Err(FlintError::InvalidConfiguration(format!(
            "vcpu_count must be between 1 and {}, got {}",
            MAX_VCPU_COUNT, machine.vcpu_count
        )));
    }
    Ok(())
}

fn validate_drives(drives: &[VmDrive]) -> FlintResult<()> {
    let mut seen = HashSet::with_capacity(drives.len());
    for drive in drives {
        if drive.drive_id.is_empty() {
            return Err(FlintError::InvalidConfiguration(
                "drive id must not be empty".into(),
            ));
        }
        if !seen.insert(drive.drive_id.as_str()) {
            return Err(FlintError::InvalidConfiguration(format!(
                "duplicate drive id '{}'",
                drive.drive_id
            )));
        }
    }

    let roots = drives.iter().filter(|d| d.is_root_device).count();
    if roots != 1 {
        return Err(FlintError::InvalidConfiguration(format!(
            "exactly one drive must be the root device, found {}",
            roots
        )));
    }
    Ok(())
}

//! flintvm - lifecycle and control-plane client for microVM hypervisors.
//!
//! A [`VmInstance`] owns one hypervisor process. It launches the process
//! (directly or through a jailer), waits for the control socket, pushes the
//! VM configuration over the management API and boots the guest. Once
//! running, the instance exposes the management API and a serial-console
//! command channel until it is shut down.
//!
//! ```no_run
//! use flintvm::{HypervisorInstall, VmConfiguration, VmBootSource, VmDrive,
//!     VmInstance, VmMachineConfiguration};
//!
//! # async fn demo() -> flintvm::FlintResult<()> {
//! let config = VmConfiguration::new(
//!     VmBootSource::new("/images/vmlinux").boot_args("console=ttyS0 reboot=k panic=1"),
//!     VmMachineConfiguration::new(256, 1),
//!     vec![VmDrive::new("rootfs", true, "/images/rootfs.ext4")],
//! )?;
//! let install = HypervisorInstall::new("v1.7.0", "/usr/bin/firecracker");
//!
//! let vm = VmInstance::builder(config, install).build()?;
//! vm.boot().await.into_result()?;
//! let out = vm.run_buffered_command("uname -a").await.into_result()?;
//! println!("{out:?}");
//! let _ = vm.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod host;
pub mod install;
pub mod logging;
pub mod management;
pub mod options;
pub mod pipeline;
pub mod tty;
pub mod util;
pub mod vm;
pub mod vmm;

pub use config::{VmBootSource, VmConfiguration, VmDrive, VmMachineConfiguration};
pub use flintvm_shared::{ErrorKind, FlintError, FlintResult, Outcome, SoftFailure, Transport};
pub use host::{Host, LocalHost};
pub use install::{HypervisorInstall, InstallRegistry, StaticRegistry};
pub use logging::{LogGuard, LoggingOptions, init_logging};
pub use management::{ActionType, ApiSchema, ManagementClient, StateTarget, VmInfo};
pub use options::{BootMethod, JailerOptions, TransportOptions, VmOptions};
pub use tty::{CommandOutput, TtyClient};
pub use vm::{BootMetrics, VmId, VmInstance, VmInstanceBuilder, VmMetrics, VmState};
pub use vmm::controller::{ProcessSupervisor, StopOutcome, VmmController, VmmHandler};

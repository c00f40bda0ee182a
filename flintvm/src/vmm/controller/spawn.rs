//! Command-line and path construction for the hypervisor process.

use crate::host::{Host, ProcessSpec};
use crate::options::BootMethod;
use crate::vmm::InstanceSpec;
use flintvm_shared::{FlintError, FlintResult, Transport};
use std::path::PathBuf;

/// Host paths owned by one launched hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchLayout {
    /// Socket path as seen from the host.
    pub socket_path: PathBuf,
    /// Value passed to `--api-sock`. Inside a jail this is chroot-relative.
    pub api_sock_arg: String,
    /// Claim file that reserves `socket_path` across instances.
    pub lock_path: PathBuf,
    /// Config file for [`BootMethod::ConfigFile`].
    pub config_file: Option<PathBuf>,
}

impl LaunchLayout {
    /// Resolve the paths for `spec`.
    ///
    /// With a jailer the socket lives under
    /// `<chroot_base>/<exec name>/<vm id>/root/`, wherever the transport
    /// options point.
    pub fn resolve(spec: &InstanceSpec, host: &dyn Host) -> FlintResult<Self> {
        spec.transport.validate()?;
        let filename = spec.transport.socket_filename.as_str();

        let (socket_path, api_sock_arg) = match &spec.install.jailer_binary {
            Some(_) => {
                if spec.options.boot_method == BootMethod::ConfigFile {
                    return Err(FlintError::InvalidConfiguration(
                        "config-file boot is not supported together with a jailer".into(),
                    ));
                }
                let exec_name = spec
                    .install
                    .hypervisor_binary
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| {
                        FlintError::InvalidConfiguration(format!(
                            "hypervisor binary path {} has no file name",
                            spec.install.hypervisor_binary.display()
                        ))
                    })?;

                let jailer = spec.options.jailer_or_default();
                let mut root = jailer.chroot_base_dir.clone();
                for segment in [exec_name, spec.vm_id.as_str(), "root"] {
                    root = host.path_join(&root, segment);
                }
                (host.path_join(&root, filename), format!("/{filename}"))
            }
            None => {
                let path = host.path_join(&spec.transport.socket_directory, filename);
                let arg = path.display().to_string();
                (path, arg)
            }
        };

        let lock_path = PathBuf::from(format!("{}.lock", socket_path.display()));
        let config_file = (spec.options.boot_method == BootMethod::ConfigFile)
            .then(|| PathBuf::from(format!("{}.json", socket_path.display())));

        Ok(Self {
            socket_path,
            api_sock_arg,
            lock_path,
            config_file,
        })
    }

    pub fn transport(&self) -> Transport {
        Transport::unix(self.socket_path.clone())
    }

    /// Directory that must exist before the hypervisor can bind its socket.
    pub fn socket_directory(&self) -> Option<PathBuf> {
        self.socket_path.parent().map(|p| p.to_path_buf())
    }
}

/// Build the process invocation for `spec`.
pub fn build_command(spec: &InstanceSpec, layout: &LaunchLayout) -> ProcessSpec {
    let vm_id = spec.vm_id.to_string();

    let (program, args) = match &spec.install.jailer_binary {
        Some(jailer_binary) => {
            let jailer = spec.options.jailer_or_default();
            let args = vec![
                "--id".to_string(),
                vm_id.clone(),
                "--exec-file".to_string(),
                spec.install.hypervisor_binary.display().to_string(),
                "--uid".to_string(),
                jailer.uid.to_string(),
                "--gid".to_string(),
                jailer.gid.to_string(),
                "--chroot-base-dir".to_string(),
                jailer.chroot_base_dir.display().to_string(),
                "--".to_string(),
                "--api-sock".to_string(),
                layout.api_sock_arg.clone(),
            ];
            (jailer_binary.clone(), args)
        }
        None => {
            let mut args = vec![
                "--api-sock".to_string(),
                layout.api_sock_arg.clone(),
                "--id".to_string(),
                vm_id.clone(),
            ];
            if let Some(config_file) = &layout.config_file {
                args.push("--config-file".to_string());
                args.push(config_file.display().to_string());
            }
            (spec.install.hypervisor_binary.clone(), args)
        }
    };

    ProcessSpec {
        program,
        args,
        env: Vec::new(),
        label: vm_id,
    }
}

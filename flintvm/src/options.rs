//! Per-instance options: transport placement, sandboxing and timeouts.

use flintvm_shared::{FlintError, FlintResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables consulted by [`VmOptions::with_env_overrides`].
pub mod env {
    pub const BOOT_TIMEOUT_MS: &str = "FLINTVM_BOOT_TIMEOUT_MS";
    pub const SHUTDOWN_GRACE_MS: &str = "FLINTVM_SHUTDOWN_GRACE_MS";
    pub const COMMAND_TIMEOUT_MS: &str = "FLINTVM_COMMAND_TIMEOUT_MS";
    pub const REQUEST_TIMEOUT_MS: &str = "FLINTVM_REQUEST_TIMEOUT_MS";
}

/// Where the hypervisor should create its control socket.
///
/// Two instances on one host must never share a socket path; use
/// [`TransportOptions::unique_in`] unless the caller manages names itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOptions {
    pub socket_filename: String,
    pub socket_directory: PathBuf,
}

impl TransportOptions {
    pub fn new(socket_filename: impl Into<String>, socket_directory: impl Into<PathBuf>) -> Self {
        Self {
            socket_filename: socket_filename.into(),
            socket_directory: socket_directory.into(),
        }
    }

    /// Socket with a random UUID filename inside `directory`.
    pub fn unique_in(directory: impl Into<PathBuf>) -> Self {
        Self::new(
            format!("{}.sock", uuid::Uuid::new_v4()),
            directory.into(),
        )
    }

    pub fn validate(&self) -> FlintResult<()> {
        if self.socket_filename.is_empty() || self.socket_filename.contains('/') {
            return Err(FlintError::InvalidConfiguration(format!(
                "socket filename must be a single non-empty path component, got '{}'",
                self.socket_filename
            )));
        }
        if !self.socket_directory.is_absolute() {
            return Err(FlintError::InvalidConfiguration(format!(
                "socket directory must be absolute, got {}",
                self.socket_directory.display()
            )));
        }
        Ok(())
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::unique_in(default_socket_directory())
    }
}

fn default_socket_directory() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(std::env::temp_dir)
}

/// Sandboxing parameters handed to the jailer binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JailerOptions {
    pub uid: u32,
    pub gid: u32,
    pub chroot_base_dir: PathBuf,
}

impl Default for JailerOptions {
    fn default() -> Self {
        Self {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            chroot_base_dir: PathBuf::from("/srv/jailer"),
        }
    }
}

/// How the configuration reaches the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootMethod {
    /// Push boot source, machine config and drives over the API, then start.
    #[default]
    ApiCalls,
    /// Write a config file and pass it on the command line; the guest starts on its own.
    ConfigFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmOptions {
    /// Bound on the whole boot sequence, socket wait included.
    #[serde(with = "duration_ms")]
    pub boot_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub socket_poll_interval: Duration,
    /// Bound on a single management round trip.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// Time between SIGTERM and SIGKILL.
    #[serde(with = "duration_ms")]
    pub shutdown_grace: Duration,
    /// Ask the guest to shut down (Ctrl+Alt+Del) before signalling the process.
    pub guest_shutdown: bool,
    #[serde(with = "duration_ms")]
    pub guest_shutdown_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub command_timeout: Duration,
    pub boot_method: BootMethod,
    /// Required when the install carries a jailer binary; defaults are used otherwise.
    pub jailer: Option<JailerOptions>,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            boot_timeout: Duration::from_secs(10),
            socket_poll_interval: Duration::from_millis(20),
            request_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(3),
            guest_shutdown: true,
            guest_shutdown_timeout: Duration::from_secs(2),
            command_timeout: Duration::from_secs(10),
            boot_method: BootMethod::ApiCalls,
            jailer: None,
        }
    }
}

impl VmOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> FlintResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FlintError::InvalidConfiguration(format!(
                "failed to read options file {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            FlintError::InvalidConfiguration(format!(
                "invalid options file {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn with_env_overrides(self) -> FlintResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> FlintResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |key: &str| -> FlintResult<Option<Duration>> {
            match lookup(key) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(|ms| Some(Duration::from_millis(ms)))
                    .map_err(|_| {
                        FlintError::InvalidConfiguration(format!(
                            "{key} must be an integer number of milliseconds, got '{value}'"
                        ))
                    }),
            }
        };

        if let Some(d) = millis(env::BOOT_TIMEOUT_MS)? {
            self.boot_timeout = d;
        }
        if let Some(d) = millis(env::SHUTDOWN_GRACE_MS)? {
            self.shutdown_grace = d;
        }
        if let Some(d) = millis(env::COMMAND_TIMEOUT_MS)? {
            self.command_timeout = d;
        }
        if let Some(d) = millis(env::REQUEST_TIMEOUT_MS)? {
            self.request_timeout = d;
        }
        Ok(self)
    }

    pub fn jailer_or_default(&self) -> JailerOptions {
        self.jailer.clone().unwrap_or_default()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_unique_transport_paths_differ() {
        let a = TransportOptions::unique_in("/tmp");
        let b = TransportOptions::unique_in("/tmp");
        assert_ne!(a.socket_filename, b.socket_filename);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_transport_validation() {
        assert!(TransportOptions::new("", "/tmp").validate().is_err());
        assert!(TransportOptions::new("a/b.sock", "/tmp").validate().is_err());
        assert!(TransportOptions::new("a.sock", "relative").validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{"boot_timeout": 2500, "boot_method": "config_file"}"#).unwrap();

        let options = VmOptions::load(&path).unwrap();
        assert_eq!(options.boot_timeout, Duration::from_millis(2500));
        assert_eq!(options.boot_method, BootMethod::ConfigFile);
        assert_eq!(options.shutdown_grace, VmOptions::default().shutdown_grace);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> =
            HashMap::from([(env::SHUTDOWN_GRACE_MS, "150"), (env::COMMAND_TIMEOUT_MS, " 900 ")]);
        let options = VmOptions::default()
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(options.shutdown_grace, Duration::from_millis(150));
        assert_eq!(options.command_timeout, Duration::from_millis(900));

        let err = VmOptions::default()
            .apply_overrides(|k| (k == env::BOOT_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(env::BOOT_TIMEOUT_MS));
    }
}

//! Resolved hypervisor installations.
//!
//! Locating binaries for a version is the installation registry's job; the
//! runtime only consumes the resolved paths.

use async_trait::async_trait;
use flintvm_shared::{FlintError, FlintResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HypervisorInstall {
    /// Version tag such as `v1.7.0`. Selects the control protocol schema.
    pub version: String,
    pub hypervisor_binary: PathBuf,
    /// When set, the hypervisor is launched through this sandboxing wrapper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jailer_binary: Option<PathBuf>,
}

impl HypervisorInstall {
    pub fn new(version: impl Into<String>, hypervisor_binary: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            hypervisor_binary: hypervisor_binary.into(),
            jailer_binary: None,
        }
    }

    pub fn with_jailer(mut self, jailer_binary: impl Into<PathBuf>) -> Self {
        self.jailer_binary = Some(jailer_binary.into());
        self
    }

    pub fn is_jailed(&self) -> bool {
        self.jailer_binary.is_some()
    }
}

/// Resolves a version identifier to an installed hypervisor.
#[async_trait]
pub trait InstallRegistry: Send + Sync {
    async fn resolve(&self, version: &str) -> FlintResult<HypervisorInstall>;
}

/// Registry backed by a fixed set of installs.
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry {
    installs: HashMap<String, HypervisorInstall>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, install: HypervisorInstall) -> &mut Self {
        self.installs.insert(install.version.clone(), install);
        self
    }
}

#[async_trait]
impl InstallRegistry for StaticRegistry {
    async fn resolve(&self, version: &str) -> FlintResult<HypervisorInstall> {
        self.installs.get(version).cloned().ok_or_else(|| {
            FlintError::InvalidConfiguration(format!(
                "no hypervisor installed for version {version}"
            ))
        })
    }
}

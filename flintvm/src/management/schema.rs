//! Versioned request layout.
//!
//! Paths and field names belong to the hypervisor, and they move between
//! releases. Everything version-dependent is decided here, keyed by the
//! install's version tag.

use super::protocol::{ActionType, ApiRequest, StateTarget};
use crate::config::{VmBootSource, VmConfiguration, VmDrive, VmMachineConfiguration};
use flintvm_shared::{FlintError, FlintResult};
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiDialect {
    /// Pre-1.0 releases: SMT is spelled `ht_enabled`.
    Legacy,
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiSchema {
    major: u32,
    minor: u32,
    patch: u32,
    dialect: ApiDialect,
}

impl ApiSchema {
    /// Select the schema for a version tag such as `v1.7.0`.
    ///
    /// Anything that is not `[v]MAJOR.MINOR.PATCH[-suffix]` is rejected rather
    /// than guessed at.
    pub fn for_version(version: &str) -> FlintResult<Self> {
        let invalid = || {
            FlintError::InvalidConfiguration(format!(
                "unrecognised hypervisor version '{version}', expected vMAJOR.MINOR.PATCH"
            ))
        };

        let trimmed = version.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = trimmed.split_once('-').map_or(trimmed, |(core, _)| core);

        let mut parts = core.split('.');
        let mut next = || -> FlintResult<u32> {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(invalid)
        };
        let (major, minor, patch) = (next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }

        let dialect = if major < 1 {
            ApiDialect::Legacy
        } else {
            ApiDialect::Current
        };

        Ok(Self {
            major,
            minor,
            patch,
            dialect,
        })
    }

    pub fn dialect(&self) -> ApiDialect {
        self.dialect
    }

    fn smt_field(&self) -> &'static str {
        match self.dialect {
            ApiDialect::Legacy => "ht_enabled",
            ApiDialect::Current => "smt",
        }
    }

    pub fn get_info(&self) -> ApiRequest {
        ApiRequest::get("/")
    }

    pub fn get_version(&self) -> ApiRequest {
        ApiRequest::get("/version")
    }

    pub fn get_machine_config(&self) -> ApiRequest {
        ApiRequest::get("/machine-config")
    }

    pub fn put_boot_source(&self, boot: &VmBootSource) -> FlintResult<ApiRequest> {
        Ok(ApiRequest::put("/boot-source", serde_json::to_value(boot)?))
    }

    pub fn put_machine_config(&self, machine: &VmMachineConfiguration) -> ApiRequest {
        ApiRequest::put("/machine-config", self.machine_config_body(machine))
    }

    pub fn put_drive(&self, drive: &VmDrive) -> FlintResult<ApiRequest> {
        Ok(ApiRequest::put(
            format!("/drives/{}", drive.drive_id),
            serde_json::to_value(drive)?,
        ))
    }

    pub fn patch_drive(&self, drive_id: &str, path_on_host: &Path) -> ApiRequest {
        ApiRequest::patch(
            format!("/drives/{drive_id}"),
            json!({
                "drive_id": drive_id,
                "path_on_host": path_on_host,
            }),
        )
    }

    pub fn patch_state(&self, target: StateTarget) -> ApiRequest {
        ApiRequest::patch("/vm", json!({ "state": target }))
    }

    pub fn put_action(&self, action: ActionType) -> ApiRequest {
        ApiRequest::put("/actions", json!({ "action_type": action }))
    }

    fn machine_config_body(&self, machine: &VmMachineConfiguration) -> Value {
        let mut body = json!({
            "vcpu_count": machine.vcpu_count,
            "mem_size_mib": machine.mem_size_mib,
        });
        body[self.smt_field()] = Value::Bool(machine.smt);
        body
    }

    /// Decode a `GET /machine-config` body.
    pub fn parse_machine_config(&self, body: &[u8]) -> FlintResult<VmMachineConfiguration> {
        #[derive(Deserialize)]
        struct Wire {
            vcpu_count: u8,
            mem_size_mib: u32,
            #[serde(default, alias = "ht_enabled")]
            smt: bool,
        }

        let wire: Wire = serde_json::from_slice(body)
            .map_err(|e| FlintError::Protocol(format!("malformed machine-config response: {e}")))?;
        Ok(VmMachineConfiguration {
            mem_size_mib: wire.mem_size_mib,
            vcpu_count: wire.vcpu_count,
            smt: wire.smt,
        })
    }

    /// Serialize a configuration for the `--config-file` boot method.
    pub fn config_file_json(&self, config: &VmConfiguration) -> FlintResult<String> {
        let mut value = serde_json::to_value(config)?;
        value["machine-config"] = self.machine_config_body(config.machine_configuration());
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

impl fmt::Display for ApiSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

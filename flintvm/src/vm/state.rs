//! Lifecycle states and instance identifiers.

use flintvm_shared::{FlintError, FlintResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest id the hypervisor accepts for `--id`.
pub const MAX_VM_ID_LEN: usize = 64;

/// Lifecycle state of a [`VmInstance`](super::VmInstance).
///
/// ```text
/// Uninitialized → Booting → Running ⇄ Paused
///       ↑            │         │        │
///       └── failure ─┘         └────┬───┘
///                                   ↓
///                 ShuttingDown → Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmState {
    Uninitialized,
    Booting,
    Running,
    Paused,
    ShuttingDown,
    Terminated,
}

impl VmState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VmState::Terminated)
    }

    /// A hypervisor process may exist in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            VmState::Booting | VmState::Running | VmState::Paused | VmState::ShuttingDown
        )
    }

    /// The management channel is connected and usable.
    pub fn is_connected(&self) -> bool {
        matches!(self, VmState::Running | VmState::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VmState::Uninitialized => "uninitialized",
            VmState::Booting => "booting",
            VmState::Running => "running",
            VmState::Paused => "paused",
            VmState::ShuttingDown => "shutting down",
            VmState::Terminated => "terminated",
        }
    }

    /// Error for `operation` attempted in this state.
    pub(crate) fn reject(&self, operation: &str) -> FlintError {
        if self.is_terminal() {
            FlintError::terminal(operation)
        } else {
            FlintError::illegal_state(operation, self)
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a VM instance, unique among instances running on a host.
///
/// ASCII alphanumerics and `-`, at most [`MAX_VM_ID_LEN`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VmId(String);

impl VmId {
    /// Fresh ULID-based id.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    pub fn parse(id: impl Into<String>) -> FlintResult<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_VM_ID_LEN {
            return Err(FlintError::InvalidConfiguration(format!(
                "VM id must be 1 to {MAX_VM_ID_LEN} characters, got {}",
                id.len()
            )));
        }
        if let Some(bad) = id.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
            return Err(FlintError::InvalidConfiguration(format!(
                "VM id '{id}' contains invalid character '{bad}'"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VmId {
    type Err = FlintError;

    fn from_str(s: &str) -> FlintResult<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VmId {
    type Error = FlintError;

    fn try_from(value: String) -> FlintResult<Self> {
        Self::parse(value)
    }
}

impl From<VmId> for String {
    fn from(id: VmId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flintvm_shared::ErrorKind;

    #[test]
    fn test_generated_ids_are_valid_and_distinct() {
        let a = VmId::generate();
        let b = VmId::generate();
        assert_ne!(a, b);
        assert!(VmId::parse(a.as_str()).is_ok());
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_id_validation() {
        assert!(VmId::parse("web-01").is_ok());
        assert!(VmId::parse("").is_err());
        assert!(VmId::parse("a/b").is_err());
        assert!(VmId::parse("x".repeat(65)).is_err());
        assert!(serde_json::from_str::<VmId>("\"bad id\"").is_err());
    }

    #[test]
    fn test_reject_classifies_terminal_state() {
        assert_eq!(
            VmState::Terminated.reject("pause").kind(),
            ErrorKind::TerminalState
        );
        let err = VmState::Booting.reject("resume");
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert_eq!(err.to_string(), "cannot resume while VM is booting");
    }
}

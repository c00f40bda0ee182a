use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Local channel carrying the control protocol between host and hypervisor.
///
/// The hypervisor creates the endpoint itself at the path chosen by the
/// orchestrator; this type only describes where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transport {
    Unix { socket_path: PathBuf },
}

impl Transport {
    pub fn unix(socket_path: impl Into<PathBuf>) -> Self {
        Transport::Unix {
            socket_path: socket_path.into(),
        }
    }

    /// Filesystem path of the endpoint as seen from the host.
    pub fn path(&self) -> &Path {
        match self {
            Transport::Unix { socket_path } => socket_path,
        }
    }

    pub fn to_uri(&self) -> String {
        match self {
            Transport::Unix { socket_path } => format!("unix://{}", socket_path.display()),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

//! Host capability boundary.
//!
//! The lifecycle core never touches processes or the filesystem directly; it
//! goes through a [`Host`] handed in at construction. [`LocalHost`] runs
//! everything on this machine. Other environments (a remote agent, a test
//! double) implement the same traits.

mod local;

pub use local::LocalHost;

use crate::management::ApiTransport;
use async_trait::async_trait;
use flintvm_shared::{FlintResult, Transport};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Identifier used to tag the process's log lines.
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// Polite request to exit (SIGTERM).
    Terminate,
    /// Non-ignorable kill (SIGKILL).
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Byte streams attached to the guest's serial console.
pub struct ConsoleStreams {
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    pub output: Box<dyn AsyncRead + Send + Unpin>,
}

impl fmt::Debug for ConsoleStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleStreams").finish_non_exhaustive()
    }
}

/// A process launched through a [`Host`].
///
/// Dropping one need not kill the process; the runtime kills whatever it
/// still owns before letting go of it.
#[async_trait]
pub trait HostProcess: Send {
    /// OS process id, `None` once the process has been reaped.
    fn pid(&self) -> Option<u32>;

    fn signal(&mut self, signal: ProcessSignal) -> FlintResult<()>;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> FlintResult<Option<ProcessExit>>;

    /// Wait for exit for at most `timeout`. `Ok(None)` means still running.
    async fn wait(&mut self, timeout: Duration) -> FlintResult<Option<ProcessExit>>;

    /// Take the console streams. Yields `Some` at most once.
    fn take_console(&mut self) -> Option<ConsoleStreams>;
}

/// Execution environment capabilities required by the runtime.
#[async_trait]
pub trait Host: Send + Sync {
    async fn spawn_process(&self, spec: ProcessSpec) -> FlintResult<Box<dyn HostProcess>>;

    fn path_join(&self, base: &Path, segment: &str) -> PathBuf {
        base.join(segment)
    }

    async fn path_exists(&self, path: &Path) -> bool;

    async fn create_dir_all(&self, path: &Path) -> FlintResult<()>;

    async fn write_file(&self, path: &Path, contents: &[u8]) -> FlintResult<()>;

    /// Atomically create an empty file. `Ok(false)` if it already exists.
    async fn create_new_file(&self, path: &Path) -> FlintResult<bool>;

    /// Remove a file. A missing file is not an error.
    async fn remove_file(&self, path: &Path) -> FlintResult<()>;

    /// Open a control-protocol channel to a hypervisor listening on `transport`.
    async fn connect(
        &self,
        transport: &Transport,
        request_timeout: Duration,
    ) -> FlintResult<Box<dyn ApiTransport>>;
}

//! Error taxonomy for the microVM control plane.

use std::time::Duration;
use thiserror::Error;

pub type FlintResult<T> = Result<T, FlintError>;

/// Coarse classification of a [`FlintError`].
///
/// Callers that only care about the category of a failure (retry the boot,
/// surface a protocol bug, give up on a dead instance) match on this instead
/// of the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConfiguration,
    BootTimeout,
    Spawn,
    ProtocolError,
    TransportError,
    IllegalState,
    CommandTimeout,
    TerminalState,
    Cancelled,
    Internal,
}

#[derive(Error, Debug)]
pub enum FlintError {
    /// The VM configuration or options failed validation before anything was spawned.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The hypervisor socket or the configured guest was not ready in time.
    #[error("VM on {socket} was not ready within {}ms", waited.as_millis())]
    BootTimeout { socket: String, waited: Duration },

    /// The hypervisor process could not be launched or exited during boot.
    #[error("failed to launch hypervisor: {0}")]
    Spawn(String),

    /// A response could not be decoded or did not match the protocol contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The hypervisor understood the request and rejected it.
    #[error("hypervisor rejected request (HTTP {status}): {fault_message}")]
    Api { status: u16, fault_message: String },

    /// The channel to the hypervisor is closed, unreachable or already claimed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The operation is not valid in the instance's current lifecycle state.
    #[error("cannot {operation} while VM is {state}")]
    IllegalState { operation: String, state: String },

    /// No end-of-output sentinel was observed on the console in time.
    #[error("console command timed out after {}ms", timeout.as_millis())]
    CommandTimeout {
        timeout: Duration,
        partial_output: String,
    },

    /// The instance has been shut down and is permanently inert.
    #[error("cannot {operation}: VM is terminated")]
    TerminalState { operation: String },

    /// The operation was abandoned because a shutdown was requested.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FlintError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlintError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            FlintError::BootTimeout { .. } => ErrorKind::BootTimeout,
            FlintError::Spawn(_) => ErrorKind::Spawn,
            FlintError::Protocol(_) | FlintError::Api { .. } | FlintError::Json(_) => {
                ErrorKind::ProtocolError
            }
            FlintError::Transport(_) | FlintError::Io(_) => ErrorKind::TransportError,
            FlintError::IllegalState { .. } => ErrorKind::IllegalState,
            FlintError::CommandTimeout { .. } => ErrorKind::CommandTimeout,
            FlintError::TerminalState { .. } => ErrorKind::TerminalState,
            FlintError::Cancelled(_) => ErrorKind::Cancelled,
            FlintError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn illegal_state(operation: impl Into<String>, state: impl ToString) -> Self {
        FlintError::IllegalState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    pub fn terminal(operation: impl Into<String>) -> Self {
        FlintError::TerminalState {
            operation: operation.into(),
        }
    }

    /// Output buffered before a console timeout, if any.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            FlintError::CommandTimeout { partial_output, .. } => Some(partial_output),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_errors_are_protocol_kind() {
        let err = FlintError::Api {
            status: 400,
            fault_message: "bad drive".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert!(err.to_string().contains("bad drive"));
    }

    #[test]
    fn test_io_errors_are_transport_kind() {
        let err = FlintError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert_eq!(err.kind(), ErrorKind::TransportError);
    }

    #[test]
    fn test_partial_output_only_on_command_timeout() {
        let err = FlintError::CommandTimeout {
            timeout: Duration::from_secs(1),
            partial_output: "hel".into(),
        };
        assert_eq!(err.partial_output(), Some("hel"));
        assert_eq!(FlintError::terminal("pause").partial_output(), None);
    }
}

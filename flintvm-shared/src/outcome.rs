//! Tri-state operation outcome.
//!
//! Every public control-plane operation reports through [`Outcome`] instead of
//! a bare `Result`, because a third case matters to callers: the operation
//! reached the requested end state without doing new work (pausing an already
//! paused VM) or reached it only by escalating (killing a hypervisor that
//! ignored SIGTERM). Those are [`Outcome::SoftFailure`]s: worth observing, not
//! worth reacting to.
//!
//! ```
//! use flintvm_shared::{Outcome, SoftFailure};
//!
//! let pause: Outcome<()> = Outcome::Success(());
//! let resume: Outcome<()> = Outcome::SoftFailure(SoftFailure::no_op("already running"));
//!
//! let combined = pause.chain_with(resume);
//! assert!(combined.is_soft_failure());
//! ```

use std::fmt;
use std::time::Duration;

use crate::errors::{FlintError, FlintResult};

/// Why an operation ended in an equivalent state without doing the work itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftFailure {
    /// The requested state was already in effect.
    NoOp { reason: String },
    /// The hypervisor outlived its grace period and had to be SIGKILLed.
    ForcedKill { pid: Option<u32>, grace: Duration },
}

impl SoftFailure {
    pub fn no_op(reason: impl Into<String>) -> Self {
        SoftFailure::NoOp {
            reason: reason.into(),
        }
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self, SoftFailure::NoOp { .. })
    }

    pub fn is_forced_kill(&self) -> bool {
        matches!(self, SoftFailure::ForcedKill { .. })
    }
}

impl fmt::Display for SoftFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftFailure::NoOp { reason } => write!(f, "no-op: {reason}"),
            SoftFailure::ForcedKill { pid, grace } => match pid {
                Some(pid) => write!(
                    f,
                    "process {pid} force-killed after {}ms grace period",
                    grace.as_millis()
                ),
                None => write!(
                    f,
                    "process force-killed after {}ms grace period",
                    grace.as_millis()
                ),
            },
        }
    }
}

#[must_use = "an Outcome may carry a failure that should be inspected"]
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    SoftFailure(SoftFailure),
    Failure(FlintError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_soft_failure(&self) -> bool {
        matches!(self, Outcome::SoftFailure(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    /// Sequence an already-computed outcome after this one.
    ///
    /// The result is `other` if `self` succeeded, otherwise the first
    /// non-success (`self`), re-typed.
    pub fn chain_with<U>(self, other: Outcome<U>) -> Outcome<U> {
        match self {
            Outcome::Success(_) => other,
            Outcome::SoftFailure(soft) => Outcome::SoftFailure(soft),
            Outcome::Failure(err) => Outcome::Failure(err),
        }
    }

    /// Lazily sequence a dependent operation; `f` only runs on success.
    pub fn and_then<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> Outcome<U>,
    {
        match self {
            Outcome::Success(value) => f(value),
            Outcome::SoftFailure(soft) => Outcome::SoftFailure(soft),
            Outcome::Failure(err) => Outcome::Failure(err),
        }
    }

    pub fn map<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::SoftFailure(soft) => Outcome::SoftFailure(soft),
            Outcome::Failure(err) => Outcome::Failure(err),
        }
    }

    pub fn if_success<F>(self, f: F) -> Self
    where
        F: FnOnce(&T),
    {
        if let Outcome::Success(value) = &self {
            f(value);
        }
        self
    }

    pub fn if_soft_failure<F>(self, f: F) -> Self
    where
        F: FnOnce(&SoftFailure),
    {
        if let Outcome::SoftFailure(soft) = &self {
            f(soft);
        }
        self
    }

    pub fn if_error<F>(self, f: F) -> Self
    where
        F: FnOnce(&FlintError),
    {
        if let Outcome::Failure(err) = &self {
            f(err);
        }
        self
    }

    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn soft_failure(&self) -> Option<&SoftFailure> {
        match self {
            Outcome::SoftFailure(soft) => Some(soft),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FlintError> {
        match self {
            Outcome::Failure(err) => Some(err),
            _ => None,
        }
    }

    /// Collapse into a `Result`, treating a soft failure as `Ok(None)`.
    pub fn into_result(self) -> FlintResult<Option<T>> {
        match self {
            Outcome::Success(value) => Ok(Some(value)),
            Outcome::SoftFailure(_) => Ok(None),
            Outcome::Failure(err) => Err(err),
        }
    }
}

impl<T> From<FlintResult<T>> for Outcome<T> {
    fn from(result: FlintResult<T>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::Failure(err),
        }
    }
}

impl<T> From<FlintError> for Outcome<T> {
    fn from(err: FlintError) -> Self {
        Outcome::Failure(err)
    }
}

impl<T> From<SoftFailure> for Outcome<T> {
    fn from(soft: SoftFailure) -> Self {
        Outcome::SoftFailure(soft)
    }
}

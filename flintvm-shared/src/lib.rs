//! Types shared between the flintvm runtime and its callers.
//!
//! - `errors`: the failure taxonomy every control-plane operation reports against
//! - `outcome`: the tri-state `Outcome<T>` returned by public operations
//! - `transport`: descriptor of the local channel carrying the control protocol

pub mod errors;
pub mod outcome;
pub mod transport;

pub use errors::{ErrorKind, FlintError, FlintResult};
pub use outcome::{Outcome, SoftFailure};
pub use transport::Transport;

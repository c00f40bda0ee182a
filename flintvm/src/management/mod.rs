//! Control-protocol client.
//!
//! ## Architecture
//!
//! ```text
//! ManagementClient ── ApiSchema ── ApiRequest / ApiResponse ── ApiTransport
//!                     (versioned     (method, path, JSON)       (one request
//!                      paths/fields)                             in flight)
//! ```
//!
//! The protocol has no correlation identifiers, so a transport carries at
//! most one request at a time. [`ManagementClient`] enforces that with an
//! async mutex; callers queue rather than race.

mod client;
mod protocol;
mod schema;
mod transport;

pub use client::ManagementClient;
pub use protocol::{
    ActionType, ApiMethod, ApiRequest, ApiResponse, FaultBody, StateTarget, VmInfo,
};
pub use schema::{ApiDialect, ApiSchema};
pub use transport::{ApiTransport, UnixApiTransport};

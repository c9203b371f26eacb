//! Port exposure: making sandbox ports reachable from outside.
//!
//! # Architecture
//!
//! ```text
//! POST /sessions/{id}/expose
//!   │
//!   ▼
//! ExposureRegistry ──► UrlBuilder      subdomain / dedicated / path URLs
//!   │
//!   ├──► PortAllocator + probe         reserve a port from the pool
//!   │
//!   └──► PortListener (own task)       binds the allocated port
//!           │
//!           ▼ every request
//!        Forwarder ──► DialBridge ──► sandbox agent ──► target port
//! ```
//!
//! The registry is an owned object shared by reference (`Arc`) with every
//! handler. Tests build a fresh one each.

pub mod allocator;
pub mod error;
pub mod listener;
pub mod registry;
pub mod types;
pub mod urls;

pub use allocator::{DEFAULT_RANGE_END, DEFAULT_RANGE_START, PortAllocator, PortRange};
pub use error::{AllocationError, ExposeError, ExposeResult};
pub use listener::{DEFAULT_SHUTDOWN_GRACE, PortListener, PortListenerHandle};
pub use registry::{CleanupReport, ExposureRegistry, RegistrySettings};
pub use types::{ExposeOutcome, ExposeRequest, ExposedPort, ExposureStatus, Protocol, validate_port};
pub use urls::UrlBuilder;

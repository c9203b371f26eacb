//! Reverse tunnel dialing.
//!
//! # Architecture
//!
//! ```text
//! Control plane                                Sandbox
//! ─────────────                                ───────
//! Forwarder
//!   │ dial("sbx-1")
//!   ▼
//! DialBridge ── device "hydra-sbx-1" ──┐
//!   (60s timeout)                      │
//!                                      ▼
//! ReverseDialer (registry) ◄──────── agent's outbound connection
//!   │                                          │
//!   └── new logical stream ────────────────────┴──► target process
//! ```
//!
//! The registry itself is pluggable through [`ReverseDialer`]; the stock
//! implementation is [`DeviceDirectory`].

pub mod bridge;
pub mod directory;
pub mod error;

pub use bridge::{
    DEFAULT_DIAL_TIMEOUT, DEVICE_ID_PREFIX, DialBridge, ReverseDialer, TunnelIo, TunnelStream,
    device_id,
};
pub use directory::DeviceDirectory;
pub use error::{TunnelError, TunnelResult};

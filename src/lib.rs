//! sandbox-portal: expose services running inside network-isolated sandboxes
//!
//! Sandboxes have no reachable inbound address. Their agent keeps an outbound
//! reverse tunnel open, and this crate turns "session S wants port P reachable"
//! into public URLs that lead back through that tunnel.
//!
//! # Architecture
//!
//! - **Expose**: per-session exposure records, dedicated-port pool and listeners
//! - **Forward**: HTTP and WebSocket forwarding onto single-use tunnel streams
//! - **Tunnel**: dialing a sandbox's agent by device ID, with a timeout
//! - **API**: HTTP surface for exposure management and path-based proxying
//! - **Session**: read-only lookup of which sandbox a session runs in
//! - **Config**: hierarchical TOML configuration
//! - **Telemetry**: structured syslog audit trail

#![warn(clippy::all)]

pub mod api;
pub mod cli;
pub mod config;
pub mod expose;
pub mod forward;
pub mod session;
pub mod telemetry;
pub mod tunnel;

//! Configuration system for sandbox-portal.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. System config: `/etc/sandbox-portal/config.toml`
//! 2. User config: `~/.config/sandbox-portal/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! No file is required; every value has a built-in default.
//!
//! # Merge Behavior
//!
//! - **Lists** (`[[sessions]]`) are **merged** (appended)
//! - **Scalars** (listen, base_url, range_start, etc.) are **overridden**
//! - **Maps** (`[tunnel.devices]`) are **merged** (later values override)
//!
//! # Example
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! base_url = "https://portal.example.com"
//! dev_subdomain = "dev"
//!
//! [ports]
//! range_start = 30000
//! range_end = 40000
//!
//! [tunnel.devices]
//! "hydra-sbx-1" = "127.0.0.1:7001"
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    Config, DEFAULT_BASE_URL, DEFAULT_DIAL_TIMEOUT_SECS, DEFAULT_LISTEN,
    DEFAULT_SHUTDOWN_GRACE_SECS, GeneralConfig, PortsConfig, ServerConfig, SessionEntry,
    TunnelConfig,
};

//! Layered configuration loading.
//!
//! Layers, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. `/etc/sandbox-portal/config.toml`
//! 3. `~/.config/sandbox-portal/config.toml`
//! 4. The `--config` file
//! 5. `--listen`, `--base-url` and `--dev-subdomain`
//!
//! Only the `--config` file is required to exist.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::{Config, ServerConfig};
use crate::cli::Cli;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/sandbox-portal/config.toml";

/// Directory under the user's config dir.
pub const USER_CONFIG_DIR: &str = "sandbox-portal";

/// File name inside [`USER_CONFIG_DIR`].
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Loads and merges every configuration layer.
pub struct ConfigLoader {
    system_path: PathBuf,
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Loader using the standard system and user locations.
    #[must_use]
    pub fn new() -> Self {
        let user_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(USER_CONFIG_DIR);

        Self::with_paths(
            PathBuf::from(SYSTEM_CONFIG_PATH),
            user_dir.join(USER_CONFIG_FILE),
        )
    }

    /// Loader with explicit system and user file locations.
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    pub fn system_path(&self) -> &Path {
        &self.system_path
    }

    pub fn user_path(&self) -> &Path {
        &self.user_path
    }

    /// Build the effective configuration and validate it.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut layers = vec![
            (self.system_path.as_path(), false),
            (self.user_path.as_path(), false),
        ];
        if let Some(ref extra) = cli.config {
            layers.push((extra.as_path(), true));
        }

        let mut config = Config::default();
        for (path, required) in layers {
            match read_layer(path)? {
                Some(layer) => {
                    debug!("Merging config layer {}", path.display());
                    config.merge(layer);
                }
                None if required => {
                    return Err(ConfigError::ReadError {
                        path: path.to_path_buf(),
                        source: std::io::Error::new(
                            ErrorKind::NotFound,
                            "config file given with --config does not exist",
                        ),
                    });
                }
                None => debug!("Skipping absent config layer {}", path.display()),
            }
        }

        config.merge(Config {
            server: ServerConfig {
                listen: cli.listen.clone(),
                base_url: cli.base_url.clone(),
                dev_subdomain: cli.dev_subdomain.clone(),
            },
            ..Default::default()
        });

        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one layer. An absent file is `None`.
fn read_layer(path: &Path) -> Result<Option<Config>, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    toml::from_str(&contents)
        .map(Some)
        .map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn loader_in(dir: &Path) -> ConfigLoader {
        ConfigLoader::with_paths(dir.join("system.toml"), dir.join("user.toml"))
    }

    #[test]
    fn test_absent_layers_give_defaults() {
        let dir = tempdir().unwrap();
        let config = loader_in(dir.path()).load(&Cli::default()).unwrap();

        assert_eq!(config.server.base_url(), "http://localhost:8080");
        assert!(config.ports.enabled());
        assert!(config.sessions.is_empty());
    }

    #[test]
    fn test_user_layer_beats_system_layer() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("system.toml"),
            r#"
            [server]
            base_url = "https://system.example.com"
            dev_subdomain = "dev"
            "#,
        )
        .unwrap();
        fs::write(
            dir.path().join("user.toml"),
            r#"
            [server]
            base_url = "https://user.example.com"
            "#,
        )
        .unwrap();

        let config = loader_in(dir.path()).load(&Cli::default()).unwrap();

        assert_eq!(config.server.base_url(), "https://user.example.com");
        assert_eq!(config.server.dev_subdomain(), Some("dev"));
    }

    #[test]
    fn test_sessions_are_merged() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("system.toml"),
            "[[sessions]]\nid = \"sess-1\"\nsandbox_id = \"sbx-1\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[[sessions]]\nid = \"sess-2\"\n",
        )
        .unwrap();

        let config = loader_in(dir.path()).load(&Cli::default()).unwrap();
        let ids: Vec<&str> = config.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["sess-1", "sess-2"]);
    }

    #[test]
    fn test_cli_flags_win() {
        let dir = tempdir().unwrap();
        let extra = dir.path().join("extra.toml");
        fs::write(
            &extra,
            r#"
            [server]
            listen = "127.0.0.1:9000"
            base_url = "https://file.example.com"
            "#,
        )
        .unwrap();

        let cli = Cli {
            config: Some(extra),
            base_url: Some("https://flag.example.com".to_string()),
            ..Default::default()
        };
        let config = loader_in(dir.path()).load(&cli).unwrap();

        assert_eq!(config.server.base_url(), "https://flag.example.com");
        assert_eq!(
            config.server.listen_addr().unwrap(),
            "127.0.0.1:9000".parse().unwrap()
        );
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let dir = tempdir().unwrap();
        let cli = Cli {
            config: Some(dir.path().join("missing.toml")),
            ..Default::default()
        };

        let result = loader_in(dir.path()).load(&cli);
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_unparseable_layer_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("system.toml"), "[server\nlisten = ").unwrap();

        let result = loader_in(dir.path()).load(&Cli::default());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_invalid_value_returns_error() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[ports]\nrange_start = 40000\nrange_end = 30000\n",
        )
        .unwrap();

        let result = loader_in(dir.path()).load(&Cli::default());
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}

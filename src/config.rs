//! Configuration module for mtcp-backend.
//!
//! The listen address is fixed; only logging is configurable, either on the
//! command line or in a TOML file. CLI arguments take precedence over config
//! file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;

/// Address the backend always binds to.
pub const DEFAULT_LISTEN: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9000));

/// Command-line arguments for the backend
#[derive(Parser, Debug)]
#[command(name = "mtcp-backend")]
#[command(author = "mtcp authors")]
#[command(version = "0.1.0")]
#[command(about = "Static HTTP backend for MTCP testing", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            listen: DEFAULT_LISTEN,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(config: Option<PathBuf>, log_level: &str) -> CliArgs {
        CliArgs {
            config,
            log_level: log_level.to_string(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::from_args(cli(None, "info")).unwrap();
        assert_eq!(config.listen, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_cli_overrides_file() {
        let path = std::env::temp_dir().join(format!("mtcp-backend-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();

        let from_file = Config::from_args(cli(Some(path.clone()), "info")).unwrap();
        assert_eq!(from_file.log_level, "debug");

        let from_cli = Config::from_args(cli(Some(path.clone()), "warn")).unwrap();
        assert_eq!(from_cli.log_level, "warn");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let path = PathBuf::from("/nonexistent/mtcp-backend.toml");
        match Config::from_args(cli(Some(path), "info")) {
            Err(ConfigError::FileRead(p, _)) => {
                assert_eq!(p, PathBuf::from("/nonexistent/mtcp-backend.toml"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Parser)]
#[command(
    name = "bistro-boss",
    version,
    about = "Bistro Boss restaurant backend"
)]
pub struct Cli {
    /// Address to listen on. Overrides `--port` and `PORT`.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,

    #[arg(long, short = 'p', value_name = "PORT")]
    pub port: Option<u16>,

    /// Directory holding the collection files; in-memory only when unset.
    #[arg(long, short = 'd', value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub data_dir: Option<PathBuf>,
    pub access_token_secret: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind", &self.bind)
            .field("data_dir", &self.data_dir)
            .field("access_token_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid port value for env var {key}: {value}")]
    InvalidEnvPort { key: String, value: String },
    #[error("env var {key} is not valid unicode")]
    NotUnicode { key: String },
    #[error("ACCESS_TOKEN_SECRET is not set (env var or `access_token_secret` in config file)")]
    MissingSecret,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind: Option<SocketAddr>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    access_token_secret: Option<String>,
}

/// Values read from the process environment.
#[derive(Debug, Default)]
pub struct EnvConfig {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub access_token_secret: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: read_env("PORT")?
                .map(|value| parse_port("PORT", &value))
                .transpose()?,
            data_dir: read_env("BISTRO_DATA_DIR")?.map(PathBuf::from),
            access_token_secret: read_env("ACCESS_TOKEN_SECRET")?,
        })
    }
}

impl AppConfig {
    /// Resolve settings with precedence CLI, then environment, then config file.
    pub fn from_sources(cli: Cli, env: EnvConfig) -> Result<Self, ConfigError> {
        let from_file = read_file_config(cli.config.as_deref())?;

        let port = cli
            .port
            .or(env.port)
            .or(from_file.port)
            .unwrap_or(DEFAULT_PORT);
        let bind = cli
            .bind
            .or(from_file.bind)
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
        let data_dir = cli.data_dir.or(env.data_dir).or(from_file.data_dir);
        let access_token_secret = env
            .access_token_secret
            .or(from_file.access_token_secret)
            .filter(|secret| !secret.trim().is_empty())
            .ok_or(ConfigError::MissingSecret)?;

        Ok(Self {
            bind,
            data_dir,
            access_token_secret,
        })
    }
}

fn read_file_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn read_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
            key: String::from(key),
        }),
    }
}

fn parse_port(key: &str, raw: &str) -> Result<u16, ConfigError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidEnvPort {
            key: String::from(key),
            value: String::from(raw),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::net::SocketAddr;
    use std::path::PathBuf;

    use anyhow::Result;
    use tempfile::tempdir;

    use super::{parse_port, AppConfig, Cli, ConfigError, EnvConfig};

    fn cli() -> Cli {
        Cli {
            bind: None,
            port: None,
            data_dir: None,
            config: None,
        }
    }

    fn env_with_secret() -> EnvConfig {
        EnvConfig {
            access_token_secret: Some(String::from("s3cret")),
            ..Default::default()
        }
    }

    #[test]
    fn parse_port_accepts_numbers() {
        assert_eq!(parse_port("PORT", "5000").ok(), Some(5000));
        assert_eq!(parse_port("PORT", " 8080 ").ok(), Some(8080));
    }

    #[test]
    fn parse_port_rejects_invalid_values() {
        assert!(parse_port("PORT", "http").is_err());
        assert!(parse_port("PORT", "70000").is_err());
    }

    #[test]
    fn defaults_to_port_5000_on_all_interfaces() -> Result<()> {
        let config = AppConfig::from_sources(cli(), env_with_secret())?;
        assert_eq!(config.bind, "0.0.0.0:5000".parse::<SocketAddr>()?);
        assert_eq!(config.data_dir, None);
        Ok(())
    }

    #[test]
    fn cli_port_beats_env_port() -> Result<()> {
        let env = EnvConfig {
            port: Some(7000),
            ..env_with_secret()
        };
        let config = AppConfig::from_sources(
            Cli {
                port: Some(9000),
                ..cli()
            },
            env,
        )?;
        assert_eq!(config.bind.port(), 9000);
        Ok(())
    }

    #[test]
    fn missing_or_blank_secret_is_an_error() {
        let result = AppConfig::from_sources(cli(), EnvConfig::default());
        assert!(matches!(result, Err(ConfigError::MissingSecret)));

        let blank = EnvConfig {
            access_token_secret: Some(String::from("  ")),
            ..Default::default()
        };
        let result = AppConfig::from_sources(cli(), blank);
        assert!(matches!(result, Err(ConfigError::MissingSecret)));
    }

    #[test]
    fn config_file_fills_gaps() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bistro.toml");
        std::fs::write(
            &path,
            "port = 6000\ndata_dir = \"/var/lib/bistro\"\naccess_token_secret = \"from-file\"\n",
        )?;

        let config = AppConfig::from_sources(
            Cli {
                config: Some(path),
                ..cli()
            },
            EnvConfig::default(),
        )?;
        assert_eq!(config.bind.port(), 6000);
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/bistro")));
        assert_eq!(config.access_token_secret, "from-file");
        Ok(())
    }
}

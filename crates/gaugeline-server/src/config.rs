// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Server configuration.
//!
//! Same layering as the agent: environment variables, then the JSON file
//! named by `CONFIG`, then defaults.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gaugeline_core::duration::parse_duration;
use gaugeline_core::net::TrustedSubnet;
use serde::Deserialize;

pub const DEFAULT_ADDRESS: &str = "localhost:8080";
pub const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_FILE_STORAGE_PATH: &str = "metrics.json";
pub const DEFAULT_RESTORE: bool = true;
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    address: Option<String>,
    restore: Option<bool>,
    store_interval: Option<String>,
    store_file: Option<String>,
    database_dsn: Option<String>,
    crypto_key: Option<String>,
    audit_file: Option<String>,
    audit_url: Option<String>,
    key: Option<String>,
    trusted_subnet: Option<String>,
    grpc_address: Option<String>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| ConfigError::ParseFile {
            path: path.display().to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port` the HTTP API listens on
    pub address: String,
    /// Snapshot period; zero saves after every mutating request
    pub store_interval: Duration,
    pub file_storage_path: PathBuf,
    /// Load the snapshot once at startup
    pub restore: bool,
    pub database_dsn: Option<String>,
    /// Shared HMAC key; `None` disables signature checks
    pub key: Option<String>,
    /// Path to the PEM private key (PKCS#1); `None` disables decryption
    pub crypto_key: Option<PathBuf>,
    pub audit_file: Option<PathBuf>,
    pub audit_url: Option<String>,
    /// Only enforced on the gRPC listener
    pub trusted_subnet: Option<TrustedSubnet>,
    pub grpc_address: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: DEFAULT_ADDRESS.to_string(),
            store_interval: DEFAULT_STORE_INTERVAL,
            file_storage_path: PathBuf::from(DEFAULT_FILE_STORAGE_PATH),
            restore: DEFAULT_RESTORE,
            database_dsn: None,
            key: None,
            crypto_key: None,
            audit_file: None,
            audit_url: None,
            trusted_subnet: None,
            grpc_address: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn new() -> Result<Config, ConfigError> {
        let file = match env_string("CONFIG") {
            Some(path) => FileConfig::load(Path::new(&path))?,
            None => FileConfig::default(),
        };
        let defaults = Config::default();

        let store_interval = match env_string("STORE_INTERVAL") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidValue {
                    name: "STORE_INTERVAL",
                    value: raw,
                })?,
            None => match file.store_interval {
                Some(raw) => parse_duration(&raw).map_err(|_| ConfigError::InvalidValue {
                    name: "store_interval",
                    value: raw,
                })?,
                None => defaults.store_interval,
            },
        };

        let restore = match env_string("RESTORE") {
            Some(raw) => raw
                .trim()
                .to_lowercase()
                .parse::<bool>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: "RESTORE",
                    value: raw,
                })?,
            None => file.restore.unwrap_or(defaults.restore),
        };

        let trusted_subnet = match env_string("TRUSTED_SUBNET").or(non_empty(file.trusted_subnet)) {
            Some(raw) => Some(raw.parse::<TrustedSubnet>().map_err(|_| {
                ConfigError::InvalidValue {
                    name: "TRUSTED_SUBNET",
                    value: raw,
                }
            })?),
            None => None,
        };

        Ok(Config {
            address: env_string("ADDRESS")
                .or(non_empty(file.address))
                .unwrap_or(defaults.address),
            store_interval,
            file_storage_path: env_string("FILE_STORAGE_PATH")
                .or(non_empty(file.store_file))
                .map_or(defaults.file_storage_path, PathBuf::from),
            restore,
            database_dsn: env_string("DATABASE_DSN").or(non_empty(file.database_dsn)),
            key: env_string("KEY").or(non_empty(file.key)),
            crypto_key: env_string("CRYPTO_KEY")
                .or(non_empty(file.crypto_key))
                .map(PathBuf::from),
            audit_file: env_string("AUDIT_FILE")
                .or(non_empty(file.audit_file))
                .map(PathBuf::from),
            audit_url: env_string("AUDIT_URL").or(non_empty(file.audit_url)),
            trusted_subnet,
            grpc_address: env_string("GRPC_ADDRESS").or(non_empty(file.grpc_address)),
            log_level: env_string("LOG_LEVEL")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.log_level),
        })
    }

    /// Whether every mutating request writes the snapshot itself.
    #[must_use]
    pub fn sync_snapshot(&self) -> bool {
        self.store_interval.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use std::net::IpAddr;

    const VARS: [&str; 13] = [
        "ADDRESS",
        "STORE_INTERVAL",
        "FILE_STORAGE_PATH",
        "RESTORE",
        "DATABASE_DSN",
        "KEY",
        "CRYPTO_KEY",
        "AUDIT_FILE",
        "AUDIT_URL",
        "TRUSTED_SUBNET",
        "GRPC_ADDRESS",
        "CONFIG",
        "LOG_LEVEL",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn defaults_without_env() {
        clear_env();
        let config = Config::new().unwrap();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.store_interval, Duration::from_secs(300));
        assert_eq!(config.file_storage_path, PathBuf::from("metrics.json"));
        assert!(config.restore);
        assert!(!config.sync_snapshot());
        assert!(config.database_dsn.is_none());
        assert!(config.trusted_subnet.is_none());
        assert!(config.audit_file.is_none());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    #[serial]
    fn zero_store_interval_means_sync_snapshot() {
        clear_env();
        env::set_var("STORE_INTERVAL", "0");
        env::set_var("RESTORE", "false");
        let config = Config::new().unwrap();
        clear_env();
        assert!(config.sync_snapshot());
        assert!(!config.restore);
    }

    #[test]
    #[serial]
    fn env_overrides_file() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"address":"file:9000","store_interval":"1m","store_file":"/tmp/from-file.json","restore":false,"trusted_subnet":"10.0.0.0/8","audit_url":"http://audit"}}"#
        )
        .unwrap();
        env::set_var("CONFIG", file.path());
        env::set_var("ADDRESS", "env:7000");
        env::set_var("TRUSTED_SUBNET", "192.168.0.0/16");

        let config = Config::new().unwrap();
        clear_env();

        assert_eq!(config.address, "env:7000");
        assert_eq!(config.store_interval, Duration::from_secs(60));
        assert_eq!(
            config.file_storage_path,
            PathBuf::from("/tmp/from-file.json")
        );
        assert!(!config.restore);
        assert_eq!(config.audit_url.as_deref(), Some("http://audit"));
        let subnet = config.trusted_subnet.unwrap();
        assert!(subnet.contains(&"192.168.4.2".parse::<IpAddr>().unwrap()));
        assert!(!subnet.contains(&"10.1.1.1".parse::<IpAddr>().unwrap()));
    }

    #[test]
    #[serial]
    fn invalid_subnet_is_an_error() {
        clear_env();
        env::set_var("TRUSTED_SUBNET", "not-a-cidr");
        let err = Config::new().unwrap_err();
        clear_env();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "TRUSTED_SUBNET",
                ..
            }
        ));
    }

    #[test]
    #[serial]
    fn invalid_store_interval_is_an_error() {
        clear_env();
        env::set_var("STORE_INTERVAL", "-1");
        let err = Config::new().unwrap_err();
        clear_env();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "STORE_INTERVAL",
                ..
            }
        ));
    }
}

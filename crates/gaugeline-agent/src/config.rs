// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration.
//!
//! Values come from environment variables first, then from the optional JSON
//! file named by `CONFIG`, then from built-in defaults.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gaugeline_core::duration::parse_duration;
use serde::Deserialize;

pub const DEFAULT_ADDRESS: &str = "localhost:8080";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_RATE_LIMIT: usize = 1;
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

/// Lowest-priority layer read from the `CONFIG` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    address: Option<String>,
    poll_interval: Option<String>,
    report_interval: Option<String>,
    rate_limit: Option<usize>,
    key: Option<String>,
    crypto_key: Option<String>,
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
    /// `host:port` of the server's HTTP endpoint
    pub address: String,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    /// Number of concurrent senders, at least 1
    pub rate_limit: usize,
    /// Shared HMAC key; `None` disables signing
    pub key: Option<String>,
    /// Path to the server's PEM public key; `None` disables encryption
    pub crypto_key: Option<PathBuf>,
    /// When set, batches go over gRPC instead of HTTP
    pub grpc_address: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: DEFAULT_ADDRESS.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
            rate_limit: DEFAULT_RATE_LIMIT,
            key: None,
            crypto_key: None,
            grpc_address: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_secs(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    env_string(name)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidValue { name, value: raw })
        })
        .transpose()
}

fn file_duration(name: &'static str, raw: Option<String>) -> Result<Option<Duration>, ConfigError> {
    raw.map(|raw| parse_duration(&raw).map_err(|_| ConfigError::InvalidValue { name, value: raw }))
        .transpose()
}

impl Config {
    pub fn new() -> Result<Config, ConfigError> {
        let file = match env_string("CONFIG") {
            Some(path) => FileConfig::load(Path::new(&path))?,
            None => FileConfig::default(),
        };
        let defaults = Config::default();

        let poll_interval = match env_secs("POLL_INTERVAL")? {
            Some(d) => d,
            None => file_duration("poll_interval", file.poll_interval)?
                .unwrap_or(defaults.poll_interval),
        };
        let report_interval = match env_secs("REPORT_INTERVAL")? {
            Some(d) => d,
            None => file_duration("report_interval", file.report_interval)?
                .unwrap_or(defaults.report_interval),
        };
        for (name, interval) in [
            ("POLL_INTERVAL", poll_interval),
            ("REPORT_INTERVAL", report_interval),
        ] {
            if interval.is_zero() {
                return Err(ConfigError::InvalidValue {
                    name,
                    value: "0".to_string(),
                });
            }
        }

        let rate_limit = match env_string("RATE_LIMIT") {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: "RATE_LIMIT",
                    value: raw,
                })?
                .try_into()
                .unwrap_or(0usize),
            None => file.rate_limit.unwrap_or(defaults.rate_limit),
        }
        .max(1);

        Ok(Config {
            address: env_string("ADDRESS")
                .or(file.address)
                .unwrap_or(defaults.address),
            poll_interval,
            report_interval,
            rate_limit,
            key: env_string("KEY").or(file.key).filter(|k| !k.is_empty()),
            crypto_key: env_string("CRYPTO_KEY")
                .or(file.crypto_key)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            grpc_address: env_string("GRPC_ADDRESS")
                .or(file.grpc_address)
                .filter(|a| !a.is_empty()),
            log_level: env_string("LOG_LEVEL")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.log_level),
        })
    }
}

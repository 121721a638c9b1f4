//! Process configuration for the Vault (spec §6 "Configuration keys").
//!
//! Loaded from TOML at startup (`Config::from_toml_str` /
//! `Config::from_file`); every section has a `Default` so a minimal file
//! only needs to override what it cares about, following the same small
//! typed-config-struct style as `PackConfig`/`LfsConfig`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cache::SlicingSpec;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Maximum bundle size in bytes. Default 512 MiB (spec §4.4).
    #[serde(default = "default_max_bundle_size")]
    pub max_bundle_size: u64,
    pub vault_url: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

fn default_max_bundle_size() -> u64 {
    512 * 1024 * 1024
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    pub cls: String,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheConfig {
    pub cls: String,
    pub root: PathBuf,
    /// Slicing spec string, e.g. `"0:1/1:5"` (see `SlicingSpec::parse`).
    pub slicing: String,
    #[serde(default)]
    pub allow_delete: bool,
}

impl CacheConfig {
    pub fn slicing_spec(&self) -> Result<SlicingSpec, String> {
        SlicingSpec::parse(&self.slicing)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    #[serde(default = "default_db_reconnect_attempts")]
    pub reconnect_attempts: u32,
}

fn default_db_reconnect_attempts() -> u32 {
    3
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SchedulerConfig {
    /// Size of the bounded pool used for the directory cooker's content
    /// fetch fan-out (spec §5, default 10).
    #[serde(default = "default_content_fetch_workers")]
    pub content_fetch_workers: usize,
}

fn default_content_fetch_workers() -> usize {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            content_fetch_workers: default_content_fetch_workers(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub relay_host: String,
    #[serde(default = "default_smtp_port")]
    pub relay_port: u16,
    #[serde(default = "default_from_address")]
    pub from_address: String,
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_from_address() -> String {
    "\"Vault\" <vault@example.org>".to_string()
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            relay_host: default_smtp_host(),
            relay_port: default_smtp_port(),
            from_address: default_from_address(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&text)?)
    }
}

use std::fs::read_to_string;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use serde::{self, Deserialize};
use tracing::{debug, error, info};
use typed_builder::TypedBuilder;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/cluster-oplog/config.toml";
pub const DEFAULT_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;
pub const DEFAULT_RETRIEVE_LIMIT: u64 = 1000;

fn default_sync_writes() -> bool {
    true
}

fn default_cache_capacity() -> u64 {
    DEFAULT_CACHE_CAPACITY
}

fn default_retrieve_limit() -> u64 {
    DEFAULT_RETRIEVE_LIMIT
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Deserialize, Debug, Clone)]
pub struct Configuration {
    pub oplog_dir: String,

    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    #[serde(default = "default_retrieve_limit")]
    pub retrieve_limit: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Configuration {
    pub fn parse_config_file(file: &str) -> Result<Configuration> {
        info!("parsing configuration file: {}", file);

        let file_contents = read_to_string(file).map_err(|e| {
            error!("failed to read configuration file {file}, err: {e}");
            anyhow!(ConfigError::FailedToRead)
        })?;

        let ret = Self::parse_str(&file_contents)?;

        debug!("configuration: {:?}", ret);
        Ok(ret)
    }

    pub fn parse_str(contents: &str) -> Result<Configuration> {
        let ret: Configuration = toml::from_str(contents).map_err(|e| {
            error!("failed to parse configuration, err: {e}");
            anyhow!(ConfigError::InvalidToml)
        })?;

        ret.validate()?;
        Ok(ret)
    }

    pub fn validate(&self) -> Result<()> {
        if self.oplog_dir.trim().is_empty() {
            bail!(ConfigError::InvalidValue("oplog_dir is empty".to_string()));
        }

        if self.retrieve_limit == 0 {
            bail!(ConfigError::InvalidValue(
                "retrieve_limit must be positive".to_string()
            ));
        }

        if tracing::Level::from_str(&self.log_level).is_err() {
            bail!(ConfigError::InvalidValue(format!(
                "unknown log level {}",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn oplog_path(&self) -> PathBuf {
        PathBuf::from(&self.oplog_dir)
    }

    pub fn oplog_options(&self) -> OpLogOptions {
        OpLogOptions::builder()
            .sync_writes(self.sync_writes)
            .cache_capacity(self.cache_capacity)
            .build()
    }
}

/// Options for opening the durable store behind an operation log.
#[derive(TypedBuilder, Debug, Clone)]
pub struct OpLogOptions {
    /// Fsync every commit before returning.
    #[builder(default = true)]
    pub sync_writes: bool,
    #[builder(default = DEFAULT_CACHE_CAPACITY)]
    pub cache_capacity: u64,
}

impl Default for OpLogOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

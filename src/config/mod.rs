//! Configuration management for retrospector
//!
//! Loads the TOML configuration, applies `RETROSPECTOR_SECTION__KEY`
//! environment overrides and validates the result.

use crate::error::{Result, RetroError};
use crate::pipeline::PipelineOptions;
use crate::transport::QueueOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub transport: TransportConfig,
    pub pipeline: PipelineConfig,
    pub notify: NotifyConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Where the repository database and blobs live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    pub compression_level: i32,
}

/// Entity transport buffering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Entities buffered per flushed batch
    pub batch_size: usize,
}

/// Detection pipeline tuning; timeouts are duration strings ("500ms", "30s", "2m")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub match_batch_size: usize,
    pub read_timeout: String,
    pub query_timeout: String,
    pub notify_timeout: String,
}

/// Alert sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Environment variable consulted when `webhook_url` is unset
    pub webhook_url_env: String,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RetroError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RetroError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RetroError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: RETROSPECTOR_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("RETROSPECTOR_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        let parse_usize = |value: &str| {
            value.parse::<usize>().map_err(|_| RetroError::InvalidConfigValue {
                path: path.to_string(),
                message: format!("Cannot parse '{}' as integer", value),
            })
        };

        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "STORAGE__DATABASE_FILE" => self.storage.database_file = value.to_string(),
            "TRANSPORT__BATCH_SIZE" => self.transport.batch_size = parse_usize(value)?,
            "PIPELINE__MATCH_BATCH_SIZE" => self.pipeline.match_batch_size = parse_usize(value)?,
            "PIPELINE__READ_TIMEOUT" => self.pipeline.read_timeout = value.to_string(),
            "PIPELINE__QUERY_TIMEOUT" => self.pipeline.query_timeout = value.to_string(),
            "PIPELINE__NOTIFY_TIMEOUT" => self.pipeline.notify_timeout = value.to_string(),
            "NOTIFY__WEBHOOK_URL" => self.notify.webhook_url = Some(value.to_string()),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RetroError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("retrospector").join("config.toml"))
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.database_file)
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            batch_size: self.transport.batch_size,
            compression_level: self.storage.compression_level,
        }
    }

    pub fn pipeline_options(&self) -> Result<PipelineOptions> {
        Ok(PipelineOptions {
            match_batch_size: self.pipeline.match_batch_size,
            read_timeout: duration_field("pipeline.read_timeout", &self.pipeline.read_timeout)?,
            notify_timeout: duration_field(
                "pipeline.notify_timeout",
                &self.pipeline.notify_timeout,
            )?,
        })
    }

    pub fn query_timeout(&self) -> Result<Duration> {
        duration_field("pipeline.query_timeout", &self.pipeline.query_timeout)
    }

    /// Webhook URL from the config file, falling back to the configured env var
    pub fn webhook_url(&self) -> Option<String> {
        self.notify
            .webhook_url
            .clone()
            .or_else(|| std::env::var(&self.notify.webhook_url_env).ok())
            .filter(|url| !url.is_empty())
    }
}

fn duration_field(path: &str, value: &str) -> Result<Duration> {
    parse_duration(value).ok_or_else(|| RetroError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Invalid duration: {}", value),
    })
}

/// Parse duration strings like "500ms", "30s", "2m", "1h"; bare numbers are seconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let amount: u64 = digits.parse().ok()?;

    match unit {
        "ms" => Some(Duration::from_millis(amount)),
        "" | "s" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_secs(amount.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(amount.checked_mul(3600)?)),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.retrospector");

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir,
                database_file: "repository.db".to_string(),
                compression_level: 3,
            },
            transport: TransportConfig { batch_size: 1000 },
            pipeline: PipelineConfig {
                match_batch_size: 1,
                read_timeout: "30s".to_string(),
                query_timeout: "10s".to_string(),
                notify_timeout: "10s".to_string(),
            },
            notify: NotifyConfig {
                webhook_url: None,
                webhook_url_env: "SLACK_WEBHOOK_URL".to_string(),
            },
        }
    }
}

//! Runtime configuration: YAML file, then environment overrides.
//!
//! ```yaml
//! blocking_statuses: [pendiente, pagado, en_preparacion, en_camino]
//! channel_buffer: 32
//! log_level: info
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::OrderStatus;
use crate::error::ConfigError;

pub const ENV_BLOCKING_STATUSES: &str = "RECETA_LIVE_BLOCKING_STATUSES";
pub const ENV_LOG_LEVEL: &str = "RECETA_LIVE_LOG_LEVEL";

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Order statuses meaning "this prescription has an order in flight"
/// (`ESTADOS_BLOQUEANTES`).
///
/// Keeps first-seen order and drops duplicates. Membership is by equality only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<OrderStatus>", into = "Vec<OrderStatus>")]
pub struct BlockingStatuses(Vec<OrderStatus>);

impl BlockingStatuses {
    pub fn new(statuses: impl IntoIterator<Item = OrderStatus>) -> Self {
        let mut unique: Vec<OrderStatus> = Vec::new();
        for status in statuses {
            if !unique.contains(&status) {
                unique.push(status);
            }
        }
        Self(unique)
    }

    pub fn contains(&self, status: &OrderStatus) -> bool {
        self.0.contains(status)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OrderStatus> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Wire values for an `in` filter.
    pub fn to_values(&self) -> Vec<Value> {
        self.0.iter().map(|s| Value::String(s.as_str().to_string())).collect()
    }

    /// Parses a comma-separated list, ignoring blanks.
    pub fn parse_list(raw: &str) -> Self {
        Self::new(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(OrderStatus::from),
        )
    }
}

impl Default for BlockingStatuses {
    fn default() -> Self {
        Self::new([
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Preparing,
            OrderStatus::InTransit,
        ])
    }
}

impl From<Vec<OrderStatus>> for BlockingStatuses {
    fn from(statuses: Vec<OrderStatus>) -> Self {
        Self::new(statuses)
    }
}

impl From<BlockingStatuses> for Vec<OrderStatus> {
    fn from(statuses: BlockingStatuses) -> Self {
        statuses.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfig {
    #[serde(default)]
    pub blocking_statuses: BlockingStatuses,
    /// Capacity of every actor mailbox and listener channel.
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_channel_buffer() -> usize {
    32
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            blocking_statuses: BlockingStatuses::default(),
            channel_buffer: default_channel_buffer(),
            log_level: default_log_level(),
        }
    }
}

impl LiveConfig {
    /// Loads a YAML file and applies environment overrides.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config = Self::from_yaml_str(&yaml_content)?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(
            blocking_statuses = config.blocking_statuses.len(),
            channel_buffer = config.channel_buffer,
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: LiveConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(ENV_BLOCKING_STATUSES) {
            self.blocking_statuses = BlockingStatuses::parse_list(&raw);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "channel_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

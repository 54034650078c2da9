use crate::error::{CoachError, Result};
use crate::paths;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cleaned inbound bodies equal to one of these end monitoring.
    #[serde(default = "default_stop_words")]
    pub stop_words: Vec<String>,
    /// Inbound bodies starting with this prefix are intentions.
    #[serde(default = "default_intention_prefix")]
    pub intention_prefix: String,
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_min_send_hour")]
    pub min_send_hour: u32,
    #[serde(default = "default_max_send_hour")]
    pub max_send_hour: u32,
    #[serde(default = "default_periodic_interval")]
    pub periodic_interval_minutes: u32,
    #[serde(default = "default_short_url_base")]
    pub short_url_base: String,
    #[serde(default = "default_max_per_pass")]
    pub max_messages_per_dispatch_pass: usize,
}

fn default_stop_words() -> Vec<String> {
    vec!["stop".to_string(), "stopp".to_string()]
}

fn default_intention_prefix() -> String {
    "#".to_string()
}

fn default_min_send_hour() -> u32 {
    1
}

fn default_max_send_hour() -> u32 {
    23
}

fn default_periodic_interval() -> u32 {
    10
}

fn default_short_url_base() -> String {
    "http://localhost:3141/s/".to_string()
}

fn default_max_per_pass() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_words: default_stop_words(),
            intention_prefix: default_intention_prefix(),
            utc_offset_minutes: 0,
            min_send_hour: default_min_send_hour(),
            max_send_hour: default_max_send_hour(),
            periodic_interval_minutes: default_periodic_interval(),
            short_url_base: default_short_url_base(),
            max_messages_per_dispatch_pass: default_max_per_pass(),
        }
    }
}

impl EngineConfig {
    /// Offset used for calendar days, weekdays and send hours.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn clamp_send_hour(&self, hour: i64) -> u32 {
        let min = self.min_send_hour.min(23) as i64;
        let max = self.max_send_hour.clamp(self.min_send_hour.min(23), 23) as i64;
        hour.clamp(min, max) as u32
    }
}

// ---------------------------------------------------------------------------
// WorkerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_secs: u64,
    #[serde(default = "default_inbound_interval")]
    pub inbound_interval_secs: u64,
    #[serde(default = "default_scheduling_interval")]
    pub scheduling_interval_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_dispatch_interval() -> u64 {
    60
}

fn default_inbound_interval() -> u64 {
    5
}

fn default_scheduling_interval() -> u64 {
    300
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_secs: default_dispatch_interval(),
            inbound_interval_secs: default_inbound_interval(),
            scheduling_interval_secs: default_scheduling_interval(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

// ---------------------------------------------------------------------------
// TransportConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Log outbound messages instead of delivering them.
    #[default]
    Log,
    /// POST every outbound message as JSON to `url`.
    Webhook {
        url: String,
        #[serde(default = "default_webhook_timeout")]
        timeout_secs: u64,
    },
}

fn default_webhook_timeout() -> u64 {
    15
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(CoachError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Config::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let engine = &self.engine;

        if engine.stop_words.iter().all(|w| w.trim().is_empty()) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "engine.stop_words is empty: participants cannot opt out by message"
                    .to_string(),
            });
        }

        if engine.min_send_hour > engine.max_send_hour {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "engine.min_send_hour ({}) is after engine.max_send_hour ({})",
                    engine.min_send_hour, engine.max_send_hour
                ),
            });
        }

        if engine.max_send_hour > 23 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "engine.max_send_hour={} is outside 0..=23 and will be capped",
                    engine.max_send_hour
                ),
            });
        }

        if FixedOffset::east_opt(engine.utc_offset_minutes.saturating_mul(60)).is_none() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "engine.utc_offset_minutes={} is not a valid offset, UTC is used",
                    engine.utc_offset_minutes
                ),
            });
        }

        if engine.intention_prefix.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "engine.intention_prefix is empty: every inbound message would be an intention"
                    .to_string(),
            });
        }

        for (name, secs) in [
            ("workers.dispatch_interval_secs", self.workers.dispatch_interval_secs),
            ("workers.inbound_interval_secs", self.workers.inbound_interval_secs),
            ("workers.scheduling_interval_secs", self.workers.scheduling_interval_secs),
        ] {
            if secs == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("{name} must be greater than zero"),
                });
            }
        }

        if let TransportConfig::Webhook { url, .. } = &self.transport {
            if url.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "transport.url is empty for the webhook transport".to_string(),
                });
            }
        }

        warnings
    }
}

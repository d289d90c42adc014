//! WolfKV Configuration
//!
//! This module provides configuration structures for a WolfKV node.
//! Sizes ("4KB", "10MB") and durations ("10ms", "5m") are written as
//! human-readable strings and converted by the typed accessors.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::network::DEFAULT_MAX_RESPONSE_SIZE;
use crate::wal::WalSettings;

/// Encoding overhead of one record beyond its key and value bytes
const RECORD_OVERHEAD: u64 = 32;
/// Replication response envelope around a shipped segment
const RESPONSE_OVERHEAD: u64 = 1024;

/// Main WolfKV configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WolfKvConfig {
    /// Storage engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Client-facing network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Write-Ahead Log configuration (WAL disabled when absent)
    #[serde(default)]
    pub wal: Option<WalConfig>,

    /// Replication configuration (standalone node when absent)
    #[serde(default)]
    pub replication: Option<ReplicationConfig>,
}

/// Storage engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine type; only "in_memory" is supported
    #[serde(rename = "type", default = "default_engine_type")]
    pub engine_type: String,
}

/// Client-facing network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address to bind for client connections
    #[serde(default = "default_address")]
    pub address: String,

    /// Maximum concurrent client connections (0 = unlimited)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum size of a single request
    #[serde(default = "default_max_message_size")]
    pub max_message_size: String,

    /// Close connections idle for longer than this ("0s" disables)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log to file path (stderr when absent)
    #[serde(default)]
    pub output: Option<PathBuf>,
}

/// Write-Ahead Log configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalConfig {
    /// Number of records to batch before flushing
    #[serde(default = "default_flushing_batch_size")]
    pub flushing_batch_size: usize,

    /// Flush whatever is buffered after this long
    #[serde(default = "default_flushing_batch_timeout")]
    pub flushing_batch_timeout: String,

    /// Rotate segments once they reach this size
    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: String,

    /// Directory holding the segment files
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
}

/// Replication configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// "master" or "slave"
    #[serde(default = "default_replica_type")]
    pub replica_type: String,

    /// Address the master listens on and slaves connect to
    pub master_address: String,

    /// How often a slave polls the master
    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,
}

/// Replication role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaRole {
    Master,
    Slave,
}

impl std::fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaRole::Master => write!(f, "master"),
            ReplicaRole::Slave => write!(f, "slave"),
        }
    }
}

// Default value functions
fn default_engine_type() -> String {
    "in_memory".to_string()
}

fn default_address() -> String {
    "127.0.0.1:3223".to_string()
}

fn default_max_connections() -> usize {
    100
}

fn default_max_message_size() -> String {
    "4KB".to_string()
}

fn default_idle_timeout() -> String {
    "5m".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_flushing_batch_size() -> usize {
    100
}

fn default_flushing_batch_timeout() -> String {
    "10ms".to_string()
}

fn default_max_segment_size() -> String {
    "10MB".to_string()
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("/var/lib/wolfkv/wal")
}

fn default_replica_type() -> String {
    "master".to_string()
}

fn default_sync_interval() -> String {
    "1s".to_string()
}

impl Default for WolfKvConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
            wal: None,
            replication: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_type: default_engine_type(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: None,
        }
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            flushing_batch_size: default_flushing_batch_size(),
            flushing_batch_timeout: default_flushing_batch_timeout(),
            max_segment_size: default_max_segment_size(),
            data_directory: default_data_directory(),
        }
    }
}

impl WolfKvConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: WolfKvConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.engine.engine_type != "in_memory" {
            return Err(Error::Config(format!(
                "engine.type '{}' is not supported",
                self.engine.engine_type
            )));
        }

        if self.network.address.is_empty() {
            return Err(Error::Config("network.address cannot be empty".into()));
        }

        self.max_message_size()?;
        self.idle_timeout()?;

        if let Some(wal) = &self.wal {
            wal.settings()?;
        }

        if let Some(replication) = &self.replication {
            replication.role()?;
            replication.sync_interval()?;
            if replication.master_address.is_empty() {
                return Err(Error::Config(
                    "replication.master_address cannot be empty".into(),
                ));
            }
            // Segments are the unit of replication
            let Some(wal) = &self.wal else {
                return Err(Error::Config(
                    "replication requires a [wal] section".into(),
                ));
            };

            // A slave must be able to receive the largest segment in one response
            let limit = DEFAULT_MAX_RESPONSE_SIZE as u64;
            match largest_segment_response(&wal.settings()?, self.max_message_size()?) {
                Some(size) if size <= limit => {}
                _ => {
                    return Err(Error::Config(format!(
                        "wal.max_segment_size '{}' plus one batch of {} records cannot be \
                         replicated; responses are limited to {} bytes",
                        wal.max_segment_size, wal.flushing_batch_size, limit
                    )))
                }
            }
        }

        Ok(())
    }

    /// Maximum request size in bytes
    pub fn max_message_size(&self) -> Result<usize> {
        let size = parse_size(&self.network.max_message_size)?;
        if size == 0 {
            return Err(Error::Config("network.max_message_size must be positive".into()));
        }
        Ok(size)
    }

    /// Idle timeout for client connections (`None` = never time out)
    pub fn idle_timeout(&self) -> Result<Option<Duration>> {
        let timeout = parse_duration(&self.network.idle_timeout)?;
        Ok((!timeout.is_zero()).then_some(timeout))
    }

    /// Replication role of this node (`None` for a standalone node)
    pub fn role(&self) -> Result<Option<ReplicaRole>> {
        self.replication.as_ref().map(|r| r.role()).transpose()
    }
}

impl WalConfig {
    /// Convert into validated WAL settings
    pub fn settings(&self) -> Result<WalSettings> {
        let settings = WalSettings {
            max_segment_size: parse_size(&self.max_segment_size)? as u64,
            flushing_batch_size: self.flushing_batch_size,
            flushing_batch_timeout: parse_duration(&self.flushing_batch_timeout)?,
            data_directory: self.data_directory.clone(),
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl ReplicationConfig {
    /// Parse the replica type
    pub fn role(&self) -> Result<ReplicaRole> {
        match self.replica_type.to_ascii_lowercase().as_str() {
            "master" => Ok(ReplicaRole::Master),
            "slave" => Ok(ReplicaRole::Slave),
            other => Err(Error::Config(format!(
                "replication.replica_type '{}' must be 'master' or 'slave'",
                other
            ))),
        }
    }

    /// Slave polling period
    pub fn sync_interval(&self) -> Result<Duration> {
        let interval = parse_duration(&self.sync_interval)?;
        if interval.is_zero() {
            return Err(Error::Config("replication.sync_interval must be positive".into()));
        }
        Ok(interval)
    }
}

/// Largest response a master may send for one segment
///
/// The active segment is sealed on the write after it crosses the
/// threshold, so it can hold one extra batch of maximal records.
fn largest_segment_response(settings: &WalSettings, max_message_size: usize) -> Option<u64> {
    let record = (max_message_size as u64).checked_add(RECORD_OVERHEAD)?;
    let batch = record.checked_mul(settings.flushing_batch_size as u64)?;
    settings
        .max_segment_size
        .checked_add(batch)?
        .checked_add(RESPONSE_OVERHEAD)
}

/// Parse a human size string such as "512B", "4KB" or "10MB"
pub fn parse_size(input: &str) -> Result<usize> {
    let normalized = input.trim().to_ascii_uppercase();
    let split = normalized
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::Config(format!("size '{}' is missing a unit", input)))?;
    let (digits, unit) = normalized.split_at(split);

    let value: usize = digits
        .parse()
        .map_err(|_| Error::Config(format!("invalid size '{}'", input)))?;

    let multiplier = match unit.trim() {
        "B" => 1,
        "KB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        other => {
            return Err(Error::Config(format!(
                "unknown size unit '{}' in '{}'",
                other, input
            )))
        }
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::Config(format!("size '{}' is too large", input)))
}

/// Parse a duration string such as "10ms", "5s", "1m" or "2h"
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::Config(format!("duration '{}' is missing a unit", input)))?;
    let (digits, unit) = trimmed.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration '{}'", input)))?;

    let seconds_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => {
            return Err(Error::Config(format!(
                "unknown duration unit '{}' in '{}'",
                other, input
            )))
        }
    };

    value
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::Config(format!("duration '{}' is too large", input)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[network]
address = "0.0.0.0:3223"
max_connections = 10
max_message_size = "8KB"
idle_timeout = "30s"

[logging]
level = "debug"

[wal]
flushing_batch_size = 50
flushing_batch_timeout = "20ms"
max_segment_size = "1MB"
data_directory = "/tmp/wolfkv"

[replication]
replica_type = "slave"
master_address = "127.0.0.1:3232"
sync_interval = "2s"
"#;

        let config = WolfKvConfig::from_str(toml).unwrap();
        assert_eq!(config.network.max_connections, 10);
        assert_eq!(config.max_message_size().unwrap(), 8 * 1024);
        assert_eq!(config.idle_timeout().unwrap(), Some(Duration::from_secs(30)));
        assert_eq!(config.role().unwrap(), Some(ReplicaRole::Slave));

        let settings = config.wal.as_ref().unwrap().settings().unwrap();
        assert_eq!(settings.flushing_batch_size, 50);
        assert_eq!(settings.flushing_batch_timeout, Duration::from_millis(20));
        assert_eq!(settings.max_segment_size, 1024 * 1024);
        assert_eq!(settings.data_directory, PathBuf::from("/tmp/wolfkv"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = WolfKvConfig::from_str("").unwrap();
        assert_eq!(config, WolfKvConfig::default());
        assert_eq!(config.network.address, "127.0.0.1:3223");
        assert_eq!(config.max_message_size().unwrap(), 4096);
        assert!(config.wal.is_none());
        assert_eq!(config.role().unwrap(), None);
    }

    #[test]
    fn test_wal_defaults() {
        let config = WolfKvConfig::from_str("[wal]\ndata_directory = \"data\"\n").unwrap();
        let settings = config.wal.unwrap().settings().unwrap();
        assert_eq!(settings.flushing_batch_size, 100);
        assert_eq!(settings.flushing_batch_timeout, Duration::from_millis(10));
        assert_eq!(settings.max_segment_size, 10 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_config() {
        assert!(WolfKvConfig::from_str("[engine]\ntype = \"disk\"\n").is_err());
        assert!(WolfKvConfig::from_str("[wal]\nflushing_batch_size = 0\n").is_err());
        assert!(WolfKvConfig::from_str("[wal]\nmax_segment_size = \"0MB\"\n").is_err());
        assert!(WolfKvConfig::from_str(
            "[replication]\nreplica_type = \"leader\"\nmaster_address = \"x:1\"\n"
        )
        .is_err());
        assert!(WolfKvConfig::from_str("[network]\nidle_timeout = \"forever\"\n").is_err());
        assert!(WolfKvConfig::from_str(
            "[replication]\nreplica_type = \"master\"\nmaster_address = \"x:1\"\n"
        )
        .is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("3B").unwrap(), 3);
        assert_eq!(parse_size("4KB").unwrap(), 4096);
        assert_eq!(parse_size("4kb").unwrap(), 4096);
        assert_eq!(parse_size(" 10MB ").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("1GB").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_size("10").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("10TB").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10ms").unwrap(), Duration::from_millis(10));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("1d").is_err());
        assert!(matches!(
            parse_duration("307445734561825861m"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            parse_duration("18446744073709551615h"),
            Err(Error::Config(_))
        ));
    }

    fn replicated(wal: &str) -> String {
        format!(
            "[wal]\ndata_directory = \"/tmp/wolfkv\"\n{}\n\n\
             [replication]\nreplica_type = \"master\"\nmaster_address = \"127.0.0.1:3232\"\n",
            wal
        )
    }

    #[test]
    fn test_replicated_segment_must_fit_response() {
        assert!(WolfKvConfig::from_str(&replicated("")).is_ok());
        assert!(WolfKvConfig::from_str(&replicated("max_segment_size = \"256MB\"")).is_ok());

        let err = WolfKvConfig::from_str(&replicated("max_segment_size = \"1GB\"")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        // The batch written past the threshold counts too
        let oversized_batch =
            "max_segment_size = \"500MB\"\nflushing_batch_size = 100000";
        assert!(WolfKvConfig::from_str(&replicated(oversized_batch)).is_err());

        // Without replication any segment size is accepted
        assert!(WolfKvConfig::from_str("[wal]\nmax_segment_size = \"1GB\"\n").is_ok());
    }

    #[test]
    fn test_round_trip_toml() {
        let mut config = WolfKvConfig::default();
        config.wal = Some(WalConfig::default());
        let rendered = config.to_toml().unwrap();
        assert_eq!(WolfKvConfig::from_str(&rendered).unwrap(), config);
    }
}

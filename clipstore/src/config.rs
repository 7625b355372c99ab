//! Store configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::shard::LockDiscipline;

/// Environment variable naming a JSON config file
pub const CONFIG_ENV: &str = "CLIPSTORE_CONFIG";

/// Largest supported `shard_bits`
pub const MAX_SHARD_BITS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Shard table has `1 << shard_bits` buckets
    pub shard_bits: u32,
    /// Capacity of a freshly created entry, in bytes
    pub initial_capacity: usize,
    /// Ceiling for buffer growth, in bytes
    pub max_capacity: usize,
    pub lock_discipline: LockDiscipline,
    /// Queue length of each session's notification sink
    pub notify_channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shard_bits: 10,
            initial_capacity: 1024,
            max_capacity: 10 * 1024 * 1024,
            lock_discipline: LockDiscipline::ReadWrite,
            notify_channel_capacity: 16,
        }
    }
}

impl StoreConfig {
    /// Parse a JSON document; missing keys take their defaults
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the values are invalid.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document from a reader
    ///
    /// # Errors
    /// Returns an error if reading fails, the JSON is malformed or the
    /// values are invalid.
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, ConfigError> {
        let config: StoreConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `CLIPSTORE_CONFIG`, or use the defaults
    ///
    /// # Errors
    /// Returns an error if the named file cannot be read or parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Load from a JSON file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Check the values are usable together
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_bits > MAX_SHARD_BITS {
            return Err(ConfigError::Invalid(format!(
                "shard_bits {} is above {MAX_SHARD_BITS}",
                self.shard_bits
            )));
        }
        if self.initial_capacity == 0 {
            return Err(ConfigError::Invalid("initial_capacity must be positive".into()));
        }
        if self.initial_capacity > self.max_capacity {
            return Err(ConfigError::Invalid(format!(
                "initial_capacity {} is above max_capacity {}",
                self.initial_capacity, self.max_capacity
            )));
        }
        if self.notify_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "notify_channel_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.shard_bits, 10);
        assert_eq!(config.initial_capacity, 1024);
        assert_eq!(config.max_capacity, 10 * 1024 * 1024);
        assert_eq!(config.lock_discipline, LockDiscipline::ReadWrite);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            StoreConfig::from_json_str(r#"{"max_capacity": 4096, "lock_discipline": "exclusive"}"#)
                .unwrap();
        assert_eq!(config.max_capacity, 4096);
        assert_eq!(config.lock_discipline, LockDiscipline::Exclusive);
        assert_eq!(config.initial_capacity, 1024);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = StoreConfig::from_json_str(r#"{"max_capacityy": 1}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_initial_above_max_rejected() {
        let err = StoreConfig::from_json_str(r#"{"initial_capacity": 2048, "max_capacity": 1024}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_reader() {
        let json = br#"{"shard_bits": 2}"#;
        let config = StoreConfig::from_reader(&json[..]).unwrap();
        assert_eq!(config.shard_bits, 2);
    }
}

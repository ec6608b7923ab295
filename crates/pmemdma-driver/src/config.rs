use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound on channels a single driver instance manages.
pub const MAX_CHANNELS: usize = 256;

/// How a free channel is chosen on acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// Always scan from channel 0.
    #[default]
    LowestFree,
    /// Start each scan one past the previous starting point.
    RoundRobin,
}

/// Driver instance configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Device name, used in logs and diagnostics.
    pub name: String,
    /// Number of channels. Fixed for the lifetime of the driver.
    pub channels: usize,
    /// Free-channel selection strategy.
    pub allocation: AllocationPolicy,
    /// When true, a failed transfer restores the destination span it may have
    /// partially written. When false, a failed transfer may leave the
    /// destination torn.
    pub restore_on_failure: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "ioat-dma".to_string(),
            channels: 4,
            allocation: AllocationPolicy::LowestFree,
            restore_on_failure: true,
        }
    }
}

impl DeviceConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the driver cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels == 0 {
            return Err(ConfigError::NoChannels);
        }
        if self.channels > MAX_CHANNELS {
            return Err(ConfigError::TooManyChannels {
                requested: self.channels,
                max: MAX_CHANNELS,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = DeviceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channels, 4);
        assert!(config.restore_on_failure);
    }

    #[test]
    fn zero_channels_rejected() {
        let config = DeviceConfig {
            channels: 0,
            ..DeviceConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoChannels)));
    }

    #[test]
    fn too_many_channels_rejected() {
        let config = DeviceConfig {
            channels: MAX_CHANNELS + 1,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyChannels { .. })
        ));
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config: DeviceConfig =
            serde_json::from_str(r#"{"channels": 2, "allocation": "round_robin"}"#).unwrap();
        assert_eq!(config.channels, 2);
        assert_eq!(config.allocation, AllocationPolicy::RoundRobin);
        assert_eq!(config.name, "ioat-dma");
    }

    #[test]
    fn unknown_fields_rejected() {
        let result: Result<DeviceConfig, _> = serde_json::from_str(r#"{"chanels": 2}"#);
        assert!(result.is_err());
    }

    #[test]
    fn from_json_file_validates() {
        let dir = std::env::temp_dir().join(format!(
            "pmemdma-config-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");

        let good = dir.join("good.json");
        std::fs::write(&good, r#"{"name": "dma-test", "channels": 8}"#).unwrap();
        let config = DeviceConfig::from_json_file(&good).unwrap();
        assert_eq!(config.name, "dma-test");
        assert_eq!(config.channels, 8);

        let bad = dir.join("bad.json");
        std::fs::write(&bad, r#"{"channels": 0}"#).unwrap();
        assert!(matches!(
            DeviceConfig::from_json_file(&bad),
            Err(ConfigError::NoChannels)
        ));

        assert!(matches!(
            DeviceConfig::from_json_file(dir.join("missing.json")),
            Err(ConfigError::Read { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}

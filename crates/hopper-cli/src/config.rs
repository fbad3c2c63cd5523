//! `hopper.toml`: one file for the queue, the processor and the store.

use std::path::{Path, PathBuf};

use hopper_core::{ProcessorConfig, QueueConfig};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HopperConfig {
    pub queue: QueueConfig,
    pub processor: ProcessorConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. `:memory:` keeps everything in process.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("hopper.db"),
        }
    }
}

impl HopperConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: HopperConfig = toml::from_str(s)?;
        config.queue.validate()?;
        config.processor.validate()?;
        Ok(config)
    }

    /// Missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        match path {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?),
            None => Ok(Self::default()),
        }
    }

    pub fn in_memory(&self) -> bool {
        self.store.path.as_os_str() == ":memory:"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = HopperConfig::from_toml_str("").unwrap();
        assert_eq!(config.queue.queue_name, "default");
        assert_eq!(config.processor.max_in_flight, 16);
        assert_eq!(config.store.path, PathBuf::from("hopper.db"));
    }

    #[test]
    fn sections_override_defaults() {
        let config = HopperConfig::from_toml_str(
            r#"
            [queue]
            queue_name = "mail"
            ack_timeout_ms = 5000

            [processor]
            max_in_flight = 2

            [store]
            path = ":memory:"
            "#,
        )
        .unwrap();
        assert_eq!(config.queue.queue_name, "mail");
        assert_eq!(config.queue.ack_timeout_ms, 5000);
        assert_eq!(config.processor.max_in_flight, 2);
        assert!(config.in_memory());
    }

    #[test]
    fn invalid_processor_section_is_rejected() {
        let result = HopperConfig::from_toml_str("[processor]\npoll_interval_ms = 0\n");
        assert!(result.is_err());
    }
}

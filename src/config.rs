use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-tax.json";
pub const DEFAULT_BASE_URL: &str = "https://api.gbif.org/v1/";
pub const BASE_URL_ENV: &str = "GBIF_API_URL";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GbifConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_retries")]
    pub retries: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause after every request.
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

impl Default for GbifConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            retries: default_retries(),
            timeout_secs: default_timeout_secs(),
            wait_ms: default_wait_ms(),
            buffer: default_buffer(),
        }
    }
}

impl GbifConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn base(&self) -> String {
        format!("{}/", self.base_url.trim_end_matches('/'))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<GbifConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let mut config = if path.is_none() && !config_path.exists() {
            GbifConfig::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
            Self::parse(&content)?
        };

        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.base_url = url.trim().to_string();
            }
        }
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<GbifConfig, KiraError> {
        let config: GbifConfig =
            serde_json::from_str(content).map_err(|err| KiraError::ConfigParse(err.to_string()))?;
        if config.buffer == 0 {
            return Err(KiraError::ConfigParse(
                "buffer must hold at least one request".to_string(),
            ));
        }
        Ok(config)
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_retries() -> usize {
    5
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_wait_ms() -> u64 {
    300
}

fn default_buffer() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_defaults() {
        let config = ConfigLoader::parse("{}").unwrap();
        assert_eq!(config, GbifConfig::default());
        assert_eq!(config.retries, 5);
        assert_eq!(config.wait(), Duration::from_millis(300));
    }

    #[test]
    fn base_has_single_trailing_slash() {
        let config = GbifConfig {
            base_url: "http://localhost:8080/v1//".to_string(),
            ..GbifConfig::default()
        };
        assert_eq!(config.base(), "http://localhost:8080/v1/");
    }
}

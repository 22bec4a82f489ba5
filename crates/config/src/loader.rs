// crates/config/src/loader.rs

use std::path::Path;

use lotse_core::{LotseError, LotseResult};

use crate::LotseConfig;

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load_from_file(path: &Path) -> LotseResult<LotseConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LotseError::Config(format!("Failed to read config: {}", e)))?;

        let config: LotseConfig = toml::from_str(&content)
            .map_err(|e| LotseError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    pub fn save_to_file(path: &Path, config: &LotseConfig) -> LotseResult<()> {
        let content = toml::to_string_pretty(config)
            .map_err(|e| LotseError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| LotseError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Environment variables override file values for the handful of knobs
    /// operators tune in the field.
    pub fn apply_env_overrides(config: &mut LotseConfig) -> LotseResult<()> {
        if let Ok(level) = std::env::var("LOTSE_LOG_LEVEL") {
            config.app.log_level = level;
        }
        if let Ok(url) = std::env::var("LOTSE_REMOTE_URL") {
            config.dispatch.remote.base_url = url.clone();
            config.connectivity.probe_url = format!("{}/health", url.trim_end_matches('/'));
        }
        if let Ok(budget) = std::env::var("LOTSE_EVENT_BUDGET_MS") {
            config.dispatch.event_budget_ms = budget
                .parse()
                .map_err(|_| LotseError::Config("Invalid LOTSE_EVENT_BUDGET_MS".to_string()))?;
        }
        if let Ok(silence) = std::env::var("LOTSE_MAX_SILENCE_MS") {
            config.acquisition.max_silence_ms = silence
                .parse()
                .map_err(|_| LotseError::Config("Invalid LOTSE_MAX_SILENCE_MS".to_string()))?;
        }

        Ok(())
    }

    pub fn load(path: Option<&Path>) -> LotseResult<LotseConfig> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => LotseConfig::default(),
        };

        Self::apply_env_overrides(&mut config)?;
        crate::ConfigValidator::validate(&config)?;
        Ok(config)
    }
}

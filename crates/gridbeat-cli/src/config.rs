use std::path::PathBuf;

use gridbeat_services::EngineConfig;

#[derive(serde::Serialize, serde::Deserialize, Default)]
pub struct CliConfig {
    #[serde(default)]
    pub engine: EngineConfig,
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gridbeat")
        .join("config.toml")
}

/// Missing or unreadable config falls back to defaults
pub fn load_config() -> CliConfig {
    let path = config_path();
    let Ok(text) = std::fs::read_to_string(&path) else {
        return CliConfig::default();
    };
    match toml::from_str(&text) {
        Ok(config) => {
            tracing::debug!(path = %path.display(), "Loaded config");
            config
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring invalid config");
            CliConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_table_overrides_defaults() {
        let config: CliConfig = toml::from_str("[engine]\ndefault_bpm = 96.0\n").unwrap();
        assert_eq!(config.engine.default_bpm, 96.0);
        assert_eq!(config.engine.max_total_voices, EngineConfig::default().max_total_voices);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: CliConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine, EngineConfig::default());
    }
}

//! Assistant configuration

use adas::AdasConfig;
use calibration::CalibrationConfig;
use config::{Config, ConfigError, Environment, File};
use event_fusion::FusionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "driving-assistant";

/// Environment variable prefix
///
/// Nested keys are joined with `__`: `DRIVING_ASSISTANT_LOGGING__LEVEL`,
/// `DRIVING_ASSISTANT_ADAS__LANE__WINDOWS`.
pub const ENV_PREFIX: &str = "DRIVING_ASSISTANT";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Required capture size; frames of any other size are rejected
    pub frame_size: Option<(u32, u32)>,

    pub calibration: CalibrationConfig,
    pub adas: AdasConfig,
    pub fusion: FusionConfig,
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,

    /// Emit JSON lines instead of the human format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AssistantConfig {
    /// Load from an optional file layered under environment overrides
    ///
    /// Without an explicit path, `driving-assistant.{toml,json,yaml}` is
    /// read when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_hold_literal_constants() {
        let config = AssistantConfig::default();
        assert_eq!(config.adas.lane.windows, 9);
        assert_eq!(config.adas.position.far_offset, 75.0);
        assert_eq!(config.adas.objects.confidence_threshold, 0.75);
        assert_eq!(config.calibration.board_columns, 9);
        assert_eq!(config.fusion.record_every_n_frames, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_file_overrides_nested_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assistant.toml");
        std::fs::write(
            &path,
            r#"
[adas.lane]
windows = 12

[fusion]
record_every_n_frames = 1

[logging]
json = true
"#,
        )
        .unwrap();

        let config = AssistantConfig::load(Some(&path)).unwrap();
        assert_eq!(config.adas.lane.windows, 12);
        assert_eq!(config.adas.lane.min_pixels, 50);
        assert_eq!(config.fusion.record_every_n_frames, 1);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(AssistantConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assistant.toml");
        std::fs::write(&path, "frame_size = [1280, 720]\n\n[logging]\nlevel = \"warn\"\n").unwrap();

        let vars = HashMap::from([
            ("DRIVING_ASSISTANT_LOGGING__LEVEL".to_string(), "debug".to_string()),
            ("DRIVING_ASSISTANT_ADAS__LANE__WINDOWS".to_string(), "7".to_string()),
            ("OTHER_APP_LOGGING__LEVEL".to_string(), "trace".to_string()),
        ]);
        let config = AssistantConfig::load_with(Some(&path), environment().source(Some(vars))).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.adas.lane.windows, 7);
        assert_eq!(config.frame_size, Some((1280, 720)));
    }
}

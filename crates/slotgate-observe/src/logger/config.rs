use std::io::IsTerminal;

use serde::{Deserialize, Serialize};

use super::{format::LoggerFormat, level::LoggerLevel};

/// Logger configuration; usually the `[logging]` table of the daemon config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    pub level: LoggerLevel,
    /// Include module targets in each line.
    pub with_targets: bool,
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::default(),
            level: LoggerLevel::default(),
            with_targets: true,
            use_color: true,
        }
    }
}

impl LoggerConfig {
    /// Color only when enabled and stdout is a terminal.
    pub fn should_use_color(&self) -> bool {
        self.use_color && std::io::stdout().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let cfg: LoggerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, LoggerConfig::default());
        assert_eq!(cfg.level.as_str(), "info");
        assert!(cfg.with_targets);
    }

    #[test]
    fn loads_from_toml_table() {
        let cfg: LoggerConfig = toml::from_str(
            r#"
            format = "json"
            level = "slotgate_core=debug,info"
            use_color = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.format, LoggerFormat::Json);
        assert_eq!(cfg.level.as_str(), "slotgate_core=debug,info");
        assert!(!cfg.use_color);
        assert!(cfg.with_targets);
    }

    #[test]
    fn invalid_level_fails_the_whole_config() {
        assert!(toml::from_str::<LoggerConfig>(r#"level = "core=shouty""#).is_err());
    }
}

//! Daemon configuration: a TOML file overlaid by command-line flags.
use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;
use slotgate_model::GateSettings;
use slotgate_observe::LoggerConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// HTTP listener for `/metrics`, `/usage` and `/health`.
    pub listen: SocketAddr,
    /// Shared store; without it the gate only covers this process.
    pub redis_url: Option<String>,
    pub key_prefix: Option<String>,
    /// Directory job queue; in-memory when unset.
    pub queue_root: Option<PathBuf>,
    /// Hot-reloaded local settings file. Takes precedence over Redis and `[gate]`.
    pub settings_file: Option<PathBuf>,
    /// Inline settings used when no settings file is configured.
    pub gate: GateSettings,
    pub logging: LoggerConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 9464)),
            redis_url: None,
            key_prefix: None,
            queue_root: None,
            settings_file: None,
            gate: GateSettings::default(),
            logging: LoggerConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Read `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.gate.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let cfg = AgentConfig::parse("").unwrap();
        assert_eq!(cfg.listen.port(), 9464);
        assert!(cfg.redis_url.is_none());
        assert_eq!(cfg.gate.max_in_flight, 150);
        assert_eq!(cfg.logging.level.as_str(), "info");
    }

    #[test]
    fn parses_sections() {
        let cfg = AgentConfig::parse(
            r#"
            listen = "0.0.0.0:8080"
            redis_url = "redis://cache:6379"
            queue_root = "/var/lib/slotgate"

            [gate]
            max_in_flight = 20
            max_rpm = 60

            [gate.acquire_backoff]
            jitter = "equal"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.listen.port(), 8080);
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(cfg.queue_root, Some(PathBuf::from("/var/lib/slotgate")));
        assert_eq!(cfg.gate.max_in_flight, 20);
        assert_eq!(cfg.gate.max_rpm, 60);
        assert_eq!(cfg.gate.max_retries, 3);
        assert_eq!(cfg.logging.format, slotgate_observe::LoggerFormat::Json);
    }

    #[test]
    fn invalid_gate_settings_are_rejected() {
        assert!(AgentConfig::parse("[gate]\nmax_rpm = 0").is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slotgated.toml");
        std::fs::write(&path, "[gate]\nmax_retries = 5\n").unwrap();

        let cfg = AgentConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.gate.max_retries, 5);
        assert!(AgentConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use slotgate_model::GateSettings;
use tokio::sync::RwLock;
use tracing::debug;

use super::{SettingsError, SettingsResult};

/// Where gate settings live.
#[async_trait]
pub trait SettingsSource: Send + Sync + 'static {
    /// Load and validate the current settings.
    async fn load(&self) -> SettingsResult<GateSettings>;

    /// Persist a full settings document.
    async fn store(&self, settings: &GateSettings) -> SettingsResult<()>;

    /// Human-readable name for logs and errors.
    fn describe(&self) -> String;
}

/// In-memory settings, mutable at runtime.
#[derive(Debug, Default)]
pub struct StaticSettings {
    inner: RwLock<GateSettings>,
}

impl StaticSettings {
    pub fn new(settings: GateSettings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }
}

#[async_trait]
impl SettingsSource for StaticSettings {
    async fn load(&self) -> SettingsResult<GateSettings> {
        Ok(self.inner.read().await.clone())
    }

    async fn store(&self, settings: &GateSettings) -> SettingsResult<()> {
        settings.validate()?;
        *self.inner.write().await = settings.clone();
        Ok(())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// TOML document on disk. A missing file reads as all defaults.
#[derive(Debug, Clone)]
pub struct TomlFileSettings {
    path: PathBuf,
}

impl TomlFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_err(&self, reason: impl ToString) -> SettingsError {
        SettingsError::Read {
            source_name: self.describe(),
            reason: reason.to_string(),
        }
    }

    fn write_err(&self, reason: impl ToString) -> SettingsError {
        SettingsError::Write {
            source_name: self.describe(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl SettingsSource for TomlFileSettings {
    async fn load(&self) -> SettingsResult<GateSettings> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "settings file missing, using defaults");
                return Ok(GateSettings::default());
            }
            Err(e) => return Err(self.read_err(e)),
        };
        let settings: GateSettings =
            toml::from_str(&data).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    async fn store(&self, settings: &GateSettings) -> SettingsResult<()> {
        settings.validate()?;
        let body = toml::to_string_pretty(settings).map_err(|e| self.write_err(e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.write_err(e))?;
        }
        let tmp = self.path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| self.write_err(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.write_err(e))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

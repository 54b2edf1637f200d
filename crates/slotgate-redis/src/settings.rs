use async_trait::async_trait;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use slotgate_core::settings::{SettingsError, SettingsResult, SettingsSource};
use slotgate_model::GateSettings;
use tracing::{debug, info};

use crate::keys::RedisKeys;

/// Gate settings kept as one JSON document in Redis, shared by every process on the same
/// server. A missing document reads as all defaults.
#[derive(Clone)]
pub struct RedisSettings {
    conn: MultiplexedConnection,
    key: String,
}

impl RedisSettings {
    pub(crate) fn new(conn: MultiplexedConnection, keys: &RedisKeys) -> Self {
        Self {
            conn,
            key: keys.settings(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Write `settings` only if no document exists yet; returns whether it was written.
    pub async fn seed(&self, settings: &GateSettings) -> SettingsResult<bool> {
        settings.validate()?;
        let json = encode(settings).map_err(|e| self.write_err(e))?;
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(json)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| self.write_err(e))?;
        let seeded = reply.is_some();
        if seeded {
            info!(key = %self.key, "shared settings seeded");
        }
        Ok(seeded)
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

fn encode(settings: &GateSettings) -> Result<String, serde_json::Error> {
    serde_json::to_string(settings)
}

fn decode(raw: &str) -> SettingsResult<GateSettings> {
    let settings: GateSettings =
        serde_json::from_str(raw).map_err(|e| SettingsError::Parse(e.to_string()))?;
    settings.validate()?;
    Ok(settings)
}

#[async_trait]
impl SettingsSource for RedisSettings {
    async fn load(&self) -> SettingsResult<GateSettings> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&self.key).await.map_err(|e| self.read_err(e))?;
        match raw {
            Some(raw) => decode(&raw),
            None => {
                debug!(key = %self.key, "no shared settings, using defaults");
                Ok(GateSettings::default())
            }
        }
    }

    async fn store(&self, settings: &GateSettings) -> SettingsResult<()> {
        settings.validate()?;
        let json = encode(settings).map_err(|e| self.write_err(e))?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(&self.key, json).await.map_err(|e| self.write_err(e))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("redis:{}", self.key)
    }
}

use std::sync::Arc;

use slotgate_model::GateSettings;
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, warn};

use super::{SettingsResult, SettingsSource};

struct Cached {
    settings: Arc<GateSettings>,
    loaded_at: Instant,
}

/// Caching front for a [`SettingsSource`].
///
/// Settings are reloaded once the cached copy is older than its own `settings_cache_ttl_secs`.
/// A failed reload keeps serving the previous copy for another TTL before the source is tried again.
pub struct SettingsProvider {
    source: Arc<dyn SettingsSource>,
    cache: RwLock<Option<Cached>>,
}

impl SettingsProvider {
    pub fn new(source: Arc<dyn SettingsSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(None),
        }
    }

    /// Provider over fixed in-memory settings.
    pub fn fixed(settings: GateSettings) -> Arc<Self> {
        Arc::new(Self::new(Arc::new(super::StaticSettings::new(settings))))
    }

    pub fn source(&self) -> &Arc<dyn SettingsSource> {
        &self.source
    }

    pub async fn current(&self) -> SettingsResult<Arc<GateSettings>> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.loaded_at.elapsed() < cached.settings.settings_cache_ttl() {
                return Ok(Arc::clone(&cached.settings));
            }
        }

        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.as_ref() {
            if cached.loaded_at.elapsed() < cached.settings.settings_cache_ttl() {
                return Ok(Arc::clone(&cached.settings));
            }
        }

        match self.source.load().await {
            Ok(settings) => {
                debug!(source = %self.source.describe(), "settings reloaded");
                if !settings.stale_sweep_effective() {
                    warn!(
                        stale_job_secs = settings.stale_job_secs,
                        job_record_ttl_secs = settings.job_record_ttl_secs,
                        "job records expire before they turn stale; the stale sweep never fires"
                    );
                }
                let settings = Arc::new(settings);
                *cache = Some(Cached {
                    settings: Arc::clone(&settings),
                    loaded_at: Instant::now(),
                });
                Ok(settings)
            }
            Err(e) => match cache.take() {
                Some(stale) => {
                    warn!(source = %self.source.describe(), error = %e, "settings reload failed, keeping previous");
                    let settings = stale.settings;
                    *cache = Some(Cached {
                        settings: Arc::clone(&settings),
                        loaded_at: Instant::now(),
                    });
                    Ok(settings)
                }
                None => Err(e),
            },
        }
    }

    /// Drop the cached copy so the next read hits the source.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}

use async_trait::async_trait;
use redis::{AsyncCommands, RedisError, aio::MultiplexedConnection};
use serde::de::DeserializeOwned;
use slotgate_core::store::{MarkReleased, SlotStore, StoreError, StoreResult, TrackingCleared};
use slotgate_model::{
    GLOBAL_BACKOFF_ID, GlobalBackoff, IN_FLIGHT_COUNTER_ID, InFlightCounter, InFlightJobRecord,
    JobToken, MinuteKey, RpmWindow,
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{debug, instrument, warn};

use crate::{keys::RedisKeys, scripts, settings::RedisSettings};

/// Slot store shared by every process pointed at the same Redis.
#[derive(Clone)]
pub struct RedisSlotStore {
    conn: MultiplexedConnection,
    keys: RedisKeys,
}

impl RedisSlotStore {
    /// Open a multiplexed connection to `url`.
    #[instrument(level = "debug", skip(url), fields(prefix = %keys.prefix()))]
    pub async fn connect(url: &str, keys: RedisKeys) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        debug!("redis slot store connected");
        Ok(Self { conn, keys })
    }

    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    /// Settings document living next to the records, sharing this connection.
    pub fn settings_source(&self) -> RedisSettings {
        RedisSettings::new(self.conn.clone(), &self.keys)
    }

    async fn get_record<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.map_err(map_err)?;
        raw.map(|raw| decode(self.keys.record_id(key).unwrap_or(key), &raw))
            .transpose()
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut iter: redis::AsyncIter<'_, String> =
            conn.scan_match(pattern).await.map_err(map_err)?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn delete_matching(&self, pattern: &str) -> StoreResult<u64> {
        let keys = self.scan_keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.del(&keys).await.map_err(map_err)
    }
}

fn map_err(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}

fn decode<T: DeserializeOwned>(id: &str, raw: &str) -> StoreResult<T> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn timestamp(now: OffsetDateTime) -> StoreResult<String> {
    now.format(&Rfc3339)
        .map_err(|e| StoreError::Backend(format!("format timestamp: {e}")))
}

#[async_trait]
impl SlotStore for RedisSlotStore {
    async fn in_flight(&self) -> StoreResult<InFlightCounter> {
        let counter = self.get_record(&self.keys.counter()).await?;
        Ok(counter.unwrap_or_else(InFlightCounter::empty))
    }

    async fn try_increment_in_flight(&self, max: u64, now: OffsetDateTime) -> StoreResult<Option<u64>> {
        let mut conn = self.conn.clone();
        let reply: i64 = scripts::INCREMENT_IN_FLIGHT
            .key(self.keys.counter())
            .arg(max)
            .arg(timestamp(now)?)
            .arg(IN_FLIGHT_COUNTER_ID)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(scripts::conditional(reply))
    }

    async fn try_decrement_in_flight(&self, now: OffsetDateTime) -> StoreResult<Option<u64>> {
        let mut conn = self.conn.clone();
        let reply: i64 = scripts::DECREMENT_IN_FLIGHT
            .key(self.keys.counter())
            .arg(timestamp(now)?)
            .arg(IN_FLIGHT_COUNTER_ID)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(scripts::conditional(reply))
    }

    async fn compare_and_set_in_flight(
        &self,
        expected: u64,
        new: u64,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let reply: i64 = scripts::COMPARE_AND_SET_IN_FLIGHT
            .key(self.keys.counter())
            .arg(expected)
            .arg(new)
            .arg(timestamp(now)?)
            .arg(IN_FLIGHT_COUNTER_ID)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(reply == 1)
    }

    async fn reset_in_flight(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let previous: i64 = scripts::RESET_IN_FLIGHT
            .key(self.keys.counter())
            .arg(timestamp(now)?)
            .arg(IN_FLIGHT_COUNTER_ID)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(scripts::conditional(previous).unwrap_or(0))
    }

    async fn rpm_window(&self, key: &MinuteKey) -> StoreResult<Option<RpmWindow>> {
        self.get_record(&self.keys.window(key)).await
    }

    async fn try_increment_rpm(
        &self,
        key: &MinuteKey,
        max: u64,
        expires_at: i64,
    ) -> StoreResult<Option<u64>> {
        let mut conn = self.conn.clone();
        let reply: i64 = scripts::INCREMENT_RPM
            .key(self.keys.window(key))
            .arg(max)
            .arg(expires_at)
            .arg(key.record_id())
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(scripts::conditional(reply))
    }

    async fn put_job(&self, record: &InFlightJobRecord) -> StoreResult<()> {
        let key = self.keys.record_key(&record.id);
        let json = serde_json::to_string(record).map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&key)
            .arg(json)
            .ignore()
            .cmd("EXPIREAT")
            .arg(&key)
            .arg(record.expires_at)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn job(&self, token: &JobToken) -> StoreResult<Option<InFlightJobRecord>> {
        self.get_record(&self.keys.job(token)).await
    }

    async fn mark_released(&self, token: &JobToken) -> StoreResult<MarkReleased> {
        let mut conn = self.conn.clone();
        let reply: i64 = scripts::MARK_RELEASED
            .key(self.keys.job(token))
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        match reply {
            0 => Ok(MarkReleased::Missing),
            1 => Ok(MarkReleased::Released),
            2 => Ok(MarkReleased::AlreadyReleased),
            other => Err(StoreError::Backend(format!("unexpected release reply {other}"))),
        }
    }

    async fn jobs(&self) -> StoreResult<Vec<InFlightJobRecord>> {
        let keys = self.scan_keys(&self.keys.job_pattern()).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raws: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        let mut jobs = Vec::with_capacity(raws.len());
        for (key, raw) in keys.iter().zip(raws) {
            // Expired between SCAN and MGET.
            let Some(raw) = raw else { continue };
            match decode::<InFlightJobRecord>(self.keys.record_id(key).unwrap_or(key), &raw) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable job record"),
            }
        }
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(jobs)
    }

    async fn clear_tracking(&self) -> StoreResult<TrackingCleared> {
        let jobs = self.delete_matching(&self.keys.job_pattern()).await?;
        let windows = self.delete_matching(&self.keys.window_pattern()).await?;
        Ok(TrackingCleared { jobs, windows })
    }

    async fn global_backoff(&self) -> StoreResult<Option<GlobalBackoff>> {
        self.get_record(&self.keys.backoff()).await
    }

    async fn extend_global_backoff(&self, until: i64) -> StoreResult<GlobalBackoff> {
        let mut conn = self.conn.clone();
        let raw: String = scripts::EXTEND_BACKOFF
            .key(self.keys.backoff())
            .arg(until)
            .arg(GLOBAL_BACKOFF_ID)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        decode(GLOBAL_BACKOFF_ID, &raw)
    }

    async fn clear_global_backoff(&self) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(self.keys.backoff()).await.map_err(map_err)?;
        Ok(removed > 0)
    }
}

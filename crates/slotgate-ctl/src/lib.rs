//! Operator commands behind `slotgatectl`.
//!
//! Every command writes its result to a caller-supplied writer so the binary and
//! the tests share one code path.
use std::{io::Write, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, anyhow, bail};
use slotgate_core::{
    clock::{ClockHandle, system_clock},
    queue::{FsJobQueue, QueueHandle},
    settings::{SettingsProvider, SettingsSource, TomlFileSettings},
    store::StoreHandle,
    tracker::SlotTracker,
};
use slotgate_model::{Diagnosis, FailureRecord, GateSettings, Usage};
use slotgate_redis::{RedisKeys, RedisSlotStore};
use time::format_description::well_known::Rfc3339;

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Redis holding the shared slot store.
    pub redis_url: Option<String>,
    /// Key prefix inside Redis.
    pub key_prefix: Option<String>,
    /// Local settings file; without it settings live in Redis next to the counters.
    pub config: Option<PathBuf>,
    /// Root of the directory job queue.
    pub queue_root: Option<PathBuf>,
    /// Output JSON instead of text.
    pub json: bool,
}

/// Backends a command operates on.
pub struct Gate {
    store: StoreHandle,
    settings: Arc<dyn SettingsSource>,
    queue: Option<QueueHandle>,
    clock: ClockHandle,
}

impl Gate {
    pub fn new(store: StoreHandle, settings: Arc<dyn SettingsSource>) -> Self {
        Self {
            store,
            settings,
            queue: None,
            clock: system_clock(),
        }
    }

    pub fn with_queue(mut self, queue: QueueHandle) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_clock(mut self, clock: ClockHandle) -> Self {
        self.clock = clock;
        self
    }

    /// Open the backends named in `opts`.
    pub async fn connect(opts: &GlobalOptions) -> anyhow::Result<Self> {
        let url = opts
            .redis_url
            .as_deref()
            .ok_or_else(|| anyhow!("--redis-url is required"))?;
        let keys = opts
            .key_prefix
            .clone()
            .map(RedisKeys::new)
            .unwrap_or_default();
        let store = RedisSlotStore::connect(url, keys)
            .await
            .with_context(|| format!("connecting to {url}"))?;

        let settings: Arc<dyn SettingsSource> = match &opts.config {
            Some(path) => Arc::new(TomlFileSettings::new(path)),
            None => Arc::new(store.settings_source()),
        };

        let mut gate = Self::new(Arc::new(store), settings);
        if let Some(root) = &opts.queue_root {
            let queue = FsJobQueue::open(root)
                .await
                .with_context(|| format!("opening queue at {}", root.display()))?;
            gate = gate.with_queue(Arc::new(queue));
        }
        Ok(gate)
    }

    fn tracker(&self) -> SlotTracker {
        let provider = Arc::new(SettingsProvider::new(self.settings.clone()));
        SlotTracker::new(self.store.clone(), provider).with_clock(self.clock.clone())
    }

    fn queue(&self) -> anyhow::Result<&QueueHandle> {
        self.queue
            .as_ref()
            .ok_or_else(|| anyhow!("--queue-root is required for this command"))
    }

    async fn diagnosis(&self, settings: &GateSettings) -> anyhow::Result<Diagnosis> {
        let now = self.clock.now();
        let counter = self.store.in_flight().await?.value;
        let tracked = self
            .store
            .jobs()
            .await?
            .iter()
            .filter(|j| j.is_live(now))
            .count() as u64;
        Ok(Diagnosis::assess(counter, tracked, settings.reconciler_max_drift))
    }
}

/// Show counters, the current minute window, backoff and counter health.
pub async fn inspect<W: Write>(opts: &GlobalOptions, gate: &Gate, out: &mut W) -> anyhow::Result<()> {
    let settings = gate.settings.load().await?;
    let usage = gate.tracker().usage().await?;
    let diagnosis = gate.diagnosis(&settings).await?;

    if opts.json {
        let json = serde_json::json!({ "usage": usage, "diagnosis": diagnosis });
        writeln!(out, "{}", serde_json::to_string_pretty(&json)?)?;
        return Ok(());
    }
    write_usage(out, &usage)?;
    writeln!(out, "Tracked:    {} live call(s)", diagnosis.tracked)?;
    writeln!(out, "Health:     {} ({})", diagnosis.health, diagnosis.message)?;
    Ok(())
}

fn write_usage<W: Write>(out: &mut W, usage: &Usage) -> anyhow::Result<()> {
    writeln!(
        out,
        "In-flight:  {} / {} ({:.1}%), {} available",
        usage.in_flight, usage.max_in_flight, usage.in_flight_pct, usage.available
    )?;
    writeln!(
        out,
        "Minute:     {} {} / {} ({:.1}%)",
        usage.minute, usage.rpm_count, usage.max_rpm, usage.rpm_pct
    )?;
    if usage.backoff_remaining_secs > 0 {
        writeln!(out, "Backoff:    {}s remaining", usage.backoff_remaining_secs)?;
    } else {
        writeln!(out, "Backoff:    none")?;
    }
    if let Some(ts) = usage.last_updated {
        writeln!(out, "Updated:    {}", ts.format(&Rfc3339)?)?;
    }
    Ok(())
}

/// Zero the in-flight counter. Refuses unless `yes` is set.
pub async fn reset_in_flight<W: Write>(
    opts: &GlobalOptions,
    gate: &Gate,
    out: &mut W,
    yes: bool,
) -> anyhow::Result<()> {
    if !yes {
        bail!("refusing to reset the in-flight counter without --yes");
    }
    let previous = gate.store.reset_in_flight(gate.clock.now()).await?;
    if opts.json {
        let json = serde_json::json!({ "previous": previous, "value": 0 });
        writeln!(out, "{}", serde_json::to_string_pretty(&json)?)?;
    } else {
        writeln!(out, "in-flight counter reset: {previous} -> 0")?;
    }
    Ok(())
}

/// Delete every per-call tracking record and RPM window. Refuses unless `yes` is set.
pub async fn clear_tracking<W: Write>(
    opts: &GlobalOptions,
    gate: &Gate,
    out: &mut W,
    yes: bool,
) -> anyhow::Result<()> {
    if !yes {
        bail!("refusing to clear tracking records without --yes");
    }
    let cleared = gate.store.clear_tracking().await?;
    if opts.json {
        writeln!(out, "{}", serde_json::to_string(&cleared)?)?;
    } else {
        writeln!(
            out,
            "removed {} job record(s) and {} rpm window(s)",
            cleared.jobs, cleared.windows
        )?;
    }
    Ok(())
}

/// Print one parameter, or all of them when `name` is `None`.
pub async fn config_get<W: Write>(
    opts: &GlobalOptions,
    gate: &Gate,
    out: &mut W,
    name: Option<&str>,
) -> anyhow::Result<()> {
    let settings = gate.settings.load().await?;
    let entries = match name {
        Some(name) => vec![(name.trim().to_string(), settings.get(name)?)],
        None => settings
            .entries()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    };

    if opts.json {
        let map: serde_json::Map<_, _> = entries
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&map)?)?;
    } else {
        for (k, v) in entries {
            writeln!(out, "{k} = {v}")?;
        }
    }
    Ok(())
}

/// Validate and persist one parameter.
pub async fn config_set<W: Write>(
    opts: &GlobalOptions,
    gate: &Gate,
    out: &mut W,
    name: &str,
    value: &str,
) -> anyhow::Result<()> {
    let mut settings = gate.settings.load().await?;
    settings.set(name, value)?;
    gate.settings.store(&settings).await?;

    let stored = settings.get(name)?;
    if opts.json {
        let mut map = serde_json::Map::new();
        map.insert(name.trim().to_string(), serde_json::Value::String(stored));
        writeln!(out, "{}", serde_json::Value::Object(map))?;
    } else {
        writeln!(out, "{} = {stored}", name.trim())?;
    }
    Ok(())
}

/// Start or extend a global backoff lasting `secs` from now.
pub async fn backoff_set<W: Write>(
    opts: &GlobalOptions,
    gate: &Gate,
    out: &mut W,
    secs: u64,
) -> anyhow::Result<()> {
    if secs == 0 {
        bail!("backoff duration must be positive");
    }
    let backoff = gate
        .tracker()
        .signal_overload(Duration::from_secs(secs))
        .await?;
    if opts.json {
        writeln!(out, "{}", serde_json::to_string(&backoff)?)?;
    } else {
        writeln!(out, "global backoff until {}", backoff.backoff_until)?;
    }
    Ok(())
}

pub async fn backoff_clear<W: Write>(opts: &GlobalOptions, gate: &Gate, out: &mut W) -> anyhow::Result<()> {
    let cleared = gate.tracker().clear_overload().await?;
    if opts.json {
        writeln!(out, "{}", serde_json::json!({ "cleared": cleared }))?;
    } else if cleared {
        writeln!(out, "global backoff cleared")?;
    } else {
        writeln!(out, "no global backoff was set")?;
    }
    Ok(())
}

/// List recorded failures; with `drain`, remove them as they are read.
pub async fn failures<W: Write>(
    opts: &GlobalOptions,
    gate: &Gate,
    out: &mut W,
    drain: bool,
) -> anyhow::Result<()> {
    let queue = gate.queue()?;
    let records = if drain {
        queue.drain_failures().await?
    } else {
        queue.failures().await?
    };

    if opts.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?;
        return Ok(());
    }
    if records.is_empty() {
        writeln!(out, "no failures recorded")?;
    }
    for rec in &records {
        write_failure(out, rec)?;
    }
    Ok(())
}

fn write_failure<W: Write>(out: &mut W, rec: &FailureRecord) -> anyhow::Result<()> {
    writeln!(
        out,
        "{}  {:<40}  {:<9}  retries={}{}  {}",
        rec.recorded_at.format(&Rfc3339)?,
        rec.job_key.as_str(),
        rec.kind.as_str(),
        rec.retry_count,
        if rec.max_retries_exceeded { " (dead-lettered)" } else { "" },
        rec.reason
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotgate_core::{
        queue::{JobQueue, MemoryJobQueue},
        settings::StaticSettings,
        store::{MemorySlotStore, SlotStore},
    };
    use slotgate_model::{FailureKind, InFlightJobRecord, JobKey, JobToken, MinuteKey};
    use time::OffsetDateTime;

    fn gate() -> (Gate, Arc<MemorySlotStore>, Arc<MemoryJobQueue>) {
        let store = Arc::new(MemorySlotStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let settings = Arc::new(StaticSettings::new(GateSettings::default()));
        let gate = Gate::new(store.clone(), settings).with_queue(queue.clone());
        (gate, store, queue)
    }

    fn text(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    fn json_opts() -> GlobalOptions {
        GlobalOptions {
            json: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn inspect_reports_stuck_counter() {
        let (gate, store, _) = gate();
        let now = OffsetDateTime::now_utc();
        for _ in 0..3 {
            store.try_increment_in_flight(150, now).await.unwrap();
        }

        let mut out = Vec::new();
        inspect(&GlobalOptions::default(), &gate, &mut out).await.unwrap();
        let out = text(out);
        assert!(out.contains("In-flight:  3 / 150"), "{out}");
        assert!(out.contains("Health:     stuck"), "{out}");

        let mut out = Vec::new();
        inspect(&json_opts(), &gate, &mut out).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["diagnosis"]["health"], "stuck");
        assert_eq!(v["usage"]["in_flight"], 3);
    }

    #[tokio::test]
    async fn inspect_counts_live_records() {
        let (gate, store, _) = gate();
        let now = OffsetDateTime::now_utc();
        store.try_increment_in_flight(150, now).await.unwrap();
        let rec = InFlightJobRecord::new(&JobToken::new(), "ocr", now, time::Duration::hours(1));
        store.put_job(&rec).await.unwrap();

        let mut out = Vec::new();
        inspect(&GlobalOptions::default(), &gate, &mut out).await.unwrap();
        let out = text(out);
        assert!(out.contains("Tracked:    1 live call(s)"), "{out}");
        assert!(out.contains("Health:     healthy"), "{out}");
    }

    #[tokio::test]
    async fn reset_requires_confirmation() {
        let (gate, store, _) = gate();
        store
            .try_increment_in_flight(150, OffsetDateTime::now_utc())
            .await
            .unwrap();

        let mut out = Vec::new();
        assert!(reset_in_flight(&GlobalOptions::default(), &gate, &mut out, false).await.is_err());
        assert_eq!(store.in_flight().await.unwrap().value, 1);
        assert!(out.is_empty());

        reset_in_flight(&GlobalOptions::default(), &gate, &mut out, true).await.unwrap();
        assert_eq!(text(out), "in-flight counter reset: 1 -> 0\n");
        assert_eq!(store.in_flight().await.unwrap().value, 0);
    }

    #[tokio::test]
    async fn clear_tracking_removes_records() {
        let (gate, store, _) = gate();
        let now = OffsetDateTime::now_utc();
        for _ in 0..2 {
            let rec = InFlightJobRecord::new(&JobToken::new(), "ocr", now, time::Duration::hours(1));
            store.put_job(&rec).await.unwrap();
        }
        let minute = MinuteKey::at(now);
        for _ in 0..5 {
            store
                .try_increment_rpm(&minute, 200, now.unix_timestamp() + 120)
                .await
                .unwrap();
        }

        assert!(clear_tracking(&GlobalOptions::default(), &gate, &mut Vec::new(), false).await.is_err());
        assert_eq!(store.rpm_window(&minute).await.unwrap().unwrap().request_count, 5);

        let mut out = Vec::new();
        clear_tracking(&json_opts(), &gate, &mut out, true).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["jobs"], 2);
        assert_eq!(v["windows"], 1);
        assert!(store.jobs().await.unwrap().is_empty());
        assert!(store.rpm_window(&minute).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn config_set_then_get() {
        let (gate, _, _) = gate();
        let opts = GlobalOptions::default();

        let mut out = Vec::new();
        config_set(&opts, &gate, &mut out, "max_rpm", "50").await.unwrap();
        assert_eq!(text(out), "max_rpm = 50\n");

        let mut out = Vec::new();
        config_get(&opts, &gate, &mut out, Some("max_rpm")).await.unwrap();
        assert_eq!(text(out), "max_rpm = 50\n");

        let mut out = Vec::new();
        config_get(&json_opts(), &gate, &mut out, None).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["max_rpm"], "50");
        assert_eq!(v["max_in_flight"], "150");
    }

    #[tokio::test]
    async fn config_set_rejects_bad_values() {
        let (gate, _, _) = gate();
        let opts = GlobalOptions::default();

        assert!(config_set(&opts, &gate, &mut Vec::new(), "max_rpm", "0").await.is_err());
        assert!(config_set(&opts, &gate, &mut Vec::new(), "no_such", "1").await.is_err());
        assert!(config_get(&opts, &gate, &mut Vec::new(), Some("no_such")).await.is_err());

        let mut out = Vec::new();
        config_get(&opts, &gate, &mut out, Some("max_rpm")).await.unwrap();
        assert_eq!(text(out), "max_rpm = 200\n");
    }

    #[tokio::test]
    async fn connect_needs_a_redis_url() {
        let err = Gate::connect(&GlobalOptions::default()).await.err().unwrap();
        assert!(err.to_string().contains("--redis-url"), "{err}");
    }

    #[tokio::test]
    async fn config_set_reaches_every_gate_on_the_same_source() {
        let store = Arc::new(MemorySlotStore::new());
        let shared: Arc<dyn SettingsSource> = Arc::new(StaticSettings::new(GateSettings::default()));
        let operator = Gate::new(store.clone(), shared.clone());
        let other = Gate::new(store, shared);

        config_set(&GlobalOptions::default(), &operator, &mut Vec::new(), "max_in_flight", "12")
            .await
            .unwrap();
        let mut out = Vec::new();
        config_get(&GlobalOptions::default(), &other, &mut out, Some("max_in_flight"))
            .await
            .unwrap();
        assert_eq!(text(out), "max_in_flight = 12
");
    }

    #[tokio::test]
    async fn backoff_set_and_clear() {
        let (gate, store, _) = gate();
        let opts = GlobalOptions::default();

        assert!(backoff_set(&opts, &gate, &mut Vec::new(), 0).await.is_err());
        backoff_set(&opts, &gate, &mut Vec::new(), 60).await.unwrap();
        let backoff = store.global_backoff().await.unwrap().unwrap();
        assert!(backoff.is_active(OffsetDateTime::now_utc()));

        let mut out = Vec::new();
        backoff_clear(&opts, &gate, &mut out).await.unwrap();
        assert_eq!(text(out), "global backoff cleared\n");
        assert!(store.global_backoff().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failures_list_and_drain() {
        let (gate, _, queue) = gate();
        for (n, kind) in [(1, FailureKind::Failed), (3, FailureKind::TimedOut)] {
            queue
                .record_failure(&FailureRecord {
                    job_key: JobKey::new("acme/a.pdf").unwrap(),
                    kind,
                    reason: "too many requests".into(),
                    retry_count: n,
                    max_retries_exceeded: n == 3,
                    recorded_at: OffsetDateTime::now_utc(),
                })
                .await
                .unwrap();
        }

        let mut out = Vec::new();
        failures(&GlobalOptions::default(), &gate, &mut out, false).await.unwrap();
        let out = text(out);
        assert_eq!(out.lines().count(), 2);
        assert!(out.contains("(dead-lettered)"));

        let mut out = Vec::new();
        failures(&json_opts(), &gate, &mut out, true).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 2);

        let mut out = Vec::new();
        failures(&GlobalOptions::default(), &gate, &mut out, false).await.unwrap();
        assert_eq!(text(out), "no failures recorded\n");
    }

    #[tokio::test]
    async fn failures_need_a_queue() {
        let store = Arc::new(MemorySlotStore::new());
        let gate = Gate::new(store, Arc::new(StaticSettings::default()));
        let err = failures(&GlobalOptions::default(), &gate, &mut Vec::new(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--queue-root"));
    }
}

//! `slotgated`: runs the reconciler and queue admission on fixed schedules and serves
//! metrics, usage and health over HTTP.
mod config;
mod cycles;
mod http;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::anyhow;
use clap::Parser;
use tracing::{error, info, warn};

use slotgate_core::{
    admission::QueueAdmission,
    metrics::MetricsHandle,
    queue::{FsJobQueue, MemoryJobQueue, QueueHandle},
    reconciler::Reconciler,
    runner::RunnerHandle,
    settings::{SettingsProvider, SettingsSource, StaticSettings, TomlFileSettings},
    store::{MemorySlotStore, StoreHandle},
    tracker::SlotTracker,
};
use slotgate_observe::{CycleEventLogger, init_logger};
use slotgate_prometheus::PrometheusMetrics;
use slotgate_redis::{RedisKeys, RedisSettings, RedisSlotStore};
use taskvisor::{SupervisorConfig, ControllerConfig, Subscribe, Supervisor};

use crate::config::AgentConfig;

#[derive(Parser, Debug)]
#[command(name = "slotgated")]
#[command(about = "Slot gate reconciler and admission daemon")]
#[command(version)]
struct Args {
    /// Daemon configuration file (TOML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Redis holding the shared slot store
    #[arg(long)]
    redis_url: Option<String>,

    /// Root directory of the job queue
    #[arg(long)]
    queue_root: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,
}

impl Args {
    /// Flags win over the file.
    fn apply(self, cfg: &mut AgentConfig) {
        if let Some(url) = self.redis_url {
            cfg.redis_url = Some(url);
        }
        if let Some(root) = self.queue_root {
            cfg.queue_root = Some(root);
        }
        if let Some(listen) = self.listen {
            cfg.listen = listen;
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // 1) config + logger
    let args = Args::parse();
    let mut cfg = AgentConfig::load(args.config.as_deref())?;
    args.apply(&mut cfg);
    init_logger(&cfg.logging)?;
    info!(listen = %cfg.listen, "slotgated starting");

    // 2) metrics + backends
    let metrics = PrometheusMetrics::new()?;
    let metrics_handle: MetricsHandle = Arc::new(metrics.clone());

    let (store, shared): (StoreHandle, Option<RedisSettings>) = match &cfg.redis_url {
        Some(url) => {
            let keys = cfg.key_prefix.clone().map(RedisKeys::new).unwrap_or_default();
            let redis = RedisSlotStore::connect(url, keys).await?;
            let shared = redis.settings_source();
            (Arc::new(redis) as StoreHandle, Some(shared))
        }
        None => {
            warn!("no redis url configured; slot limits cover this process only");
            (Arc::new(MemorySlotStore::new()) as StoreHandle, None)
        }
    };

    let source: Arc<dyn SettingsSource> = match (&cfg.settings_file, shared) {
        (Some(path), _) => Arc::new(TomlFileSettings::new(path)),
        (None, Some(shared)) => {
            // `[gate]` only seeds a store that has no settings yet.
            shared.seed(&cfg.gate).await?;
            Arc::new(shared)
        }
        (None, None) => Arc::new(StaticSettings::new(cfg.gate.clone())),
    };
    let settings = Arc::new(SettingsProvider::new(source));
    let initial = settings.current().await?;

    let (queue, runner): (QueueHandle, RunnerHandle) = match &cfg.queue_root {
        Some(root) => {
            let q = Arc::new(FsJobQueue::open(root).await?);
            (q.clone() as QueueHandle, q as RunnerHandle)
        }
        None => {
            warn!("no queue root configured; using an in-memory queue");
            let q = Arc::new(MemoryJobQueue::new());
            (q.clone() as QueueHandle, q as RunnerHandle)
        }
    };

    // 3) components
    let reconciler = Arc::new(
        Reconciler::new(store.clone(), runner.clone(), settings.clone())
            .with_metrics(metrics_handle.clone()),
    );
    let admission = Arc::new(
        QueueAdmission::new(store.clone(), queue, runner, settings.clone())
            .with_metrics(metrics_handle.clone()),
    );
    let tracker = SlotTracker::new(store, settings).with_metrics(metrics_handle);

    // 4) supervisor with periodic cycles
    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(CycleEventLogger)];
    let sup = Supervisor::builder(SupervisorConfig::default())
        .with_subscribers(subscribers)
        .with_controller(ControllerConfig::default())
        .build();
    let run = Arc::clone(&sup);
    tokio::spawn(async move {
        if let Err(e) = run.run(Vec::new()).await {
            error!(error = %e, "supervisor run loop exited");
        }
    });
    sup.wait_ready().await;

    sup.submit(cycles::periodic_spec(
        cycles::reconcile_task(reconciler.clone()),
        initial.reconcile_interval(),
    ))
    .await
    .map_err(|e| anyhow!("submitting reconcile cycle: {e}"))?;
    sup.submit(cycles::periodic_spec(
        cycles::admission_task(admission),
        initial.admission_interval(),
    ))
    .await
    .map_err(|e| anyhow!("submitting admission cycle: {e}"))?;
    info!(
        reconcile_every = ?initial.reconcile_interval(),
        admit_every = ?initial.admission_interval(),
        "periodic cycles submitted"
    );

    // 5) http until shutdown
    let state = http::AppState {
        tracker,
        reconciler,
        metrics,
    };
    http::serve(cfg.listen, state).await?;
    info!("slotgated stopped");
    Ok(())
}

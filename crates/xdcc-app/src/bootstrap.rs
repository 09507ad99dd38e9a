use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use xdcc_config::{AppConfig, PacketRequest, TrackerConfig, TransferConfig};
use xdcc_core::{Classifier, Network, Tracker, TrackerSettings};
use xdcc_events::{EventBus, StatisticsSink};
use xdcc_runtime::{SnapshotBackend, SnapshotStore};
use xdcc_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics};
use xdcc_transfer::{FileStore, SessionSettings};

use crate::error::{AppError, AppResult};
use crate::irc::{IrcSettings, spawn_irc};
use crate::notifications::spawn_notification_log;
use crate::orchestrator::{Orchestrator, OrchestratorDeps, OrchestratorHandle};

/// Prometheus text file written next to the snapshots.
pub const METRICS_FILE: &str = "metrics.prom";
const SERVER_EVENT_CAPACITY: usize = 256;
const IRC_QUIT_GRACE: Duration = Duration::from_secs(5);

/// Dependencies required to bootstrap the application.
pub(crate) struct BootstrapDependencies {
    config: AppConfig,
    events: EventBus,
    metrics: Metrics,
    snapshots: Arc<dyn SnapshotBackend>,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the binary entrypoint.
    pub(crate) async fn from_env() -> AppResult<Self> {
        let config = xdcc_config::load(|name| std::env::var(name).ok())
            .await
            .map_err(|err| AppError::config("config.load", err))?;
        Self::from_config(config)
    }

    pub(crate) fn from_config(config: AppConfig) -> AppResult<Self> {
        let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        let snapshots: Arc<dyn SnapshotBackend> = Arc::new(SnapshotStore::new(config.data_dir()));
        Ok(Self {
            config,
            events: EventBus::new(),
            metrics,
            snapshots,
        })
    }
}

/// Entry point for the application boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, logging or state restoration fails, or
/// if the final snapshot cannot be written.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env().await?;
    Box::pin(run_app_with(dependencies)).await
}

/// Boot sequence that relies entirely on injected dependencies.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    let BootstrapDependencies {
        config,
        events,
        metrics,
        snapshots,
    } = dependencies;

    xdcc_telemetry::init_logging(&LoggingConfig {
        level: &config.telemetry.level,
        format: LogFormat::from_setting(config.telemetry.log_format.as_deref()),
        build_sha: option_env!("XDCC_BUILD_SHA").unwrap_or("dev"),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new(config.network.host.clone());
    info!("xdcc-grab starting");

    tokio::fs::create_dir_all(config.data_dir())
        .await
        .map_err(|err| {
            AppError::io("data_dir.create", Some(config.data_dir().to_path_buf()), err)
        })?;
    let store = FileStore::new(
        config.temp_dir(),
        config.ready_dir(),
        config.transfer.rollback_bytes,
    );
    store
        .prepare()
        .await
        .map_err(|err| AppError::transfer("file_store.prepare", err))?;
    let network = restore_network(snapshots.as_ref(), &store, &config).await?;

    let statistics: Arc<dyn StatisticsSink> = Arc::new(metrics.clone());
    let classifier = Classifier::new().map_err(|err| AppError::core("classifier.new", err))?;
    let mut tracker = Tracker::new(
        network,
        classifier,
        tracker_settings(&config.tracker),
        Arc::new(store.clone()),
        Arc::clone(&statistics),
        events.clone(),
    );
    seed_requests(&mut tracker, &config.requests)?;

    let notifications = spawn_notification_log(&events);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (server_tx, server_rx) = mpsc::channel(SERVER_EVENT_CAPACITY);
    let irc = spawn_irc(IrcSettings::from(&config.network), server_tx, outbound_rx);
    let orchestrator = Orchestrator::new(
        OrchestratorDeps {
            tracker,
            store,
            snapshots,
            events,
            statistics,
            session_settings: session_settings(&config.transfer),
            snapshot_interval: config.storage.snapshot_interval(),
            rejoin_delay: config.tracker.rejoin_delay(),
        },
        outbound_tx,
    );

    let (handle, commands) = OrchestratorHandle::channel();
    let signals = spawn_signal_listener(handle.clone());
    let metrics_path = config.data_dir().join(METRICS_FILE);
    let exporter = spawn_metrics_export(
        metrics.clone(),
        metrics_path.clone(),
        config.storage.snapshot_interval(),
    );

    let result = orchestrator.run(server_rx, commands).await;
    drop(handle);
    signals.abort();
    exporter.abort();

    match tokio::time::timeout(IRC_QUIT_GRACE, irc).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "irc task join failed"),
        Err(_) => warn!("irc task did not stop in time"),
    }
    notifications.abort();
    if let Err(err) = export_metrics(&metrics, &metrics_path).await {
        warn!(error = %err, "final metrics export failed");
    }
    info!("xdcc-grab stopped");
    result
}

/// Session parameters from the transfer section.
pub(crate) fn session_settings(config: &TransferConfig) -> SessionSettings {
    SessionSettings {
        connect_timeout: config.connect_timeout(),
        read_timeout: config.read_timeout(),
        chunk_size: config.chunk_size,
        rollback_check_bytes: config.rollback_check_bytes,
        sample_interval: config.sample_interval(),
        stall_multiplier: config.stall_multiplier,
        watchdog_poll: config.watchdog_poll(),
    }
}

/// Tracker parameters from the tracker section.
pub(crate) fn tracker_settings(config: &TrackerConfig) -> TrackerSettings {
    TrackerSettings {
        version: config.version.clone(),
        custom_version: config.custom_version.clone(),
        command_wait: config.command_wait(),
        rejoin_delay: config.rejoin_delay(),
        diagnostics: config.diagnostics,
    }
}

/// Load the last snapshot into `store` and return its tree, or a fresh tree.
/// Configured channels are always present afterwards.
pub(crate) async fn restore_network(
    snapshots: &dyn SnapshotBackend,
    store: &FileStore,
    config: &AppConfig,
) -> AppResult<Network> {
    let restored = snapshots
        .load()
        .await
        .map_err(|err| AppError::snapshot("snapshot.load", err))?;
    let mut network = match restored {
        Some(snapshot) => {
            info!(files = snapshot.files.len(), "restored snapshot");
            store.restore(snapshot.files);
            snapshot.network
        }
        None => Network::default(),
    };
    network.name.clone_from(&config.network.host);
    network.reset_transient();
    for channel in &config.network.channels {
        network
            .ensure_channel(channel)
            .map_err(|err| AppError::core("network.ensure_channel", err))?;
    }
    Ok(network)
}

/// Register configured packets the tree does not know yet. Packets restored
/// from a snapshot keep their state, so a finished download is not fetched again.
pub(crate) fn seed_requests(tracker: &mut Tracker, requests: &[PacketRequest]) -> AppResult<()> {
    for request in requests {
        let known = tracker
            .network()
            .find_bot(&request.bot)
            .and_then(|bot| tracker.network().bot(bot))
            .and_then(|bot| bot.packet_id(request.packet))
            .is_some();
        if known {
            continue;
        }
        tracker
            .add_request(&request.channel, &request.bot, request.packet)
            .map_err(|err| AppError::core("tracker.add_request", err))?;
    }
    Ok(())
}

fn spawn_signal_listener(handle: OrchestratorHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received; shutting down");
                if let Err(err) = handle.shutdown().await {
                    debug!(error = %err, "orchestrator already stopped");
                }
            }
            Err(err) => warn!(error = %err, "installing the interrupt handler failed"),
        }
    })
}

fn spawn_metrics_export(metrics: Metrics, path: PathBuf, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = export_metrics(&metrics, &path).await {
                warn!(error = %err, path = %path.display(), "metrics export failed");
            }
        }
    })
}

/// Write the Prometheus text exposition to `path` through a temporary file.
pub(crate) async fn export_metrics(metrics: &Metrics, path: &Path) -> AppResult<()> {
    let rendered = metrics
        .render()
        .map_err(|err| AppError::telemetry("metrics.render", err))?;
    let staged = path.with_extension("prom.tmp");
    tokio::fs::write(&staged, rendered)
        .await
        .map_err(|err| AppError::io("metrics.write", Some(staged.clone()), err))?;
    tokio::fs::rename(&staged, path)
        .await
        .map_err(|err| AppError::io("metrics.rename", Some(path.to_path_buf()), err))
}

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tempfile::TempDir;
use tokio::sync::mpsc;
use xdcc_core::{FileKey, Network, PacketId, ResumeCatalog, ResumeDecision, TransferOutcome, TransferRequest};
use xdcc_events::{EventBus, Statistic};
use xdcc_test_support::fixtures::{PACKET_SIZE, payload};
use xdcc_test_support::peer::{PeerScript, ScriptedPeer};
use xdcc_test_support::stats::MemoryStatistics;
use xdcc_transfer::{
    FileStore, SessionContext, SessionReport, SessionSettings, SessionUpdate, spawn_session,
};

struct Harness {
    dir: TempDir,
    store: FileStore,
    statistics: Arc<MemoryStatistics>,
    context: SessionContext,
    updates: mpsc::Receiver<SessionUpdate>,
    packet: PacketId,
}

fn harness(rollback_bytes: u64, settings: SessionSettings) -> Result<Harness> {
    let dir = tempfile::tempdir()?;
    let store = FileStore::new(dir.path().join("temp"), dir.path().join("ready"), rollback_bytes);
    let statistics = Arc::new(MemoryStatistics::default());
    let (sender, updates) = mpsc::channel(16);
    let context = SessionContext {
        store: store.clone(),
        events: EventBus::new(),
        statistics: statistics.clone(),
        updates: sender,
        settings,
    };
    let mut network = Network::new("irc.example.net");
    let channel = network.ensure_channel("#xdcc")?;
    let (bot, _) = network.ensure_bot(channel, "[XDCC]Bot")?;
    let (packet, _) = network.ensure_packet(bot, 4)?;
    Ok(Harness {
        dir,
        store,
        statistics,
        context,
        updates,
        packet,
    })
}

fn quick_settings() -> SessionSettings {
    SessionSettings {
        connect_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_secs(5),
        ..SessionSettings::default()
    }
}

fn request(harness: &Harness, port: u16, offset: u64, file: FileKey) -> TransferRequest {
    TransferRequest {
        packet: harness.packet,
        bot: "[XDCC]Bot".to_string(),
        peer: Ipv4Addr::LOCALHOST,
        port,
        offset,
        file,
    }
}

async fn run(harness: &Harness, request: TransferRequest) -> Result<SessionReport> {
    let handle = spawn_session(harness.context.clone(), request);
    handle.join().await.context("session task")
}

async fn seed(store: &FileStore, file: &FileKey, data: &[u8]) -> Result<()> {
    let mut lease = store.resolve(file)?;
    lease.begin_at(0).await?;
    lease.append(data).await?;
    Ok(())
}

#[tokio::test]
async fn fifty_megabytes_complete_into_ready_directory() -> Result<()> {
    let mut harness = harness(4_096, quick_settings())?;
    let data = payload(usize::try_from(PACKET_SIZE)?);
    let peer = ScriptedPeer::serve(data.clone(), PeerScript::default()).await?;
    let file = FileKey::new("My.File.mkv", PACKET_SIZE);

    let report = run(&harness, request(&harness, peer.port(), 0, file.clone())).await?;
    assert_eq!(report.outcome, TransferOutcome::Completed);
    assert_eq!(report.received, PACKET_SIZE);

    let ready = harness.dir.path().join("ready").join("My.File.mkv");
    let stored = tokio::fs::read(&ready).await?;
    assert!(stored == data, "stored bytes differ from the payload");
    assert!(harness.store.record(&file).is_none());

    let Some(SessionUpdate::Connected { packet, .. }) = harness.updates.recv().await else {
        bail!("expected a connected update first");
    };
    assert_eq!(packet, harness.packet);
    assert!(matches!(
        harness.updates.recv().await,
        Some(SessionUpdate::Finished(SessionReport {
            outcome: TransferOutcome::Completed,
            ..
        }))
    ));
    assert_eq!(harness.statistics.get(Statistic::PacketsCompleted), 1);
    assert_eq!(harness.statistics.get(Statistic::BytesReceived), PACKET_SIZE);
    assert_eq!(harness.statistics.get(Statistic::BotConnectsOk), 1);
    Ok(())
}

#[tokio::test]
async fn silent_peer_counts_as_connect_failure() -> Result<()> {
    let harness = harness(4_096, quick_settings())?;
    let peer = ScriptedPeer::serve(Vec::new(), PeerScript::default()).await?;
    let file = FileKey::new("empty.bin", 1_024);

    let report = run(&harness, request(&harness, peer.port(), 0, file)).await?;
    assert_eq!(report.outcome, TransferOutcome::ConnectFailed);
    assert_eq!(report.received, 0);
    assert_eq!(harness.statistics.get(Statistic::BotConnectsFailed), 1);
    Ok(())
}

#[tokio::test]
async fn refused_connection_fails_without_connecting() -> Result<()> {
    let mut harness = harness(4_096, quick_settings())?;
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let report = run(&harness, request(&harness, port, 0, FileKey::new("a.bin", 10))).await?;
    assert_eq!(report.outcome, TransferOutcome::ConnectFailed);
    assert!(matches!(
        harness.updates.recv().await,
        Some(SessionUpdate::Finished(_))
    ));
    assert_eq!(harness.statistics.get(Statistic::BotConnectsOk), 0);
    Ok(())
}

#[tokio::test]
async fn one_byte_too_many_discards_storage() -> Result<()> {
    let harness = harness(4_096, quick_settings())?;
    let peer = ScriptedPeer::serve(payload(1_048_577), PeerScript::default()).await?;
    let file = FileKey::new("over.bin", 1_048_576);

    let report = run(&harness, request(&harness, peer.port(), 0, file.clone())).await?;
    assert_eq!(report.outcome, TransferOutcome::SizeMismatch);
    assert_eq!(report.received, 1_048_577);
    assert!(harness.store.record(&file).is_none());
    assert!(!harness.dir.path().join("temp").join("over.bin.1048576.part").exists());
    assert_eq!(harness.statistics.get(Statistic::PacketsBroken), 1);
    Ok(())
}

#[tokio::test]
async fn verified_resume_continues_stored_file() -> Result<()> {
    let settings = SessionSettings {
        rollback_check_bytes: 50,
        ..quick_settings()
    };
    let harness = harness(100, settings)?;
    let full = payload(2_000);
    let file = FileKey::new("resume.bin", 2_000);
    seed(&harness.store, &file, &full[..1_000]).await?;

    let ResumeDecision::Resume(offset) = harness.store.resume_decision(&file) else {
        bail!("expected a resume decision");
    };
    assert_eq!(offset, 900);
    let peer = ScriptedPeer::serve(full[900..].to_vec(), PeerScript::default()).await?;

    let report = run(&harness, request(&harness, peer.port(), offset, file)).await?;
    assert_eq!(report.outcome, TransferOutcome::Completed);
    assert_eq!(report.received, 1_100);
    let stored = tokio::fs::read(harness.dir.path().join("ready").join("resume.bin")).await?;
    assert!(stored == full, "resumed file differs from the payload");
    Ok(())
}

#[tokio::test]
async fn mismatching_resume_leaves_storage_untouched() -> Result<()> {
    let settings = SessionSettings {
        rollback_check_bytes: 50,
        ..quick_settings()
    };
    let harness = harness(100, settings)?;
    let full = payload(2_000);
    let file = FileKey::new("resume.bin", 2_000);
    seed(&harness.store, &file, &full[..1_000]).await?;
    let peer = ScriptedPeer::serve(vec![0xFF; 1_100], PeerScript::default()).await?;

    let report = run(&harness, request(&harness, peer.port(), 900, file.clone())).await?;
    assert_eq!(report.outcome, TransferOutcome::RollbackMismatch);
    assert_eq!(
        harness.store.record(&file).map(|record| record.current_size),
        Some(1_000)
    );
    let partial = tokio::fs::read(harness.dir.path().join("temp").join("resume.bin.2000.part")).await?;
    assert!(partial == full[..1_000], "stored bytes were modified");
    assert_eq!(harness.statistics.get(Statistic::FileMismatches), 1);
    Ok(())
}

#[tokio::test]
async fn stalled_peer_is_stopped_by_watchdog() -> Result<()> {
    let settings = SessionSettings {
        sample_interval: Duration::from_millis(100),
        stall_multiplier: 2,
        watchdog_poll: Duration::from_millis(50),
        ..quick_settings()
    };
    let harness = harness(4_096, settings)?;
    let script = PeerScript {
        stall_after: Some(1_000),
        stall_for: Duration::from_secs(10),
        ..PeerScript::default()
    };
    let peer = ScriptedPeer::serve(payload(10_000), script).await?;
    let file = FileKey::new("stall.bin", 10_000);

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        run(&harness, request(&harness, peer.port(), 0, file.clone())),
    )
    .await??;
    assert_eq!(report.outcome, TransferOutcome::Incomplete);
    assert_eq!(report.received, 1_000);
    assert_eq!(
        harness.store.record(&file).map(|record| record.current_size),
        Some(1_000)
    );
    Ok(())
}

#[tokio::test]
async fn disabling_mid_stream_removes_partial_data() -> Result<()> {
    let mut harness = harness(4_096, quick_settings())?;
    let script = PeerScript {
        stall_after: Some(1_000),
        stall_for: Duration::from_secs(10),
        ..PeerScript::default()
    };
    let peer = ScriptedPeer::serve(payload(10_000), script).await?;
    let file = FileKey::new("cancel.bin", 10_000);

    let handle = spawn_session(
        harness.context.clone(),
        request(&harness, peer.port(), 0, file.clone()),
    );
    assert!(matches!(
        harness.updates.recv().await,
        Some(SessionUpdate::Connected { .. })
    ));
    assert!(handle.cancel(true));
    let report = handle.join().await.context("session task")?;
    assert_eq!(report.outcome, TransferOutcome::Disabled);
    assert!(harness.store.record(&file).is_none());
    assert!(!harness.dir.path().join("temp").join("cancel.bin.10000.part").exists());
    Ok(())
}

#[tokio::test]
async fn accept_beyond_stored_data_is_not_trusted() -> Result<()> {
    let settings = SessionSettings {
        rollback_check_bytes: 50,
        ..quick_settings()
    };
    let harness = harness(100, settings)?;
    let full = payload(2_000);
    let file = FileKey::new("gap.bin", 2_000);
    seed(&harness.store, &file, &full[..1_000]).await?;
    let peer = ScriptedPeer::serve(full[1_500..].to_vec(), PeerScript::default()).await?;

    let report = run(&harness, request(&harness, peer.port(), 1_500, file.clone())).await?;
    assert_eq!(report.outcome, TransferOutcome::RollbackMismatch);
    assert!(!harness.dir.path().join("ready").join("gap.bin").exists());
    let partial = tokio::fs::read(harness.dir.path().join("temp").join("gap.bin.2000.part")).await?;
    assert!(partial == full[..1_000], "stored bytes were modified");
    assert_eq!(
        harness.store.record(&file).map(|record| record.current_size),
        Some(1_000)
    );
    Ok(())
}

#[tokio::test]
async fn disabling_before_connect_stops_the_session() -> Result<()> {
    let mut harness = harness(4_096, quick_settings())?;
    let peer = ScriptedPeer::serve(payload(10_000), PeerScript::default()).await?;
    let file = FileKey::new("early.bin", 10_000);

    let handle = spawn_session(
        harness.context.clone(),
        request(&harness, peer.port(), 0, file.clone()),
    );
    assert!(handle.cancel(true));
    let report = handle.join().await.context("session task")?;
    assert_eq!(report.outcome, TransferOutcome::Disabled);
    assert_eq!(report.received, 0);
    assert!(harness.store.record(&file).is_none());
    assert!(matches!(
        harness.updates.recv().await,
        Some(SessionUpdate::Finished(_))
    ));
    assert_eq!(harness.statistics.get(Statistic::BotConnectsOk), 0);
    Ok(())
}

#[tokio::test]
async fn aborting_before_connect_keeps_packet_resumable() -> Result<()> {
    let harness = harness(4_096, quick_settings())?;
    let peer = ScriptedPeer::serve(payload(10_000), PeerScript::default()).await?;
    let file = FileKey::new("later.bin", 10_000);

    let handle = spawn_session(
        harness.context.clone(),
        request(&harness, peer.port(), 0, file.clone()),
    );
    assert!(handle.cancel(false));
    let report = handle.join().await.context("session task")?;
    assert_eq!(report.outcome, TransferOutcome::Incomplete);
    assert_eq!(harness.statistics.get(Statistic::BotConnectsFailed), 0);
    assert!(harness.store.record(&file).is_some());
    Ok(())
}

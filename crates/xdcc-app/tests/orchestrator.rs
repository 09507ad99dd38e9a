use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use xdcc_app::{AppResult, Orchestrator, OrchestratorDeps, OrchestratorHandle, ServerEvent};
use xdcc_core::{
    BotState, Classifier, IrcMessage, Network, OutboundLine, Packet, PacketId, Tracker,
    TrackerSettings,
};
use xdcc_events::{EventBus, Statistic};
use xdcc_runtime::{SnapshotBackend, SnapshotStore};
use xdcc_test_support::fixtures::{BOT, CHANNEL, dcc_send, payload};
use xdcc_test_support::peer::{PeerScript, ScriptedPeer};
use xdcc_test_support::stats::MemoryStatistics;
use xdcc_transfer::{FileStore, SessionSettings};

const NICK: &str = "grabber";
const WAIT: Duration = Duration::from_secs(10);

struct Running {
    dir: TempDir,
    handle: OrchestratorHandle,
    server: mpsc::Sender<ServerEvent>,
    outbound: mpsc::UnboundedReceiver<OutboundLine>,
    statistics: Arc<MemoryStatistics>,
    task: JoinHandle<AppResult<()>>,
}

impl Running {
    async fn start(rejoin_delay: Duration) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::new(dir.path().join("temp"), dir.path().join("ready"), 0);
        store.prepare().await?;
        let statistics = Arc::new(MemoryStatistics::default());
        let events = EventBus::new();
        let mut network = Network::new("irc.example.net");
        network.ensure_channel(CHANNEL)?;
        let tracker = Tracker::new(
            network,
            Classifier::new()?,
            TrackerSettings::default(),
            Arc::new(store.clone()),
            statistics.clone(),
            events.clone(),
        );
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(
            OrchestratorDeps {
                tracker,
                store,
                snapshots: Arc::new(SnapshotStore::new(dir.path().join("state"))),
                events,
                statistics: statistics.clone(),
                session_settings: SessionSettings {
                    connect_timeout: Duration::from_secs(5),
                    read_timeout: Duration::from_secs(5),
                    ..SessionSettings::default()
                },
                snapshot_interval: Duration::from_secs(60),
                rejoin_delay,
            },
            outbound_tx,
        );
        let (handle, commands) = OrchestratorHandle::channel();
        let (server, server_rx) = mpsc::channel(16);
        let task = tokio::spawn(orchestrator.run(server_rx, commands));
        Ok(Self {
            dir,
            handle,
            server,
            outbound,
            statistics,
            task,
        })
    }

    async fn line(&self, raw: &str) -> Result<()> {
        let message = IrcMessage::parse(raw).context("frame line")?;
        self.server.send(ServerEvent::Line(message)).await?;
        Ok(())
    }

    async fn next_sent(&mut self) -> Result<String> {
        let line = tokio::time::timeout(WAIT, self.outbound.recv())
            .await?
            .context("outbound closed")?;
        Ok(line.into_string())
    }

    /// Register, join the channel and request packet 4.
    async fn joined_with_request(&mut self) -> Result<PacketId> {
        let packet = self.handle.request(CHANNEL, BOT, 4).await?;
        self.server
            .send(ServerEvent::Registered {
                nick: NICK.to_string(),
            })
            .await?;
        assert_eq!(self.next_sent().await?, format!("JOIN {CHANNEL}"));
        self.line(&format!(":{NICK}!u@host JOIN {CHANNEL}")).await?;
        assert_eq!(self.next_sent().await?, format!("PRIVMSG {BOT} :XDCC SEND #4"));
        Ok(packet)
    }

    /// Poll the tree until `packet` satisfies `done`.
    async fn wait_for_packet(
        &self,
        packet: PacketId,
        done: impl Fn(&Packet) -> bool,
    ) -> Result<Network> {
        tokio::time::timeout(WAIT, async {
            loop {
                let network = self.handle.network().await?;
                if done(network.packet(packet).context("packet")?) {
                    return Ok::<_, anyhow::Error>(network);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await?
    }

    async fn stop(self) -> Result<(TempDir, Vec<String>)> {
        let Self {
            dir,
            handle,
            mut outbound,
            task,
            ..
        } = self;
        handle.shutdown().await?;
        task.await??;
        let mut sent = Vec::new();
        while let Ok(line) = outbound.try_recv() {
            sent.push(line.into_string());
        }
        Ok((dir, sent))
    }
}

#[tokio::test]
async fn offer_is_downloaded_and_packet_retired() -> Result<()> {
    let mut running = Running::start(Duration::from_secs(600)).await?;
    let packet = running.joined_with_request().await?;

    let data = payload(200_000);
    let peer = ScriptedPeer::serve(data.clone(), PeerScript::default()).await?;
    let offer = dcc_send("My.File.mkv", peer.port(), 200_000);
    running.line(&format!(":{BOT}!b@host PRIVMSG {NICK} :{offer}")).await?;

    running
        .wait_for_packet(packet, |entry| !entry.enabled && !entry.connected)
        .await?;
    assert_eq!(peer.finish().await?, 200_000);

    let stored = std::fs::read(running.dir.path().join("ready/My.File.mkv"))?;
    assert_eq!(stored, data);
    assert_eq!(running.statistics.get(Statistic::PacketsCompleted), 1);
    assert_eq!(running.statistics.get(Statistic::PacketsRequested), 1);
    assert_eq!(running.statistics.active_sessions(), 0);

    let network = running.handle.network().await?;
    let bot = network.find_bot(BOT).and_then(|bot| network.bot(bot)).context("bot")?;
    assert_eq!(bot.state(), BotState::Idle);

    let (dir, sent) = running.stop().await?;
    assert_eq!(sent.last().map(String::as_str), Some("QUIT :shutting down"));
    let snapshot = SnapshotStore::new(dir.path().join("state"))
        .load()
        .await?
        .context("snapshot written on shutdown")?;
    assert!(!snapshot.network.packet(packet).context("packet")?.enabled);
    Ok(())
}

#[tokio::test]
async fn disabling_a_waiting_request_leaves_the_queue() -> Result<()> {
    let mut running = Running::start(Duration::from_secs(600)).await?;
    let packet = running.joined_with_request().await?;

    running.handle.disable(packet).await?;
    assert_eq!(running.next_sent().await?, format!("PRIVMSG {BOT} :XDCC REMOVE"));

    let network = running.handle.network().await?;
    assert!(!network.packet(packet).context("packet")?.enabled);
    running.stop().await?;
    Ok(())
}

#[tokio::test]
async fn kick_schedules_a_rejoin() -> Result<()> {
    let mut running = Running::start(Duration::from_millis(50)).await?;
    running.joined_with_request().await?;

    running
        .line(&format!(":op!u@host KICK {CHANNEL} {NICK} :bye"))
        .await?;
    assert_eq!(running.next_sent().await?, format!("JOIN {CHANNEL}"));

    let network = running.handle.network().await?;
    let channel = network
        .find_channel(CHANNEL)
        .and_then(|channel| network.channel(channel))
        .context("channel")?;
    assert!(!channel.connected);
    running.stop().await?;
    Ok(())
}

#[tokio::test]
async fn search_and_version_queries_are_answered() -> Result<()> {
    let mut running = Running::start(Duration::from_secs(600)).await?;
    running.joined_with_request().await?;

    running.handle.search(BOT, "mkv").await?;
    assert_eq!(running.next_sent().await?, format!("PRIVMSG {BOT} :XDCC SEARCH mkv"));

    running
        .line(&format!(":someone!u@host PRIVMSG {NICK} :\u{1}VERSION\u{1}"))
        .await?;
    let reply = running.next_sent().await?;
    assert!(reply.starts_with("NOTICE someone :\u{1}VERSION xdcc-grab "), "{reply}");
    running.stop().await?;
    Ok(())
}

fn stalled_peer_script() -> PeerScript {
    PeerScript {
        stall_after: Some(0),
        stall_for: Duration::from_secs(30),
        ..PeerScript::default()
    }
}

#[tokio::test]
async fn disabling_right_after_the_offer_cancels_the_download() -> Result<()> {
    let mut running = Running::start(Duration::from_secs(600)).await?;
    let packet = running.joined_with_request().await?;

    let peer = ScriptedPeer::serve(payload(200_000), stalled_peer_script()).await?;
    let offer = dcc_send("My.File.mkv", peer.port(), 200_000);
    running.line(&format!(":{BOT}!b@host PRIVMSG {NICK} :{offer}")).await?;
    running
        .wait_for_packet(packet, |entry| entry.transfer_pending || entry.connected)
        .await?;

    running.handle.disable(packet).await?;
    tokio::time::timeout(WAIT, async {
        while running.statistics.active_sessions() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;
    let network = running.handle.network().await?;
    let entry = network.packet(packet).context("packet")?;
    assert!(!entry.enabled);
    assert!(!entry.connected);
    let bot = network.find_bot(BOT).and_then(|bot| network.bot(bot)).context("bot")?;
    assert_ne!(bot.state(), BotState::Active);
    assert_eq!(running.statistics.active_sessions(), 0);
    assert_eq!(running.statistics.get(Statistic::PacketsCompleted), 0);
    assert!(!running.dir.path().join("ready/My.File.mkv").exists());
    assert!(!running.dir.path().join("temp/My.File.mkv.200000.part").exists());
    running.stop().await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_keeps_connecting_packets_wanted() -> Result<()> {
    let mut running = Running::start(Duration::from_secs(600)).await?;
    let packet = running.joined_with_request().await?;

    let peer = ScriptedPeer::serve(payload(200_000), stalled_peer_script()).await?;
    let offer = dcc_send("My.File.mkv", peer.port(), 200_000);
    running.line(&format!(":{BOT}!b@host PRIVMSG {NICK} :{offer}")).await?;
    running.wait_for_packet(packet, |entry| entry.connected).await?;

    let statistics = running.statistics.clone();
    let (dir, _) = running.stop().await?;
    let snapshot = SnapshotStore::new(dir.path().join("state"))
        .load()
        .await?
        .context("snapshot written on shutdown")?;
    let entry = snapshot.network.packet(packet).context("packet")?;
    assert!(entry.enabled);
    assert!(!entry.connected);
    let bot = snapshot
        .network
        .find_bot(BOT)
        .and_then(|bot| snapshot.network.bot(bot))
        .context("bot")?;
    assert!(!bot.has_network_problems);
    assert_eq!(statistics.get(Statistic::BotConnectsFailed), 0);
    Ok(())
}

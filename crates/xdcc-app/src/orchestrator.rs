//! Network orchestrator: one task that owns the tracker and turns its intents
//! into I/O.
//!
//! # Design
//! - Server lines, session updates, delayed retries and administrative commands
//!   are handled strictly one at a time inside a single `select!` loop, so the
//!   entity tree needs no locking.
//! - Download sessions run as their own tasks and report back over an mpsc
//!   channel; the orchestrator only keeps their handles for cancellation.
//! - Snapshots are written on an interval when a state-changing event was
//!   published since the last save, and once more on shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use xdcc_core::{
    BotId, ChatLine, CoreError, Intent, IrcMessage, Network, OutboundLine, PacketId, Tracker,
    TransferRequest,
};
use xdcc_events::{EventBus, EventId, StatisticsSink};
use xdcc_runtime::{Snapshot, SnapshotBackend};
use xdcc_transfer::{
    FileStore, SessionContext, SessionHandle, SessionSettings, SessionUpdate, spawn_session,
};

use crate::error::{AppError, AppResult};
use crate::irc::ServerEvent;

/// How long shutdown waits for running sessions to stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const SESSION_UPDATE_CAPACITY: usize = 64;
const COMMAND_CAPACITY: usize = 32;

/// Administrative requests accepted by the orchestrator.
#[derive(Debug)]
pub enum Command {
    /// Want a packet; replies with its id.
    Request {
        channel: String,
        bot: String,
        packet: u32,
        reply: oneshot::Sender<Result<PacketId, CoreError>>,
    },
    /// Re-enable a packet.
    Enable(PacketId),
    /// Disable a packet, cancelling its transfer or queue place.
    Disable(PacketId),
    /// Ask a bot to search its packet list.
    Search { bot: String, term: String },
    /// Copy of the current entity tree.
    Inspect(oneshot::Sender<Network>),
    /// Stop sessions, save and leave.
    Shutdown,
}

/// Sending side of the orchestrator command channel.
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
}

impl OrchestratorHandle {
    /// Create a handle and the receiver the orchestrator consumes.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<Command>) {
        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        (Self { commands }, receiver)
    }

    /// Register a wanted packet and ask for it when its bot is idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the orchestrator stopped or the names are invalid.
    pub async fn request(&self, channel: &str, bot: &str, packet: u32) -> AppResult<PacketId> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Request {
            channel: channel.to_string(),
            bot: bot.to_string(),
            packet,
            reply,
        })
        .await?;
        response
            .await
            .map_err(|_| closed())?
            .map_err(|err| AppError::core("orchestrator.request", err))
    }

    /// Enable a packet.
    ///
    /// # Errors
    ///
    /// Returns an error if the orchestrator stopped.
    pub async fn enable(&self, packet: PacketId) -> AppResult<()> {
        self.send(Command::Enable(packet)).await
    }

    /// Disable a packet.
    ///
    /// # Errors
    ///
    /// Returns an error if the orchestrator stopped.
    pub async fn disable(&self, packet: PacketId) -> AppResult<()> {
        self.send(Command::Disable(packet)).await
    }

    /// Send an `XDCC SEARCH` to a bot.
    ///
    /// # Errors
    ///
    /// Returns an error if the orchestrator stopped.
    pub async fn search(&self, bot: &str, term: &str) -> AppResult<()> {
        self.send(Command::Search {
            bot: bot.to_string(),
            term: term.to_string(),
        })
        .await
    }

    /// Copy of the current entity tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the orchestrator stopped.
    pub async fn network(&self) -> AppResult<Network> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Inspect(reply)).await?;
        response.await.map_err(|_| closed())
    }

    /// Ask the orchestrator to stop.
    ///
    /// # Errors
    ///
    /// Returns an error if the orchestrator already stopped.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> AppResult<()> {
        self.commands.send(command).await.map_err(|_| closed())
    }
}

const fn closed() -> AppError {
    AppError::ChannelClosed {
        name: "orchestrator",
    }
}

/// Collaborators of the orchestrator.
pub struct OrchestratorDeps {
    pub tracker: Tracker,
    pub store: FileStore,
    pub snapshots: Arc<dyn SnapshotBackend>,
    pub events: EventBus,
    pub statistics: Arc<dyn StatisticsSink>,
    pub session_settings: SessionSettings,
    pub snapshot_interval: Duration,
    pub rejoin_delay: Duration,
}

#[derive(Debug)]
enum Timer {
    Request(BotId),
    Rejoin(String),
}

struct Inbox {
    updates: mpsc::Receiver<SessionUpdate>,
    timers: mpsc::Receiver<Timer>,
}

/// Owner of one network's tracker and download sessions.
pub struct Orchestrator {
    state: NetworkState,
    inbox: Inbox,
}

struct NetworkState {
    tracker: Tracker,
    store: FileStore,
    snapshots: Arc<dyn SnapshotBackend>,
    events: EventBus,
    statistics: Arc<dyn StatisticsSink>,
    context: SessionContext,
    sessions: HashMap<PacketId, SessionHandle>,
    outbound: mpsc::UnboundedSender<OutboundLine>,
    timers: mpsc::Sender<Timer>,
    own_nick: Option<String>,
    snapshot_interval: Duration,
    rejoin_delay: Duration,
    saved_at: Option<EventId>,
}

impl Orchestrator {
    /// Wire the orchestrator; lines for the server go to `outbound`.
    #[must_use]
    pub fn new(deps: OrchestratorDeps, outbound: mpsc::UnboundedSender<OutboundLine>) -> Self {
        let (update_tx, updates) = mpsc::channel(SESSION_UPDATE_CAPACITY);
        let (timer_tx, timers) = mpsc::channel(SESSION_UPDATE_CAPACITY);
        let context = SessionContext {
            store: deps.store.clone(),
            events: deps.events.clone(),
            statistics: Arc::clone(&deps.statistics),
            updates: update_tx,
            settings: deps.session_settings,
        };
        let saved_at = deps.events.last_change_id();
        Self {
            state: NetworkState {
                tracker: deps.tracker,
                store: deps.store,
                snapshots: deps.snapshots,
                events: deps.events,
                statistics: deps.statistics,
                context,
                sessions: HashMap::new(),
                outbound,
                timers: timer_tx,
                own_nick: None,
                snapshot_interval: deps.snapshot_interval.max(Duration::from_secs(1)),
                rejoin_delay: deps.rejoin_delay,
                saved_at,
            },
            inbox: Inbox { updates, timers },
        }
    }

    /// Run until a shutdown command arrives, the command channel closes or the
    /// server connection task stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the final snapshot cannot be written.
    pub async fn run(
        self,
        mut server: mpsc::Receiver<ServerEvent>,
        mut commands: mpsc::Receiver<Command>,
    ) -> AppResult<()> {
        let Self {
            mut state,
            mut inbox,
        } = self;
        let mut snapshot_tick = tokio::time::interval(state.snapshot_interval);
        snapshot_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        snapshot_tick.tick().await;

        loop {
            tokio::select! {
                event = server.recv() => match event {
                    Some(event) => state.on_server_event(event),
                    None => {
                        warn!("irc connection task stopped");
                        break;
                    }
                },
                Some(update) = inbox.updates.recv() => state.on_session_update(update).await,
                Some(timer) = inbox.timers.recv() => state.on_timer(timer),
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => state.on_command(command),
                },
                _ = snapshot_tick.tick() => state.save_if_changed().await,
            }
        }

        state.shutdown(&mut inbox).await
    }
}

impl NetworkState {
    fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Registered { nick } => {
                self.own_nick = Some(nick);
                let intents = self.tracker.on_connected();
                self.dispatch(intents);
            }
            ServerEvent::Line(message) => self.on_line(&message),
            ServerEvent::Disconnected => self.tracker.on_disconnected(),
        }
    }

    fn on_line(&mut self, message: &IrcMessage) {
        match message.command.as_str() {
            "PRIVMSG" | "NOTICE" => {
                if let Some(line) = ChatLine::from_message(message) {
                    let intents = self.tracker.handle_chat(&line);
                    self.dispatch(intents);
                }
            }
            "JOIN" if self.is_self(message.nick()) => {
                if let Some(channel) = message.params.first() {
                    let intents = self.tracker.channel_joined(channel);
                    self.dispatch(intents);
                }
            }
            "PART" if self.is_self(message.nick()) => {
                if let Some(channel) = message.params.first() {
                    self.tracker.channel_parted(channel);
                }
            }
            "KICK" => {
                if let [channel, target, ..] = message.params.as_slice()
                    && self.is_self(Some(target.as_str()))
                {
                    warn!(channel = %channel, "kicked from channel");
                    self.tracker.channel_parted(channel);
                    self.schedule(Timer::Rejoin(channel.clone()), self.rejoin_delay);
                }
            }
            "NICK" if self.is_self(message.nick()) => {
                self.own_nick = message.params.first().cloned();
            }
            _ => {}
        }
    }

    fn is_self(&self, nick: Option<&str>) -> bool {
        match (nick, self.own_nick.as_deref()) {
            (Some(nick), Some(own)) => nick.eq_ignore_ascii_case(own),
            _ => false,
        }
    }

    async fn on_session_update(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::Connected { packet, file, .. } => {
                self.tracker.session_connected(packet, file);
            }
            SessionUpdate::Finished(report) => {
                let owned = self
                    .sessions
                    .get(&report.packet)
                    .is_some_and(|handle| handle.id() == report.session_id);
                if owned && let Some(handle) = self.sessions.remove(&report.packet) {
                    handle.join().await;
                }
                self.statistics.set_active_sessions(self.sessions.len());
                let intents = self.tracker.session_finished(report.packet, report.outcome);
                self.dispatch(intents);
            }
        }
    }

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Request(bot) => {
                let intents = self.tracker.request_next(bot);
                self.dispatch(intents);
            }
            Timer::Rejoin(channel) => {
                info!(channel = %channel, "rejoining channel");
                self.send(OutboundLine::join(&channel));
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Request {
                channel,
                bot,
                packet,
                reply,
            } => {
                let result = self.tracker.add_request(&channel, &bot, packet);
                if let Ok(id) = &result
                    && let Some(owner) = self.tracker.network().packet(*id).map(|entry| entry.bot())
                {
                    let intents = self.tracker.request_next(owner);
                    self.dispatch(intents);
                }
                let _ = reply.send(result);
            }
            Command::Enable(packet) => match self.tracker.enable_packet(packet) {
                Ok(intents) => self.dispatch(intents),
                Err(err) => warn!(error = %err, "enable packet failed"),
            },
            Command::Disable(packet) => match self.tracker.disable_packet(packet) {
                Ok(intents) => self.dispatch(intents),
                Err(err) => warn!(error = %err, "disable packet failed"),
            },
            Command::Search { bot, term } => {
                let Some(id) = self.tracker.network().find_bot(&bot) else {
                    warn!(bot = %bot, "search for unknown bot");
                    return;
                };
                match self.tracker.search(id, &term) {
                    Ok(intent) => self.dispatch(vec![intent]),
                    Err(err) => warn!(error = %err, bot = %bot, "search failed"),
                }
            }
            Command::Inspect(reply) => {
                let _ = reply.send(self.tracker.network().clone());
            }
            Command::Shutdown => {}
        }
    }

    fn dispatch(&mut self, intents: Vec<Intent>) {
        for intent in intents {
            match intent {
                Intent::Send(line) => self.send(line),
                Intent::ScheduleRequest { bot, delay } => self.schedule(Timer::Request(bot), delay),
                Intent::StartTransfer(request) => self.start_transfer(request),
                Intent::CancelTransfer {
                    packet,
                    remove_file,
                } => {
                    if let Some(handle) = self.sessions.get(&packet) {
                        handle.cancel(remove_file);
                    }
                }
                Intent::Rejoin { channel, delay } => self.schedule(Timer::Rejoin(channel), delay),
            }
        }
    }

    fn send(&self, line: OutboundLine) {
        if self.outbound.send(line).is_err() {
            debug!("irc connection task stopped; dropping line");
        }
    }

    fn schedule(&self, timer: Timer, delay: Duration) {
        let timers = self.timers.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(timer).await;
        });
    }

    fn start_transfer(&mut self, request: TransferRequest) {
        if self.sessions.contains_key(&request.packet) {
            warn!(bot = %request.bot, file = %request.file.name, "packet already streaming; ignoring offer");
            return;
        }
        let handle = spawn_session(self.context.clone(), request);
        self.sessions.insert(handle.packet(), handle);
        self.statistics.set_active_sessions(self.sessions.len());
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            network: self.tracker.network().clone(),
            files: self.store.records(),
        }
    }

    async fn save_if_changed(&mut self) {
        let last = self.events.last_change_id();
        if last == self.saved_at {
            return;
        }
        match self.snapshots.save(&self.snapshot()).await {
            Ok(()) => {
                debug!("snapshot saved");
                self.saved_at = last;
            }
            Err(err) => warn!(error = %err, "snapshot save failed"),
        }
    }

    async fn shutdown(mut self, inbox: &mut Inbox) -> AppResult<()> {
        info!(sessions = self.sessions.len(), "orchestrator shutting down");
        let mut pending: HashMap<PacketId, SessionHandle> = self.sessions.drain().collect();
        for handle in pending.values() {
            handle.cancel(false);
        }

        let drain = async {
            while !pending.is_empty() {
                let Some(update) = inbox.updates.recv().await else {
                    break;
                };
                if let SessionUpdate::Finished(report) = update {
                    if let Some(handle) = pending.remove(&report.packet) {
                        handle.join().await;
                    }
                    self.tracker.session_finished(report.packet, report.outcome);
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("sessions did not stop in time");
        }
        self.statistics.set_active_sessions(0);

        self.send(OutboundLine::quit("shutting down"));
        self.snapshots
            .save(&self.snapshot())
            .await
            .map_err(|err| AppError::snapshot("snapshot.save", err))
    }
}

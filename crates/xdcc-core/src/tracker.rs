//! Applies classified chatter and session lifecycle updates to the entity tree.
//!
//! # Design
//! - The tracker owns the [`Network`] and is driven from a single task; every
//!   handler runs to completion before the next line is looked at.
//! - Handlers never perform I/O. They mutate the tree, publish change events
//!   and return [`Intent`]s for the owner to execute.
//! - File state is only reachable through the [`ResumeCatalog`] seam.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, trace, warn};
use xdcc_events::{BotState, Event, EventBus, Statistic, StatisticsSink};

use crate::classifier::{Classifier, ClosingNotice, DccOffer, ProtocolEvent, SlotReport};
use crate::error::{CoreError, CoreResult};
use crate::intent::{Intent, TransferRequest};
use crate::message::{ChatLine, OutboundLine};
use crate::model::{BotId, ChannelId, FileKey, Network, PacketId};
use crate::outcome::TransferOutcome;
use crate::resume::{ResumeCatalog, ResumeDecision};

/// Behavioural knobs of the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Answer to CTCP `VERSION`.
    pub version: String,
    /// Answer to CTCP `XGVERSION`.
    pub custom_version: String,
    /// Delay before asking a bot again after it closed on us or a transfer ended.
    pub command_wait: Duration,
    /// Delay before rejoining a channel a bot forced us to leave.
    pub rejoin_delay: Duration,
    /// Publish unrecognised bot chatter as events.
    pub diagnostics: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            version: concat!("xdcc-grab ", env!("CARGO_PKG_VERSION")).to_string(),
            custom_version: env!("CARGO_PKG_VERSION").to_string(),
            command_wait: Duration::from_secs(15),
            rejoin_delay: Duration::from_secs(600),
            diagnostics: false,
        }
    }
}

/// Bot/packet state tracker for one network.
pub struct Tracker {
    network: Network,
    classifier: Classifier,
    settings: TrackerSettings,
    catalog: Arc<dyn ResumeCatalog>,
    statistics: Arc<dyn StatisticsSink>,
    events: EventBus,
}

impl Tracker {
    /// Build a tracker around an existing (possibly restored) tree.
    #[must_use]
    pub fn new(
        network: Network,
        classifier: Classifier,
        settings: TrackerSettings,
        catalog: Arc<dyn ResumeCatalog>,
        statistics: Arc<dyn StatisticsSink>,
        events: EventBus,
    ) -> Self {
        Self {
            network,
            classifier,
            settings,
            catalog,
            statistics,
            events,
        }
    }

    /// Current entity tree.
    #[must_use]
    pub const fn network(&self) -> &Network {
        &self.network
    }

    /// Handle one chat line from the server.
    pub fn handle_chat(&mut self, line: &ChatLine) -> Vec<Intent> {
        let bot = self.network.find_bot(&line.sender);
        if let Some(bot) = bot {
            self.touch(bot);
        }

        let Some(event) = self.classifier.classify(line) else {
            self.unrecognised(line, bot);
            return Vec::new();
        };
        debug!(sender = %line.sender, event = event.label(), "classified bot line");

        match event {
            ProtocolEvent::VersionQuery { custom } => {
                let reply = if custom {
                    OutboundLine::custom_version_reply(&line.sender, &self.settings.custom_version)
                } else {
                    OutboundLine::version_reply(&line.sender, &self.settings.version)
                };
                vec![Intent::Send(reply)]
            }
            ProtocolEvent::DccSend(offer) => match bot {
                Some(bot) => self.on_offer(bot, offer),
                None => {
                    warn!(sender = %line.sender, "dcc offer from unknown user ignored");
                    Vec::new()
                }
            },
            ProtocolEvent::DccAccept { file, port, offset } => match bot {
                Some(bot) => self.on_accept(bot, &file, port, offset),
                None => {
                    warn!(sender = %line.sender, "dcc accept from unknown user ignored");
                    Vec::new()
                }
            },
            ProtocolEvent::SlotInfo(report) => self.on_slot_info(line, report),
            ProtocolEvent::Bandwidth { current, max } => {
                if let Some(bot) = self.channel_bot(line) {
                    if let Some(entry) = self.network.bot_mut(bot) {
                        entry.record_speed(current, max);
                    }
                    self.publish_bot(bot);
                }
                Vec::new()
            }
            ProtocolEvent::PacketListing { number, size, name } => {
                self.on_packet_listing(line, number, size, name)
            }
            ProtocolEvent::Closing(notice) => match bot {
                Some(bot) => self.on_closing(bot, &line.text, notice),
                None => Vec::new(),
            },
            ProtocolEvent::Queued { position, total } => {
                if let Some(bot) = bot {
                    self.on_queued(bot, &line.text, position, total);
                }
                Vec::new()
            }
        }
    }

    /// The server connection is registered: join every enabled channel.
    pub fn on_connected(&mut self) -> Vec<Intent> {
        self.network.connected = true;
        self.events.publish(Event::NetworkChanged {
            network: self.network.name.clone(),
            connected: true,
        });
        self.network
            .channels()
            .filter(|(_, channel)| channel.enabled)
            .map(|(_, channel)| Intent::Send(OutboundLine::join(&channel.name)))
            .collect()
    }

    /// The server connection dropped. Outstanding requests are lost; running
    /// transfers are independent of the server and keep going.
    pub fn on_disconnected(&mut self) {
        self.network.mark_disconnected();
        let waiting: Vec<BotId> = self
            .network
            .bots()
            .filter(|(_, bot)| matches!(bot.state(), BotState::Waiting | BotState::Queued))
            .map(|(id, _)| id)
            .collect();
        for bot in waiting {
            if let Some(entry) = self.network.bot_mut(bot) {
                entry.transition(BotState::Idle);
                entry.queue_position = None;
            }
        }
        self.events.publish(Event::NetworkChanged {
            network: self.network.name.clone(),
            connected: false,
        });
    }

    /// Our own `JOIN` for `channel` was confirmed. Idle bots of the channel with
    /// wanted packets are asked right away.
    pub fn channel_joined(&mut self, channel: &str) -> Vec<Intent> {
        let Some(id) = self.network.find_channel(channel) else {
            return Vec::new();
        };
        let bots = match self.network.channel_mut(id) {
            Some(entry) => {
                entry.connected = true;
                entry.bots().to_vec()
            }
            None => return Vec::new(),
        };
        self.publish_channel(id);
        bots.into_iter()
            .flat_map(|bot| self.request_next(bot))
            .collect()
    }

    /// We left `channel` or were removed from it.
    pub fn channel_parted(&mut self, channel: &str) {
        if let Some(id) = self.network.find_channel(channel) {
            if let Some(entry) = self.network.channel_mut(id) {
                entry.connected = false;
            }
            self.publish_channel(id);
        }
    }

    /// Ask `bot` for its oldest wanted packet, if the bot is idle and reachable.
    pub fn request_next(&mut self, bot: BotId) -> Vec<Intent> {
        if !self.network.connected {
            return Vec::new();
        }
        let Some(packet) = self.network.oldest_active_packet(bot) else {
            return Vec::new();
        };
        let number = match self.network.packet(packet) {
            Some(entry) => entry.number(),
            None => return Vec::new(),
        };
        let Some(entry) = self.network.bot_mut(bot) else {
            return Vec::new();
        };
        if entry.state() != BotState::Idle {
            return Vec::new();
        }
        entry.transition(BotState::Waiting);
        let line = OutboundLine::xdcc_send(&entry.name, number);
        info!(bot = %entry.name, packet = number, "requesting packet");
        self.statistics.increment(Statistic::PacketsRequested, 1);
        self.publish_bot(bot);
        vec![Intent::Send(line)]
    }

    /// Register a wanted packet, creating the channel, bot and packet entries
    /// as needed. Returns the packet id.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel or bot name is invalid.
    pub fn add_request(&mut self, channel: &str, bot: &str, number: u32) -> CoreResult<PacketId> {
        let channel = self.network.ensure_channel(channel)?;
        let (bot, _) = self.network.ensure_bot(channel, bot)?;
        let (packet, _) = self.network.ensure_packet(bot, number)?;
        if let Some(entry) = self.network.packet_mut(packet) {
            entry.enable(Utc::now());
        }
        self.publish_packet(packet);
        Ok(packet)
    }

    /// Enable a packet and ask its bot if the bot is idle.
    ///
    /// # Errors
    ///
    /// Returns an error if `packet` does not resolve.
    pub fn enable_packet(&mut self, packet: PacketId) -> CoreResult<Vec<Intent>> {
        let entry = self
            .network
            .packet_mut(packet)
            .ok_or(CoreError::UnknownEntity {
                kind: "packet",
                index: packet.index(),
            })?;
        entry.enable(Utc::now());
        let bot = entry.bot();
        self.publish_packet(packet);
        Ok(self.request_next(bot))
    }

    /// Disable a packet. A running transfer is cancelled and its partial file
    /// removed; a pending request is withdrawn from the bot.
    ///
    /// # Errors
    ///
    /// Returns an error if `packet` does not resolve.
    pub fn disable_packet(&mut self, packet: PacketId) -> CoreResult<Vec<Intent>> {
        let (bot, enabled, running) = self
            .network
            .packet(packet)
            .map(|entry| (entry.bot(), entry.enabled, entry.connected || entry.transfer_pending))
            .ok_or(CoreError::UnknownEntity {
                kind: "packet",
                index: packet.index(),
            })?;
        if !enabled {
            return Ok(Vec::new());
        }
        let requested = self.network.oldest_active_packet(bot) == Some(packet);
        if let Some(entry) = self.network.packet_mut(packet) {
            entry.enabled = false;
        }
        self.publish_packet(packet);

        if running {
            return Ok(vec![Intent::CancelTransfer {
                packet,
                remove_file: true,
            }]);
        }

        let mut intents = Vec::new();
        if requested
            && let Some(entry) = self.network.bot_mut(bot)
            && matches!(entry.state(), BotState::Waiting | BotState::Queued)
        {
            intents.push(Intent::Send(OutboundLine::xdcc_remove(&entry.name)));
            entry.transition(BotState::Idle);
            entry.queue_position = None;
            self.publish_bot(bot);
            intents.push(Intent::ScheduleRequest {
                bot,
                delay: self.settings.command_wait,
            });
        }
        Ok(intents)
    }

    /// Search a bot's packet list.
    ///
    /// # Errors
    ///
    /// Returns an error if `bot` does not resolve.
    pub fn search(&self, bot: BotId, term: &str) -> CoreResult<Intent> {
        let entry = self.network.bot(bot).ok_or(CoreError::UnknownEntity {
            kind: "bot",
            index: bot.index(),
        })?;
        Ok(Intent::Send(OutboundLine::xdcc_search(&entry.name, term)))
    }

    /// A session opened its socket and bound `file`. Ignored when the packet
    /// was disabled meanwhile; its cancellation is already on the way.
    pub fn session_connected(&mut self, packet: PacketId, file: FileKey) {
        let Some((bot, entry)) = self.network.packet_with_bot_mut(packet) else {
            return;
        };
        entry.transfer_pending = false;
        if !entry.enabled {
            debug!(bot = %bot.name, packet = entry.number(), "session connected for a disabled packet");
            return;
        }
        entry.connected = true;
        entry.file = Some(file);
        bot.transition(BotState::Active);
        bot.queue_position = None;
        let bot = entry.bot();
        self.publish_packet(packet);
        self.publish_bot(bot);
    }

    /// A session ended. Applies the outcome and schedules the bot's next request.
    pub fn session_finished(&mut self, packet: PacketId, outcome: TransferOutcome) -> Vec<Intent> {
        let Some((bot, entry)) = self.network.packet_with_bot_mut(packet) else {
            return Vec::new();
        };
        entry.connected = false;
        entry.transfer_pending = false;
        entry.file = None;
        bot.transition(BotState::Idle);
        bot.has_network_problems = false;

        if outcome.disables_packet() {
            entry.enabled = false;
        }
        if outcome == TransferOutcome::ConnectFailed {
            bot.has_network_problems = true;
        }

        info!(
            bot = %bot.name,
            packet = entry.number(),
            outcome = outcome.as_str(),
            "transfer finished"
        );
        let bot = entry.bot();
        self.publish_packet(packet);
        self.publish_bot(bot);
        vec![Intent::ScheduleRequest {
            bot,
            delay: self.settings.command_wait,
        }]
    }

    fn touch(&mut self, bot: BotId) {
        if let Some(entry) = self.network.bot_mut(bot) {
            entry.connected = true;
            entry.last_contact = Some(Utc::now());
        }
    }

    /// Bot behind a channel info line, created on first sight. Lines from
    /// channels we do not track are ignored.
    fn channel_bot(&mut self, line: &ChatLine) -> Option<BotId> {
        let channel: ChannelId = self.network.find_channel(line.channel()?)?;
        match self.network.ensure_bot(channel, &line.sender) {
            Ok((bot, created)) => {
                if created {
                    info!(bot = %line.sender, channel = %line.target, "discovered bot");
                    self.touch(bot);
                }
                Some(bot)
            }
            Err(err) => {
                warn!(error = %err, bot = %line.sender, "failed to register bot");
                None
            }
        }
    }

    fn on_slot_info(&mut self, line: &ChatLine, report: SlotReport) -> Vec<Intent> {
        let Some(bot) = self.channel_bot(line) else {
            return Vec::new();
        };
        let Some(entry) = self.network.bot_mut(bot) else {
            return Vec::new();
        };
        let before = entry.slots.current();
        entry.slots.update(report.slots_current, report.slots_total);
        entry.queue.update(report.queue_current, report.queue_total);

        let freed = before == 0 && entry.slots.current() > 0;
        let retry = freed && entry.state() == BotState::Waiting;
        if retry {
            entry.transition(BotState::Idle);
        }
        self.publish_bot(bot);

        if retry {
            vec![Intent::ScheduleRequest {
                bot,
                delay: Duration::ZERO,
            }]
        } else {
            Vec::new()
        }
    }

    fn on_packet_listing(
        &mut self,
        line: &ChatLine,
        number: u32,
        size: u64,
        name: String,
    ) -> Vec<Intent> {
        let Some(bot) = self.channel_bot(line) else {
            return Vec::new();
        };
        let packet = match self.network.ensure_packet(bot, number) {
            Ok((packet, _)) => packet,
            Err(err) => {
                warn!(error = %err, bot = %line.sender, packet = number, "failed to register packet");
                return Vec::new();
            }
        };
        let Some(entry) = self.network.packet_mut(packet) else {
            return Vec::new();
        };

        let mut intents = Vec::new();
        if !entry.name.is_empty() && entry.name != name {
            warn!(
                bot = %line.sender,
                packet = number,
                old = %entry.name,
                new = %name,
                "packet name changed, disabling"
            );
            if entry.enabled && (entry.connected || entry.transfer_pending) {
                intents.push(Intent::CancelTransfer {
                    packet,
                    remove_file: true,
                });
            }
            entry.enabled = false;
            if !entry.connected {
                entry.real_name = None;
                entry.real_size = None;
            }
        }
        entry.name = name;
        entry.size = size;
        entry.last_mentioned = Some(Utc::now());
        trace!(bot = %line.sender, packet = number, "packet listing applied");
        self.publish_packet(packet);
        intents
    }

    fn on_offer(&mut self, bot: BotId, offer: DccOffer) -> Vec<Intent> {
        let Some(packet) = self.network.oldest_active_packet(bot) else {
            warn!(file = %offer.file, "dcc offer without a requested packet");
            return Vec::new();
        };
        let Some((bot_entry, entry)) = self.network.packet_with_bot_mut(packet) else {
            return Vec::new();
        };
        bot_entry.peer = Some(offer.peer);
        let bot_name = bot_entry.name.clone();

        let port = match u16::try_from(offer.port) {
            Ok(port) if port > 0 => port,
            _ => {
                warn!(bot = %bot_name, port = offer.port, "bot offered an unusable port, disabling packet");
                entry.enabled = false;
                self.statistics.increment(Statistic::BotConnectsFailed, 1);
                self.publish_packet(packet);
                return Vec::new();
            }
        };

        entry.real_name = Some(offer.file.clone());
        entry.real_size = Some(offer.size);
        let file = FileKey::new(offer.file, offer.size);

        let intents = match self.catalog.resume_decision(&file) {
            ResumeDecision::Fresh => {
                info!(bot = %bot_name, file = %file, "starting transfer");
                entry.transfer_pending = true;
                vec![Intent::StartTransfer(TransferRequest {
                    packet,
                    bot: bot_name,
                    peer: offer.peer,
                    port,
                    offset: 0,
                    file,
                })]
            }
            ResumeDecision::InUse => {
                warn!(bot = %bot_name, file = %file, "file already in use, disabling packet");
                entry.enabled = false;
                bot_entry.transition(BotState::Idle);
                let reject = OutboundLine::dcc_reject(&bot_name, &file.name);
                self.publish_bot(bot);
                vec![
                    Intent::Send(reject),
                    Intent::ScheduleRequest {
                        bot,
                        delay: self.settings.command_wait,
                    },
                ]
            }
            ResumeDecision::Resume(offset) => {
                info!(bot = %bot_name, file = %file, offset, "requesting resume");
                vec![Intent::Send(OutboundLine::dcc_resume(
                    &bot_name, &file.name, port, offset,
                ))]
            }
        };
        self.publish_packet(packet);
        intents
    }

    fn on_accept(&mut self, bot: BotId, file: &str, port: u16, offset: u64) -> Vec<Intent> {
        let Some(packet) = self.network.oldest_active_packet(bot) else {
            warn!(file, "resume accepted without a requested packet");
            return Vec::new();
        };
        let Some((bot_entry, entry)) = self.network.packet_with_bot_mut(packet) else {
            return Vec::new();
        };
        let (Some(peer), Some(key)) = (bot_entry.peer, entry.offered_file()) else {
            warn!(bot = %bot_entry.name, file, "resume accepted before any offer");
            return Vec::new();
        };
        info!(bot = %bot_entry.name, file = %key, offset, "resume accepted");
        entry.transfer_pending = true;
        vec![Intent::StartTransfer(TransferRequest {
            packet,
            bot: bot_entry.name.clone(),
            peer,
            port,
            offset,
            file: key,
        })]
    }

    fn on_closing(&mut self, bot: BotId, text: &str, notice: ClosingNotice) -> Vec<Intent> {
        let mut intents = Vec::new();
        let running = self.network.connected_packet(bot);
        if let Some(entry) = self.network.bot_mut(bot) {
            entry.last_message = Some(text.to_string());
            info!(bot = %entry.name, reason = %notice.reason, "bot closed connection");
            if entry.state() == BotState::Active {
                if let Some(packet) = running {
                    intents.push(Intent::CancelTransfer {
                        packet,
                        remove_file: false,
                    });
                }
            } else {
                entry.transition(BotState::Idle);
                entry.queue_position = None;
            }
        }
        self.publish_bot(bot);

        intents.push(Intent::ScheduleRequest {
            bot,
            delay: self.settings.command_wait,
        });
        if let Some(channel) = notice.join {
            if self.network.ensure_channel(&channel).is_ok() {
                intents.push(Intent::Send(OutboundLine::join(&channel)));
            }
        }
        for channel in notice.part {
            intents.push(Intent::Send(OutboundLine::part(&channel)));
            intents.push(Intent::Rejoin {
                channel,
                delay: self.settings.rejoin_delay,
            });
        }
        intents
    }

    fn on_queued(&mut self, bot: BotId, text: &str, position: Option<u32>, total: Option<u32>) {
        if let Some(entry) = self.network.bot_mut(bot) {
            entry.last_message = Some(text.to_string());
            if entry.transition(BotState::Queued) || entry.state() == BotState::Queued {
                entry.queue_position = position;
                if let (Some(position), Some(total)) = (position, total) {
                    entry.queue.update(Some(position), Some(total));
                }
                info!(bot = %entry.name, position, "queued by bot");
            }
        }
        self.publish_bot(bot);
    }

    fn unrecognised(&mut self, line: &ChatLine, bot: Option<BotId>) {
        if line.ctcp().is_some() {
            return;
        }
        if line.channel().is_none() {
            if let Some(entry) = bot.and_then(|bot| self.network.bot_mut(bot)) {
                entry.last_message = Some(line.text.clone());
            }
        }
        if !self.settings.diagnostics
            || self.classifier.is_noise(&line.text, line.channel())
        {
            return;
        }
        debug!(sender = %line.sender, line = %line.text, "[DCC Info] unparsed line");
        self.statistics.increment(Statistic::UnparsedLines, 1);
        self.events.publish(Event::UnparsedLine {
            bot: line.sender.clone(),
            line: line.text.clone(),
        });
    }

    fn publish_channel(&self, id: ChannelId) {
        if let Some(channel) = self.network.channel(id) {
            self.events.publish(Event::ChannelChanged {
                channel: channel.name.clone(),
                connected: channel.connected,
            });
        }
    }

    fn publish_bot(&self, id: BotId) {
        if let Some(bot) = self.network.bot(id) {
            self.events.publish(Event::BotChanged {
                bot: bot.name.clone(),
                state: bot.state(),
                connected: bot.connected,
            });
        }
    }

    fn publish_packet(&self, id: PacketId) {
        let Some(packet) = self.network.packet(id) else {
            return;
        };
        let bot = self
            .network
            .bot(packet.bot())
            .map(|bot| bot.name.clone())
            .unwrap_or_default();
        self.events.publish(Event::PacketChanged {
            bot,
            packet: packet.number(),
            name: packet.name.clone(),
            size: packet.size,
            enabled: packet.enabled,
            connected: packet.connected,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatKind;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use xdcc_test_support::stats::MemoryStatistics;

    const BOT: &str = "[XDCC]Bot";
    const OFFER: &str = "DCC SEND My.File.mkv 3232235521 6667 52428800";

    struct Harness {
        tracker: Tracker,
        packet: PacketId,
        bot: BotId,
        statistics: Arc<MemoryStatistics>,
    }

    fn harness(catalog: impl ResumeCatalog + 'static, settings: TrackerSettings) -> Harness {
        let statistics = Arc::new(MemoryStatistics::default());
        let mut tracker = Tracker::new(
            Network::new("irc.example.net"),
            Classifier::new().expect("patterns compile"),
            settings,
            Arc::new(catalog),
            statistics.clone(),
            EventBus::new(),
        );
        let packet = tracker.add_request("#xdcc", BOT, 4).expect("request");
        let bot = tracker.network().find_bot(BOT).expect("bot");
        Harness {
            tracker,
            packet,
            bot,
            statistics,
        }
    }

    fn fresh() -> impl ResumeCatalog + 'static {
        |_: &FileKey| ResumeDecision::Fresh
    }

    /// Connect and join so the bot has been asked for packet 4.
    fn requested(harness: &mut Harness) -> Vec<Intent> {
        let joins = harness.tracker.on_connected();
        assert_eq!(joins, vec![Intent::Send(OutboundLine::join("#xdcc"))]);
        harness.tracker.channel_joined("#xdcc")
    }

    fn channel_line(text: &str) -> ChatLine {
        ChatLine::new(ChatKind::Privmsg, BOT, "#xdcc", text)
    }

    fn ctcp_line(payload: &str) -> ChatLine {
        ChatLine::new(ChatKind::Privmsg, BOT, "me", format!("\u{1}{payload}\u{1}"))
    }

    fn bot_state(harness: &Harness) -> BotState {
        harness.tracker.network().bot(harness.bot).expect("bot").state()
    }

    fn packet_enabled(harness: &Harness) -> bool {
        harness
            .tracker
            .network()
            .packet(harness.packet)
            .expect("packet")
            .enabled
    }

    #[test]
    fn joining_requests_the_wanted_packet() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        let intents = requested(&mut harness);
        assert_eq!(
            intents,
            vec![Intent::Send(OutboundLine::xdcc_send(BOT, 4))]
        );
        assert_eq!(bot_state(&harness), BotState::Waiting);
        assert_eq!(harness.statistics.get(Statistic::PacketsRequested), 1);
    }

    #[test]
    fn nothing_is_requested_while_offline() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        assert!(harness.tracker.request_next(harness.bot).is_empty());
        assert_eq!(bot_state(&harness), BotState::Idle);
    }

    #[test]
    fn fresh_offer_starts_a_transfer() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        requested(&mut harness);

        let intents = harness.tracker.handle_chat(&ctcp_line(OFFER));
        let [Intent::StartTransfer(request)] = intents.as_slice() else {
            panic!("expected a transfer, got {intents:?}");
        };
        assert_eq!(request.packet, harness.packet);
        assert_eq!(
            request.endpoint(),
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), 6667)
        );
        assert_eq!(request.offset, 0);
        assert_eq!(request.file, FileKey::new("My.File.mkv", 52_428_800));

        let packet = harness.tracker.network().packet(harness.packet).expect("packet");
        assert_eq!(packet.real_name.as_deref(), Some("My.File.mkv"));
        assert_eq!(packet.real_size, Some(52_428_800));
    }

    #[test]
    fn partial_file_negotiates_a_resume() {
        let catalog = |_: &FileKey| ResumeDecision::Resume(1_048_576);
        let mut harness = harness(catalog, TrackerSettings::default());
        requested(&mut harness);

        let intents = harness.tracker.handle_chat(&ctcp_line(OFFER));
        assert_eq!(
            intents,
            vec![Intent::Send(OutboundLine::dcc_resume(
                BOT,
                "My.File.mkv",
                6667,
                1_048_576
            ))]
        );

        let intents = harness
            .tracker
            .handle_chat(&ctcp_line("DCC ACCEPT My.File.mkv 6667 1048576"));
        let [Intent::StartTransfer(request)] = intents.as_slice() else {
            panic!("expected a transfer, got {intents:?}");
        };
        assert_eq!(request.offset, 1_048_576);
        assert_eq!(request.peer, Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(request.file.size, 52_428_800);
    }

    #[test]
    fn busy_file_is_rejected() {
        let catalog = |_: &FileKey| ResumeDecision::InUse;
        let mut harness = harness(catalog, TrackerSettings::default());
        requested(&mut harness);

        let intents = harness.tracker.handle_chat(&ctcp_line(OFFER));
        assert_eq!(
            intents[0],
            Intent::Send(OutboundLine::dcc_reject(BOT, "My.File.mkv"))
        );
        assert!(matches!(intents[1], Intent::ScheduleRequest { .. }));
        assert!(!packet_enabled(&harness));
        assert_eq!(bot_state(&harness), BotState::Idle);
    }

    #[test]
    fn unusable_port_disables_packet() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        requested(&mut harness);

        let intents = harness
            .tracker
            .handle_chat(&ctcp_line("DCC SEND My.File.mkv 3232235521 0 52428800"));
        assert!(intents.is_empty());
        assert!(!packet_enabled(&harness));
        assert_eq!(harness.statistics.get(Statistic::BotConnectsFailed), 1);
    }

    #[test]
    fn offers_from_strangers_are_ignored() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        requested(&mut harness);
        let line = ChatLine::new(ChatKind::Privmsg, "Stranger", "me", format!("\u{1}{OFFER}\u{1}"));
        assert!(harness.tracker.handle_chat(&line).is_empty());
    }

    #[test]
    fn slot_report_is_clamped_and_frees_a_waiting_bot() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        requested(&mut harness);

        let intents = harness.tracker.handle_chat(&channel_line(
            "** 4 packs **  12 of 10 slots open, Queue: 3/20, Record: 512.0KB/s",
        ));
        let bot = harness.tracker.network().bot(harness.bot).expect("bot");
        assert_eq!(bot.slots.current(), 12);
        assert_eq!(bot.slots.total(), 12);
        assert_eq!(bot.queue.current(), 3);
        assert_eq!(bot.state(), BotState::Idle);
        assert_eq!(
            intents,
            vec![Intent::ScheduleRequest {
                bot: harness.bot,
                delay: Duration::ZERO,
            }]
        );

        let again = harness.tracker.handle_chat(&channel_line(
            "** 4 packs **  9 of 10 slots open",
        ));
        assert!(again.is_empty());
    }

    #[test]
    fn info_lines_from_unknown_channels_are_dropped() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        let line = ChatLine::new(
            ChatKind::Privmsg,
            "OtherBot",
            "#elsewhere",
            "#1 1x [1M] other.bin",
        );
        assert!(harness.tracker.handle_chat(&line).is_empty());
        assert!(harness.tracker.network().find_bot("OtherBot").is_none());
    }

    #[test]
    fn repeated_listing_is_idempotent() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        let listing = channel_line("#4 1x [50MB] My.File.mkv");
        assert!(harness.tracker.handle_chat(&listing).is_empty());
        assert!(harness.tracker.handle_chat(&listing).is_empty());

        let network = harness.tracker.network();
        let bot = network.bot(harness.bot).expect("bot");
        assert_eq!(bot.packets().count(), 1);
        let packet = network.packet(harness.packet).expect("packet");
        assert_eq!(packet.name, "My.File.mkv");
        assert_eq!(packet.size, 52_428_800);
        assert!(packet.enabled);
        assert!(packet.last_mentioned.is_some());
    }

    #[test]
    fn renamed_packet_is_disabled() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        harness
            .tracker
            .handle_chat(&channel_line("#4 1x [50MB] My.File.mkv"));
        harness
            .tracker
            .handle_chat(&channel_line("#4 1x [50MB] Other.File.mkv"));
        let packet = harness.tracker.network().packet(harness.packet).expect("packet");
        assert_eq!(packet.name, "Other.File.mkv");
        assert!(!packet.enabled);
    }

    #[test]
    fn bandwidth_report_updates_speeds() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        harness.tracker.handle_chat(&channel_line(
            "** Bandwidth Usage ** Current: 12.5KB/s, Record: 100.0KB/s",
        ));
        let bot = harness.tracker.network().bot(harness.bot).expect("bot");
        assert_eq!(bot.speed_current, 12_800);
        assert_eq!(bot.speed_max(), 102_400);
    }

    #[test]
    fn closing_notice_resets_waiting_bot_and_follows_channel_hints() {
        let settings = TrackerSettings::default();
        let wait = settings.command_wait;
        let rejoin = settings.rejoin_delay;
        let mut harness = harness(fresh(), settings);
        requested(&mut harness);

        let intents = harness.tracker.handle_chat(&channel_line(
            "** Closing Connection: You must JOIN beta to download, restricted to only #beta /Part #alpha if you want to download from me",
        ));
        assert_eq!(bot_state(&harness), BotState::Idle);
        assert_eq!(
            intents,
            vec![
                Intent::ScheduleRequest {
                    bot: harness.bot,
                    delay: wait,
                },
                Intent::Send(OutboundLine::join("#beta")),
                Intent::Send(OutboundLine::part("#alpha")),
                Intent::Rejoin {
                    channel: "#alpha".to_string(),
                    delay: rejoin,
                },
            ]
        );
        let bot = harness.tracker.network().bot(harness.bot).expect("bot");
        assert!(bot.last_message.is_some());
    }

    #[test]
    fn closing_notice_cancels_running_transfer_without_removal() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        requested(&mut harness);
        harness
            .tracker
            .session_connected(harness.packet, FileKey::new("My.File.mkv", 52_428_800));

        let intents = harness
            .tracker
            .handle_chat(&channel_line("** Closing Connection: Transfer timed out"));
        assert_eq!(
            intents[0],
            Intent::CancelTransfer {
                packet: harness.packet,
                remove_file: false,
            }
        );
        assert_eq!(bot_state(&harness), BotState::Active);
    }

    #[test]
    fn queue_notice_records_position() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        requested(&mut harness);
        harness.tracker.handle_chat(&ChatLine::new(
            ChatKind::Notice,
            BOT,
            "me",
            "Queueing you for pack 4 (\"My.File.mkv\") in position 2 of 7.",
        ));
        let bot = harness.tracker.network().bot(harness.bot).expect("bot");
        assert_eq!(bot.state(), BotState::Queued);
        assert_eq!(bot.queue_position, Some(2));
    }

    #[test]
    fn version_query_is_answered() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        let settings = TrackerSettings::default();
        let intents = harness.tracker.handle_chat(&ctcp_line("VERSION"));
        assert_eq!(
            intents,
            vec![Intent::Send(OutboundLine::version_reply(BOT, &settings.version))]
        );
    }

    #[test]
    fn active_bot_is_not_asked_again() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        requested(&mut harness);
        harness
            .tracker
            .session_connected(harness.packet, FileKey::new("My.File.mkv", 52_428_800));
        harness.tracker.add_request("#xdcc", BOT, 5).expect("request");

        assert!(harness.tracker.request_next(harness.bot).is_empty());
        assert_eq!(bot_state(&harness), BotState::Active);
    }

    #[test]
    fn failed_connect_disables_packet_and_flags_bot() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        requested(&mut harness);
        let intents = harness
            .tracker
            .session_finished(harness.packet, TransferOutcome::ConnectFailed);

        assert!(matches!(intents.as_slice(), [Intent::ScheduleRequest { .. }]));
        assert!(!packet_enabled(&harness));
        let bot = harness.tracker.network().bot(harness.bot).expect("bot");
        assert!(bot.has_network_problems);
        assert_eq!(bot.state(), BotState::Idle);
    }

    #[test]
    fn oversized_transfer_keeps_packet_wanted() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        requested(&mut harness);
        harness
            .tracker
            .session_connected(harness.packet, FileKey::new("My.File.mkv", 52_428_800));
        harness
            .tracker
            .session_finished(harness.packet, TransferOutcome::SizeMismatch);

        let packet = harness.tracker.network().packet(harness.packet).expect("packet");
        assert!(packet.enabled);
        assert!(!packet.connected);
        assert!(packet.file.is_none());
        assert_eq!(bot_state(&harness), BotState::Idle);
    }

    #[test]
    fn disabling_a_pending_request_withdraws_it() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        requested(&mut harness);
        let intents = harness
            .tracker
            .disable_packet(harness.packet)
            .expect("disable");
        assert_eq!(intents[0], Intent::Send(OutboundLine::xdcc_remove(BOT)));
        assert_eq!(bot_state(&harness), BotState::Idle);
        assert!(!packet_enabled(&harness));
    }

    #[test]
    fn disabling_a_running_transfer_cancels_it() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        requested(&mut harness);
        harness
            .tracker
            .session_connected(harness.packet, FileKey::new("My.File.mkv", 52_428_800));
        let intents = harness
            .tracker
            .disable_packet(harness.packet)
            .expect("disable");
        assert_eq!(
            intents,
            vec![Intent::CancelTransfer {
                packet: harness.packet,
                remove_file: true,
            }]
        );
    }

    #[test]
    fn disabling_a_starting_transfer_cancels_it() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        requested(&mut harness);
        let intents = harness.tracker.handle_chat(&ctcp_line(OFFER));
        assert!(matches!(intents.as_slice(), [Intent::StartTransfer(_)]));

        let intents = harness
            .tracker
            .disable_packet(harness.packet)
            .expect("disable");
        assert_eq!(
            intents,
            vec![Intent::CancelTransfer {
                packet: harness.packet,
                remove_file: true,
            }]
        );

        harness
            .tracker
            .session_connected(harness.packet, FileKey::new("My.File.mkv", 52_428_800));
        let packet = harness.tracker.network().packet(harness.packet).expect("packet");
        assert!(!packet.connected);
        assert!(packet.file.is_none());
        assert_ne!(bot_state(&harness), BotState::Active);
    }

    #[test]
    fn unparsed_lines_are_reported_when_diagnostics_are_on() {
        let settings = TrackerSettings {
            diagnostics: true,
            ..TrackerSettings::default()
        };
        let mut harness = harness(fresh(), settings);
        harness.tracker.handle_chat(&channel_line("just chatting"));
        harness
            .tracker
            .handle_chat(&channel_line("** Welcome to #xdcc **"));
        assert_eq!(harness.statistics.get(Statistic::UnparsedLines), 1);
    }

    #[test]
    fn disconnect_returns_waiting_bots_to_idle() {
        let mut harness = harness(fresh(), TrackerSettings::default());
        requested(&mut harness);
        harness.tracker.on_disconnected();
        assert_eq!(bot_state(&harness), BotState::Idle);
        assert!(!harness.tracker.network().connected);
    }
}

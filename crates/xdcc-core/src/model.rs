//! Entity tree for one IRC network.
//!
//! # Design
//! - The tree is an arena: the [`Network`] owns flat vectors of channels, bots
//!   and packets, and entities point at each other through typed indices.
//! - Parents hold child indices, children hold their parent index; there are no
//!   shared pointers and the whole tree serialises as plain data.
//! - Bot nicknames are compared ASCII case-insensitively, the way IRC servers
//!   compare them.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use xdcc_events::BotState;

use crate::error::{CoreError, CoreResult};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Arena slot backing this identifier.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Index of a channel inside its network.
    ChannelId
);
entity_id!(
    /// Index of a bot inside its network.
    BotId
);
entity_id!(
    /// Index of a packet inside its network.
    PacketId
);

/// Whether a bot may move from `from` to `to`.
///
/// Repeating the current state is allowed and is a no-op. An active transfer
/// only ever falls back to idle; duplicate chatter that would push an active
/// bot back to waiting or queued is rejected.
#[must_use]
pub const fn allows_transition(from: BotState, to: BotState) -> bool {
    matches!(
        (from, to),
        (BotState::Idle, _)
            | (BotState::Waiting, _)
            | (BotState::Queued, BotState::Idle | BotState::Queued | BotState::Active)
            | (BotState::Active, BotState::Idle | BotState::Active)
    )
}

/// Current/total pair reported by a bot (slots or queue places).
///
/// `current` never exceeds `total`: a report with more in use than available
/// raises the total to match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CapacityRepr", into = "CapacityRepr")]
pub struct Capacity {
    current: u32,
    total: u32,
}

#[derive(Serialize, Deserialize)]
struct CapacityRepr {
    current: u32,
    total: u32,
}

impl From<CapacityRepr> for Capacity {
    fn from(repr: CapacityRepr) -> Self {
        Self::new(repr.current, repr.total)
    }
}

impl From<Capacity> for CapacityRepr {
    fn from(capacity: Capacity) -> Self {
        Self {
            current: capacity.current,
            total: capacity.total,
        }
    }
}

impl Capacity {
    /// Build a clamped pair.
    #[must_use]
    pub const fn new(current: u32, total: u32) -> Self {
        if current > total {
            Self {
                current,
                total: current,
            }
        } else {
            Self { current, total }
        }
    }

    /// Currently free (slots) or occupied (queue) places.
    #[must_use]
    pub const fn current(self) -> u32 {
        self.current
    }

    /// Total places.
    #[must_use]
    pub const fn total(self) -> u32 {
        self.total
    }

    /// Apply a partial report, keeping the stored half when a value is missing.
    pub fn update(&mut self, current: Option<u32>, total: Option<u32>) {
        *self = Self::new(
            current.unwrap_or(self.current),
            total.unwrap_or(self.total),
        );
    }
}

/// Storage key of a transferred file: the name and size announced in the offer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey {
    pub name: String,
    pub size: u64,
}

impl FileKey {
    /// Build a key from an offered name and size.
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} ({} bytes)", self.name, self.size)
    }
}

/// Channel joined on the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub enabled: bool,
    pub connected: bool,
    bots: Vec<BotId>,
}

impl Channel {
    /// Bots first seen in this channel.
    #[must_use]
    pub fn bots(&self) -> &[BotId] {
        &self.bots
    }
}

/// Bot offering packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub name: String,
    channel: ChannelId,
    pub connected: bool,
    pub last_contact: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    pub peer: Option<Ipv4Addr>,
    state: BotState,
    pub slots: Capacity,
    pub queue: Capacity,
    pub queue_position: Option<u32>,
    pub speed_current: u64,
    speed_max: u64,
    pub has_network_problems: bool,
    packets: BTreeMap<u32, PacketId>,
}

impl Bot {
    /// Channel the bot was first seen in.
    #[must_use]
    pub const fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Current activity state.
    #[must_use]
    pub const fn state(&self) -> BotState {
        self.state
    }

    /// Move to `next` if the state machine allows it. Returns `true` when the
    /// state actually changed.
    pub fn transition(&mut self, next: BotState) -> bool {
        if self.state == next || !allows_transition(self.state, next) {
            return false;
        }
        self.state = next;
        true
    }

    /// Highest speed seen from this bot, in bytes per second.
    #[must_use]
    pub const fn speed_max(&self) -> u64 {
        self.speed_max
    }

    /// Store a bandwidth report. The tracked maximum only ever grows.
    pub fn record_speed(&mut self, current: Option<u64>, max: Option<u64>) {
        if let Some(current) = current {
            self.speed_current = current;
            self.speed_max = self.speed_max.max(current);
        }
        if let Some(max) = max {
            self.speed_max = self.speed_max.max(max);
        }
    }

    /// Packet index for an advertised packet number.
    #[must_use]
    pub fn packet_id(&self, number: u32) -> Option<PacketId> {
        self.packets.get(&number).copied()
    }

    /// Advertised packets ordered by number.
    pub fn packets(&self) -> impl Iterator<Item = (u32, PacketId)> + '_ {
        self.packets.iter().map(|(number, id)| (*number, *id))
    }
}

/// Packet advertised by a bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    bot: BotId,
    number: u32,
    pub name: String,
    pub size: u64,
    pub enabled: bool,
    pub connected: bool,
    /// A transfer was started and has not reported its socket yet.
    #[serde(skip)]
    pub transfer_pending: bool,
    pub last_mentioned: Option<DateTime<Utc>>,
    pub requested_at: Option<DateTime<Utc>>,
    pub real_name: Option<String>,
    pub real_size: Option<u64>,
    pub file: Option<FileKey>,
}

impl Packet {
    /// Owning bot.
    #[must_use]
    pub const fn bot(&self) -> BotId {
        self.bot
    }

    /// Number the bot advertises the packet under.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Mark the packet wanted. The enable time orders requests per bot.
    pub fn enable(&mut self, now: DateTime<Utc>) {
        if !self.enabled {
            self.enabled = true;
            self.requested_at = Some(now);
        }
    }

    /// Key of the file announced by the last offer, if any.
    #[must_use]
    pub fn offered_file(&self) -> Option<FileKey> {
        match (&self.real_name, self.real_size) {
            (Some(name), Some(size)) => Some(FileKey::new(name.clone(), size)),
            _ => None,
        }
    }
}

/// Root of the entity tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub connected: bool,
    channels: Vec<Channel>,
    bots: Vec<Bot>,
    packets: Vec<Packet>,
}

impl Network {
    /// Empty network tree.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Resolve a channel.
    #[must_use]
    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id.0)
    }

    /// Resolve a channel mutably.
    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(id.0)
    }

    /// Resolve a bot.
    #[must_use]
    pub fn bot(&self, id: BotId) -> Option<&Bot> {
        self.bots.get(id.0)
    }

    /// Resolve a bot mutably.
    pub fn bot_mut(&mut self, id: BotId) -> Option<&mut Bot> {
        self.bots.get_mut(id.0)
    }

    /// Resolve a packet.
    #[must_use]
    pub fn packet(&self, id: PacketId) -> Option<&Packet> {
        self.packets.get(id.0)
    }

    /// Resolve a packet mutably.
    pub fn packet_mut(&mut self, id: PacketId) -> Option<&mut Packet> {
        self.packets.get_mut(id.0)
    }

    /// Resolve a packet together with its owning bot.
    pub fn packet_with_bot_mut(&mut self, id: PacketId) -> Option<(&mut Bot, &mut Packet)> {
        let packet = self.packets.get_mut(id.0)?;
        let bot = self.bots.get_mut(packet.bot.0)?;
        Some((bot, packet))
    }

    /// All channels with their ids.
    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &Channel)> {
        self.channels
            .iter()
            .enumerate()
            .map(|(index, channel)| (ChannelId(index), channel))
    }

    /// All bots with their ids.
    pub fn bots(&self) -> impl Iterator<Item = (BotId, &Bot)> {
        self.bots
            .iter()
            .enumerate()
            .map(|(index, bot)| (BotId(index), bot))
    }

    /// All packets with their ids.
    pub fn packets(&self) -> impl Iterator<Item = (PacketId, &Packet)> {
        self.packets
            .iter()
            .enumerate()
            .map(|(index, packet)| (PacketId(index), packet))
    }

    /// Packets owned by `bot`, ordered by packet number.
    pub fn packets_of(&self, bot: BotId) -> impl Iterator<Item = (PacketId, &Packet)> {
        self.bot(bot)
            .into_iter()
            .flat_map(|bot| bot.packets.values())
            .filter_map(|id| self.packet(*id).map(|packet| (*id, packet)))
    }

    /// Look up a channel by name, ignoring ASCII case.
    #[must_use]
    pub fn find_channel(&self, name: &str) -> Option<ChannelId> {
        self.channels
            .iter()
            .position(|channel| channel.name.eq_ignore_ascii_case(name))
            .map(ChannelId)
    }

    /// Find or create a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a channel name.
    pub fn ensure_channel(&mut self, name: &str) -> CoreResult<ChannelId> {
        let name = name.trim();
        if !is_channel_name(name) {
            return Err(CoreError::InvalidName {
                kind: "channel",
                value: name.to_string(),
            });
        }
        if let Some(id) = self.find_channel(name) {
            return Ok(id);
        }
        self.channels.push(Channel {
            name: name.to_string(),
            enabled: true,
            connected: false,
            bots: Vec::new(),
        });
        Ok(ChannelId(self.channels.len() - 1))
    }

    /// Look up a bot anywhere on the network by nickname, ignoring ASCII case.
    #[must_use]
    pub fn find_bot(&self, name: &str) -> Option<BotId> {
        self.bots
            .iter()
            .position(|bot| bot.name.eq_ignore_ascii_case(name))
            .map(BotId)
    }

    /// Find a bot by nickname or create it inside `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error if `channel` does not resolve or the name is empty.
    pub fn ensure_bot(&mut self, channel: ChannelId, name: &str) -> CoreResult<(BotId, bool)> {
        if let Some(id) = self.find_bot(name) {
            return Ok((id, false));
        }
        if name.is_empty() {
            return Err(CoreError::InvalidName {
                kind: "bot",
                value: name.to_string(),
            });
        }
        let id = BotId(self.bots.len());
        let parent = self
            .channels
            .get_mut(channel.0)
            .ok_or(CoreError::UnknownEntity {
                kind: "channel",
                index: channel.0,
            })?;
        parent.bots.push(id);
        self.bots.push(Bot {
            name: name.to_string(),
            channel,
            connected: true,
            last_contact: None,
            last_message: None,
            peer: None,
            state: BotState::Idle,
            slots: Capacity::default(),
            queue: Capacity::default(),
            queue_position: None,
            speed_current: 0,
            speed_max: 0,
            has_network_problems: false,
            packets: BTreeMap::new(),
        });
        Ok((id, true))
    }

    /// Find or create packet `number` of `bot`. The flag reports creation.
    ///
    /// # Errors
    ///
    /// Returns an error if `bot` does not resolve.
    pub fn ensure_packet(&mut self, bot: BotId, number: u32) -> CoreResult<(PacketId, bool)> {
        let next = PacketId(self.packets.len());
        let owner = self.bots.get_mut(bot.0).ok_or(CoreError::UnknownEntity {
            kind: "bot",
            index: bot.0,
        })?;
        if let Some(existing) = owner.packets.get(&number) {
            return Ok((*existing, false));
        }
        owner.packets.insert(number, next);
        self.packets.push(Packet {
            bot,
            number,
            name: String::new(),
            size: 0,
            enabled: false,
            connected: false,
            transfer_pending: false,
            last_mentioned: None,
            requested_at: None,
            real_name: None,
            real_size: None,
            file: None,
        });
        Ok((next, true))
    }

    /// The packet a bot's next offer belongs to: the enabled packet requested
    /// earliest that has no transfer yet.
    #[must_use]
    pub fn oldest_active_packet(&self, bot: BotId) -> Option<PacketId> {
        self.packets_of(bot)
            .filter(|(_, packet)| packet.enabled && !packet.connected && !packet.transfer_pending)
            .min_by_key(|(_, packet)| {
                (
                    packet.requested_at.is_none(),
                    packet.requested_at,
                    packet.number,
                )
            })
            .map(|(id, _)| id)
    }

    /// Packet currently streaming from `bot`, if any.
    #[must_use]
    pub fn connected_packet(&self, bot: BotId) -> Option<PacketId> {
        self.packets_of(bot)
            .find(|(_, packet)| packet.connected)
            .map(|(id, _)| id)
    }

    /// Mark the network and everything below it disconnected.
    pub fn mark_disconnected(&mut self) {
        self.connected = false;
        for channel in &mut self.channels {
            channel.connected = false;
        }
        for bot in &mut self.bots {
            bot.connected = false;
        }
    }

    /// Forget transient transfer state after loading a persisted tree. No
    /// session survives a restart, so bots return to idle and packets to
    /// unconnected.
    pub fn reset_transient(&mut self) {
        self.mark_disconnected();
        for bot in &mut self.bots {
            bot.state = BotState::Idle;
            bot.queue_position = None;
        }
        for packet in &mut self.packets {
            packet.connected = false;
            packet.transfer_pending = false;
            packet.file = None;
        }
    }
}

/// Whether `name` looks like an IRC channel.
#[must_use]
pub fn is_channel_name(name: &str) -> bool {
    name.len() > 1 && name.starts_with(['#', '&'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn network_with_bot() -> (Network, BotId) {
        let mut network = Network::new("irc.example.net");
        let channel = network.ensure_channel("#xdcc").expect("channel");
        let (bot, created) = network.ensure_bot(channel, "[XDCC]Bot").expect("bot");
        assert!(created);
        (network, bot)
    }

    #[test]
    fn capacity_raises_total_to_current() {
        let capacity = Capacity::new(5, 3);
        assert_eq!((capacity.current(), capacity.total()), (5, 5));

        let mut queue = Capacity::new(1, 10);
        queue.update(Some(12), None);
        assert_eq!((queue.current(), queue.total()), (12, 12));
        queue.update(None, Some(20));
        assert_eq!((queue.current(), queue.total()), (12, 20));
    }

    #[test]
    fn capacity_deserialisation_clamps() {
        let capacity: Capacity =
            serde_json::from_str(r#"{"current":4,"total":1}"#).expect("capacity json");
        assert_eq!(capacity.total(), 4);
    }

    #[test]
    fn bot_lookup_ignores_case() {
        let (mut network, bot) = network_with_bot();
        assert_eq!(network.find_bot("[xdcc]bot"), Some(bot));
        let channel = network.find_channel("#XDCC").expect("channel");
        let (again, created) = network.ensure_bot(channel, "[XDCC]BOT").expect("bot");
        assert_eq!(again, bot);
        assert!(!created);
    }

    #[test]
    fn channel_names_are_validated() {
        let mut network = Network::new("net");
        assert!(network.ensure_channel("nochan").is_err());
        assert!(network.ensure_channel("#").is_err());
        let first = network.ensure_channel("#a").expect("channel");
        assert_eq!(network.ensure_channel("#A").expect("channel"), first);
    }

    #[test]
    fn packets_are_unique_per_bot() {
        let (mut network, bot) = network_with_bot();
        let (first, created) = network.ensure_packet(bot, 4).expect("packet");
        assert!(created);
        let (second, created) = network.ensure_packet(bot, 4).expect("packet");
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(network.packets_of(bot).count(), 1);
    }

    #[test]
    fn oldest_active_packet_follows_request_order() {
        let (mut network, bot) = network_with_bot();
        let now = Utc::now();
        let (late, _) = network.ensure_packet(bot, 1).expect("packet");
        let (early, _) = network.ensure_packet(bot, 2).expect("packet");
        let (disabled, _) = network.ensure_packet(bot, 3).expect("packet");

        network.packet_mut(late).expect("late").enable(now);
        network
            .packet_mut(early)
            .expect("early")
            .enable(now - Duration::seconds(30));
        network.packet_mut(disabled).expect("disabled").enabled = false;

        assert_eq!(network.oldest_active_packet(bot), Some(early));

        network.packet_mut(early).expect("early").connected = true;
        assert_eq!(network.oldest_active_packet(bot), Some(late));
        assert_eq!(network.connected_packet(bot), Some(early));
    }

    #[test]
    fn bot_transitions_follow_state_machine() {
        let (mut network, bot) = network_with_bot();
        let bot = network.bot_mut(bot).expect("bot");

        assert!(bot.transition(BotState::Waiting));
        assert!(bot.transition(BotState::Queued));
        assert!(!bot.transition(BotState::Waiting));
        assert!(bot.transition(BotState::Active));
        assert!(!bot.transition(BotState::Queued));
        assert!(!bot.transition(BotState::Active));
        assert_eq!(bot.state(), BotState::Active);
        assert!(bot.transition(BotState::Idle));
    }

    #[test]
    fn speed_maximum_never_drops() {
        let (mut network, bot) = network_with_bot();
        let bot = network.bot_mut(bot).expect("bot");
        bot.record_speed(Some(2_048), Some(10_240));
        bot.record_speed(Some(1_024), Some(4_096));
        assert_eq!(bot.speed_current, 1_024);
        assert_eq!(bot.speed_max(), 10_240);
        bot.record_speed(Some(20_480), None);
        assert_eq!(bot.speed_max(), 20_480);
    }

    #[test]
    fn network_round_trips_through_json() {
        let (mut network, bot) = network_with_bot();
        network.ensure_packet(bot, 9).expect("packet");
        let json = serde_json::to_string(&network).expect("serialise");
        let restored: Network = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(restored, network);
    }

    #[test]
    fn reset_transient_clears_sessions() {
        let (mut network, bot) = network_with_bot();
        let (packet, _) = network.ensure_packet(bot, 3).expect("packet");
        network.connected = true;
        {
            let (bot, packet) = network.packet_with_bot_mut(packet).expect("packet");
            assert!(bot.transition(BotState::Waiting));
            assert!(bot.transition(BotState::Active));
            bot.connected = true;
            packet.connected = true;
            packet.file = Some(FileKey::new("file.bin", 10));
        }

        network.reset_transient();

        assert!(!network.connected);
        let bot = network.bot(bot).expect("bot");
        assert_eq!(bot.state(), BotState::Idle);
        assert!(!bot.connected);
        let packet = network.packet(packet).expect("packet");
        assert!(!packet.connected);
        assert!(packet.file.is_none());
    }
}

#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Event bus shared by the tracker, the transfer engine and the persistence task.
//!
//! Entity changes are published as typed events instead of per-object observer
//! callbacks. The bus wraps `tokio::broadcast` with a bounded replay ring so a
//! subscriber that attaches late (the snapshot writer, a presentation layer) can
//! catch up on recent activity. When the channel overflows the oldest events are
//! dropped.

pub mod stats;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use uuid::Uuid;

pub use stats::{NoopStatistics, Statistic, StatisticsSink};

/// Identifier assigned to each published event.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Activity state of a bot as seen by this client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    /// Nothing requested or the last request finished.
    #[default]
    Idle,
    /// A packet was requested and no answer arrived yet.
    Waiting,
    /// The bot placed us into its queue.
    Queued,
    /// A transfer from this bot is running.
    Active,
}

impl BotState {
    /// Stable lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Waiting => "waiting",
            Self::Queued => "queued",
            Self::Active => "active",
        }
    }
}

/// Kinds of user-facing notifications raised by the tracker and transfer engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The peer socket of a bot was opened.
    BotConnected,
    /// Connecting to a bot failed or it never sent data.
    BotConnectFailed,
    /// A packet was received completely.
    PacketCompleted,
    /// A transfer ended before the expected size was reached.
    PacketIncomplete,
    /// More bytes than announced arrived; the data was discarded.
    PacketBroken,
    /// Resumed data did not match what was stored on disk.
    PacketFileMismatch,
}

impl NotificationKind {
    /// Stable lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BotConnected => "bot_connected",
            Self::BotConnectFailed => "bot_connect_failed",
            Self::PacketCompleted => "packet_completed",
            Self::PacketIncomplete => "packet_incomplete",
            Self::PacketBroken => "packet_broken",
            Self::PacketFileMismatch => "packet_file_mismatch",
        }
    }
}

/// Typed domain events surfaced across the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    NetworkChanged {
        network: String,
        connected: bool,
    },
    ChannelChanged {
        channel: String,
        connected: bool,
    },
    BotChanged {
        bot: String,
        state: BotState,
        connected: bool,
    },
    PacketChanged {
        bot: String,
        packet: u32,
        name: String,
        size: u64,
        enabled: bool,
        connected: bool,
    },
    FileProgress {
        session_id: Uuid,
        file: String,
        current_size: u64,
        size: u64,
        speed: u64,
    },
    Notification {
        kind: NotificationKind,
        subject: String,
    },
    UnparsedLine {
        bot: String,
        line: String,
    },
}

impl Event {
    /// Machine-friendly discriminator for subscribers and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NetworkChanged { .. } => "network_changed",
            Self::ChannelChanged { .. } => "channel_changed",
            Self::BotChanged { .. } => "bot_changed",
            Self::PacketChanged { .. } => "packet_changed",
            Self::FileProgress { .. } => "file_progress",
            Self::Notification { .. } => "notification",
            Self::UnparsedLine { .. } => "unparsed_line",
        }
    }

    /// Whether the event reflects a change that should end up in a snapshot.
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        !matches!(self, Self::UnparsedLine { .. } | Self::Notification { .. })
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    last_change: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// A zero capacity is raised to one; the broadcast channel and the replay
    /// ring always share the same bound.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            last_change: Arc::new(AtomicU64::new(0)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if event.is_persistent() {
            self.last_change.fetch_max(id, Ordering::Relaxed);
        }
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        // No subscribers is not an error: events are fire-and-forget.
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            backlog.extend(buffer.iter().filter(|item| item.id > since).cloned());
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.back().map(|event| event.id)
    }

    /// Identifier of the last event that changed persisted state, if any.
    #[must_use]
    pub fn last_change_id(&self) -> Option<EventId> {
        match self.last_change.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

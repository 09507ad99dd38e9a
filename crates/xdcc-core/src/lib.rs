#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Protocol core of the XDCC client: chat classification and the
//! network/channel/bot/packet state machine.
//!
//! # Design
//! - [`Classifier`] turns one chat line into at most one [`ProtocolEvent`].
//! - [`Tracker`] owns the entity arena and answers every event with a list of
//!   [`Intent`]s; the caller performs the I/O.
//! - Entities reference each other by index ([`ChannelId`], [`BotId`],
//!   [`PacketId`]) so the tree serialises as flat vectors.

pub mod address;
pub mod classifier;
pub mod error;
pub mod intent;
pub mod message;
pub mod model;
pub mod outcome;
pub mod resume;
pub mod tracker;
pub mod units;

pub use classifier::{Classifier, ClosingNotice, DccOffer, ProtocolEvent, SlotReport};
pub use error::{CoreError, CoreResult};
pub use intent::{Intent, TransferRequest};
pub use message::{ChatKind, ChatLine, IrcMessage, OutboundLine};
pub use model::{Bot, BotId, Capacity, Channel, ChannelId, FileKey, Network, Packet, PacketId};
pub use outcome::TransferOutcome;
pub use resume::{ResumeCatalog, ResumeDecision};
pub use tracker::{Tracker, TrackerSettings};
pub use xdcc_events::BotState;

//! Follow-up actions the tracker asks its owner to carry out.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use crate::message::OutboundLine;
use crate::model::{BotId, FileKey, PacketId};

/// A negotiated transfer ready to be streamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub packet: PacketId,
    pub bot: String,
    pub peer: Ipv4Addr,
    pub port: u16,
    /// First byte the bot will send.
    pub offset: u64,
    pub file: FileKey,
}

impl TransferRequest {
    /// Socket address of the bot's listener.
    #[must_use]
    pub const fn endpoint(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.peer, self.port)
    }
}

/// Side effect requested by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Write a line to the server.
    Send(OutboundLine),
    /// Call [`crate::Tracker::request_next`] for this bot after `delay`.
    ScheduleRequest { bot: BotId, delay: Duration },
    /// Open a download session.
    StartTransfer(TransferRequest),
    /// Stop the session streaming this packet.
    CancelTransfer { packet: PacketId, remove_file: bool },
    /// Join a channel again after a forced part.
    Rejoin { channel: String, delay: Duration },
}

//! Statistics counters reported by the tracker and transfer engine.
//!
//! # Design
//! - Counters are named by a closed enum so sinks can map them to fixed collectors.
//! - The sink is passed in at construction; there is no process-wide registry.

use serde::{Deserialize, Serialize};

/// Counters incremented while talking to bots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    /// A peer socket was opened.
    BotConnectsOk,
    /// A bot offered an unusable endpoint, refused the socket, or sent nothing.
    BotConnectsFailed,
    /// A packet reached its announced size.
    PacketsCompleted,
    /// A transfer stopped short of the announced size.
    PacketsIncomplete,
    /// A transfer exceeded the announced size.
    PacketsBroken,
    /// Resumed bytes did not match the stored reference window.
    FileMismatches,
    /// Payload bytes written to storage.
    BytesReceived,
    /// Packet requests sent to bots.
    PacketsRequested,
    /// Bot chatter no pattern recognised.
    UnparsedLines,
}

impl Statistic {
    /// Every counter, in display order.
    pub const ALL: [Self; 9] = [
        Self::BotConnectsOk,
        Self::BotConnectsFailed,
        Self::PacketsCompleted,
        Self::PacketsIncomplete,
        Self::PacketsBroken,
        Self::FileMismatches,
        Self::BytesReceived,
        Self::PacketsRequested,
        Self::UnparsedLines,
    ];

    /// Stable label used for metric names and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BotConnectsOk => "bot_connects_ok",
            Self::BotConnectsFailed => "bot_connects_failed",
            Self::PacketsCompleted => "packets_completed",
            Self::PacketsIncomplete => "packets_incomplete",
            Self::PacketsBroken => "packets_broken",
            Self::FileMismatches => "file_mismatches",
            Self::BytesReceived => "bytes_received",
            Self::PacketsRequested => "packets_requested",
            Self::UnparsedLines => "unparsed_lines",
        }
    }
}

/// Receiver for statistic increments.
pub trait StatisticsSink: Send + Sync {
    /// Add `amount` to the named counter.
    fn increment(&self, statistic: Statistic, amount: u64);

    /// Report the number of transfers currently streaming.
    fn set_active_sessions(&self, _count: usize) {}
}

/// Sink that discards every increment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatistics;

impl StatisticsSink for NoopStatistics {
    fn increment(&self, _statistic: Statistic, _amount: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn labels_are_unique() {
        let labels: HashSet<_> = Statistic::ALL.iter().map(|stat| stat.as_str()).collect();
        assert_eq!(labels.len(), Statistic::ALL.len());
    }

    #[test]
    fn noop_sink_accepts_everything() {
        let sink = NoopStatistics;
        sink.increment(Statistic::BytesReceived, 42);
        sink.set_active_sessions(3);
    }
}

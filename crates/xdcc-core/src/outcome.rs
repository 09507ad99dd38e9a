//! Terminal outcomes of a download session.

use serde::{Deserialize, Serialize};
use xdcc_events::{NotificationKind, Statistic};

/// How a download session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    /// The announced size was reached exactly.
    Completed,
    /// The stream ended early; the partial file is kept for resuming.
    Incomplete,
    /// More bytes than announced arrived; the stored data was discarded.
    SizeMismatch,
    /// The socket never opened or no byte arrived.
    ConnectFailed,
    /// The packet was disabled while receiving; the partial file was removed.
    Disabled,
    /// Resumed bytes did not match the stored reference window.
    RollbackMismatch,
}

impl TransferOutcome {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::SizeMismatch => "size_mismatch",
            Self::ConnectFailed => "connect_failed",
            Self::Disabled => "disabled",
            Self::RollbackMismatch => "rollback_mismatch",
        }
    }

    /// Whether the stored data must be deleted.
    #[must_use]
    pub const fn removes_storage(self) -> bool {
        matches!(self, Self::SizeMismatch | Self::Disabled)
    }

    /// Whether the packet must not be requested again automatically.
    #[must_use]
    pub const fn disables_packet(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::ConnectFailed | Self::Disabled | Self::RollbackMismatch
        )
    }

    /// Notification raised when the session ends this way.
    #[must_use]
    pub const fn notification(self) -> Option<NotificationKind> {
        match self {
            Self::Completed => Some(NotificationKind::PacketCompleted),
            Self::Incomplete => Some(NotificationKind::PacketIncomplete),
            Self::SizeMismatch => Some(NotificationKind::PacketBroken),
            Self::ConnectFailed => Some(NotificationKind::BotConnectFailed),
            Self::RollbackMismatch => Some(NotificationKind::PacketFileMismatch),
            Self::Disabled => None,
        }
    }

    /// Counter incremented when the session ends this way.
    #[must_use]
    pub const fn statistic(self) -> Option<Statistic> {
        match self {
            Self::Completed => Some(Statistic::PacketsCompleted),
            Self::Incomplete => Some(Statistic::PacketsIncomplete),
            Self::SizeMismatch => Some(Statistic::PacketsBroken),
            Self::ConnectFailed => Some(Statistic::BotConnectsFailed),
            Self::RollbackMismatch => Some(Statistic::FileMismatches),
            Self::Disabled => None,
        }
    }
}

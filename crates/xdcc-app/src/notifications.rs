//! Background subscriber that surfaces user-facing notifications in the log.

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use xdcc_events::{Event, EventBus, NotificationKind};

/// Subscribe to `events` and log every notification until the bus closes.
///
/// The subscription is taken before the task starts, so nothing published
/// after this call is missed.
pub(crate) fn spawn_notification_log(events: &EventBus) -> JoinHandle<()> {
    let mut stream = events.subscribe(None);
    tokio::spawn(async move {
        while let Some(envelope) = stream.next().await {
            log_event(&envelope.event);
        }
        debug!("event bus closed; notification log stopped");
    })
}

/// Log `event` if it is meant for the user. Returns whether it was.
fn log_event(event: &Event) -> bool {
    match event {
        Event::Notification { kind, subject } => {
            match kind {
                NotificationKind::BotConnectFailed
                | NotificationKind::PacketBroken
                | NotificationKind::PacketFileMismatch => {
                    warn!(kind = kind.as_str(), subject = %subject, "notification");
                }
                NotificationKind::BotConnected
                | NotificationKind::PacketCompleted
                | NotificationKind::PacketIncomplete => {
                    info!(kind = kind.as_str(), subject = %subject, "notification");
                }
            }
            true
        }
        Event::UnparsedLine { bot, line } => {
            info!(bot = %bot, line = %line, "unparsed bot line");
            true
        }
        _ => false,
    }
}

//! Cooperative cancellation for download sessions.

use std::sync::Arc;

use tokio::sync::watch;

/// State of a session's cancellation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionSignal {
    /// Keep streaming.
    #[default]
    Running,
    /// The packet was disabled; the partial file must go.
    Disabled,
    /// The watchdog saw no data for too long.
    Stalled,
    /// The session was cancelled (bot closed on us, shutdown).
    Aborted,
}

impl SessionSignal {
    /// Stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Disabled => "disabled",
            Self::Stalled => "stalled",
            Self::Aborted => "aborted",
        }
    }
}

/// Shared handle raising a session's signal. The first non-running signal
/// wins; later ones are ignored.
#[derive(Debug, Clone)]
pub struct SessionControl {
    sender: Arc<watch::Sender<SessionSignal>>,
}

impl SessionControl {
    /// Fresh control in the running state.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(SessionSignal::Running);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Raise `signal` unless another one was raised first. Returns whether
    /// this call changed the state.
    pub fn raise(&self, signal: SessionSignal) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == SessionSignal::Running && signal != SessionSignal::Running {
                *current = signal;
                true
            } else {
                false
            }
        })
    }

    /// Current signal.
    #[must_use]
    pub fn current(&self) -> SessionSignal {
        *self.sender.borrow()
    }

    /// Receiver that wakes when the signal is raised.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSignal> {
        self.sender.subscribe()
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_signal_wins() {
        let control = SessionControl::new();
        assert!(control.raise(SessionSignal::Disabled));
        assert!(!control.raise(SessionSignal::Stalled));
        assert_eq!(control.current(), SessionSignal::Disabled);
    }

    #[tokio::test]
    async fn subscribers_observe_the_raise() {
        let control = SessionControl::new();
        let mut receiver = control.subscribe();
        control.raise(SessionSignal::Aborted);
        receiver.changed().await.expect("sender alive");
        assert_eq!(*receiver.borrow(), SessionSignal::Aborted);
    }
}

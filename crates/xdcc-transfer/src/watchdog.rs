//! Stall detection for a running session.
//!
//! # Design
//! - The session touches an [`ActivityClock`] for every chunk; session start
//!   counts as activity.
//! - The watchdog polls the clock and raises the stalled signal once, then exits.
//! - It also exits as soon as the session signal leaves `Running`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::warn;

use crate::signal::{SessionControl, SessionSignal};

/// Last-activity timestamp shared between a session and its watchdog.
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_millis: AtomicU64,
}

impl ActivityClock {
    /// Clock whose last activity is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_millis: AtomicU64::new(0),
        }
    }

    /// Record activity now.
    pub fn touch(&self) {
        self.last_millis.store(self.elapsed_millis(), Ordering::Relaxed);
    }

    /// Time since the last recorded activity.
    #[must_use]
    pub fn idle(&self) -> Duration {
        let last = self.last_millis.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_millis().saturating_sub(last))
    }

    fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the watchdog. It raises [`SessionSignal::Stalled`] when the clock has
/// been idle for longer than `limit`.
pub fn spawn_watchdog(
    clock: Arc<ActivityClock>,
    control: SessionControl,
    poll: Duration,
    limit: Duration,
) -> JoinHandle<()> {
    let mut signal = control.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *signal.borrow() != SessionSignal::Running {
                        return;
                    }
                    let idle = clock.idle();
                    if idle > limit {
                        warn!(idle_ms = idle.as_millis(), "transfer stalled");
                        control.raise(SessionSignal::Stalled);
                        return;
                    }
                }
                changed = signal.changed() => {
                    if changed.is_err() || *signal.borrow() != SessionSignal::Running {
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_clock_raises_stall_once() {
        let clock = Arc::new(ActivityClock::new());
        let control = SessionControl::new();
        let handle = spawn_watchdog(
            clock.clone(),
            control.clone(),
            Duration::from_millis(500),
            Duration::from_secs(4),
        );
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(control.current(), SessionSignal::Running);

        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.await.expect("watchdog task");
        assert_eq!(control.current(), SessionSignal::Stalled);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_keeps_session_running() {
        let clock = Arc::new(ActivityClock::new());
        let control = SessionControl::new();
        let handle = spawn_watchdog(
            clock.clone(),
            control.clone(),
            Duration::from_millis(500),
            Duration::from_secs(4),
        );
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            clock.touch();
        }
        assert_eq!(control.current(), SessionSignal::Running);

        control.raise(SessionSignal::Aborted);
        handle.await.expect("watchdog task");
        assert_eq!(control.current(), SessionSignal::Aborted);
    }
}

//! One DCC download, from socket connect to terminal outcome.
//!
//! # Design
//! - Each session is its own task holding the file lease, the socket and a
//!   watchdog; all three are released on every exit path.
//! - Resumed sessions buffer the stream head until it covers the stored
//!   reference window. Nothing is written before that window matches.
//! - Cancellation is the shared [`SessionControl`]; the read loop selects on it
//!   next to the socket.
//! - The outcome is reported over the update channel and mirrored into
//!   statistics and notifications. Tracker state is never touched here.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;
use xdcc_core::{FileKey, PacketId, TransferOutcome, TransferRequest};
use xdcc_events::{Event, EventBus, NotificationKind, Statistic, StatisticsSink};

use crate::error::{TransferError, TransferResult};
use crate::rollback::{RollbackGuard, RollbackProgress};
use crate::signal::{SessionControl, SessionSignal};
use crate::store::{FileLease, FileStore};
use crate::throughput::Throughput;
use crate::watchdog::{ActivityClock, spawn_watchdog};

/// Grace period for surplus bytes once the announced size was reached.
const OVERRUN_GRACE: Duration = Duration::from_millis(250);

/// Socket and sampling parameters of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Bound on opening the peer socket.
    pub connect_timeout: Duration,
    /// A read that yields nothing for this long ends the stream.
    pub read_timeout: Duration,
    /// Bytes requested per socket read.
    pub chunk_size: usize,
    /// Length of the reference window compared on resume.
    pub rollback_check_bytes: u64,
    /// Throughput sampling interval.
    pub sample_interval: Duration,
    /// The watchdog fires after `stall_multiplier * sample_interval` of silence.
    pub stall_multiplier: u32,
    /// How often the watchdog looks at the activity clock.
    pub watchdog_poll: Duration,
}

impl SessionSettings {
    /// Idle time after which the watchdog stops the session.
    #[must_use]
    pub fn stall_limit(&self) -> Duration {
        self.sample_interval.saturating_mul(self.stall_multiplier)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            chunk_size: 100 * 1024,
            rollback_check_bytes: 10 * 1024,
            sample_interval: Duration::from_secs(1),
            stall_multiplier: 4,
            watchdog_poll: Duration::from_millis(500),
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub packet: PacketId,
    pub bot: String,
    pub file: FileKey,
    pub outcome: TransferOutcome,
    /// Offset the session started at.
    pub start: u64,
    /// Bytes read from the peer during this session.
    pub received: u64,
}

/// Lifecycle messages sent to the session owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// The peer socket is open and the file lease is held.
    Connected {
        session_id: Uuid,
        packet: PacketId,
        file: FileKey,
    },
    /// The session reached a terminal outcome.
    Finished(SessionReport),
}

/// Collaborators shared by every session of a network.
#[derive(Clone)]
pub struct SessionContext {
    pub store: FileStore,
    pub events: EventBus,
    pub statistics: Arc<dyn StatisticsSink>,
    pub updates: mpsc::Sender<SessionUpdate>,
    pub settings: SessionSettings,
}

/// Owner-side handle of a running session.
pub struct SessionHandle {
    id: Uuid,
    packet: PacketId,
    control: SessionControl,
    task: JoinHandle<SessionReport>,
}

impl SessionHandle {
    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Packet being downloaded.
    #[must_use]
    pub const fn packet(&self) -> PacketId {
        self.packet
    }

    /// Cancellation handle.
    #[must_use]
    pub const fn control(&self) -> &SessionControl {
        &self.control
    }

    /// Stop the session. With `remove_file` the partial data is discarded,
    /// otherwise it is kept for a later resume.
    pub fn cancel(&self, remove_file: bool) -> bool {
        let signal = if remove_file {
            SessionSignal::Disabled
        } else {
            SessionSignal::Aborted
        };
        self.control.raise(signal)
    }

    /// Wait for the session task. `None` if the task panicked.
    pub async fn join(self) -> Option<SessionReport> {
        match self.task.await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(error = %err, session_id = %self.id, "download session task failed");
                None
            }
        }
    }
}

/// Start a download session for a negotiated transfer.
#[must_use]
pub fn spawn_session(context: SessionContext, request: TransferRequest) -> SessionHandle {
    let id = Uuid::new_v4();
    let control = SessionControl::new();
    let packet = request.packet;
    let span = info_span!(
        "session",
        session_id = %id,
        bot = %request.bot,
        file = %request.file.name
    );
    let session = DownloadSession {
        id,
        context,
        request,
        control: control.clone(),
    };
    let task = tokio::spawn(session.run().instrument(span));
    SessionHandle {
        id,
        packet,
        control,
        task,
    }
}

/// Terminal outcome for a stream that ended normally or was stopped.
///
/// An aborted session never counts as a connect failure: the owner stopped
/// it, the peer did not fail.
#[must_use]
pub fn decide_outcome(signal: SessionSignal, start: u64, received: u64, expected: u64) -> TransferOutcome {
    if signal == SessionSignal::Disabled {
        return TransferOutcome::Disabled;
    }
    let total = start.saturating_add(received);
    if total == expected {
        TransferOutcome::Completed
    } else if total > expected {
        TransferOutcome::SizeMismatch
    } else if received == 0 && signal != SessionSignal::Aborted {
        TransferOutcome::ConnectFailed
    } else {
        TransferOutcome::Incomplete
    }
}

struct DownloadSession {
    id: Uuid,
    context: SessionContext,
    request: TransferRequest,
    control: SessionControl,
}

struct StreamState {
    received: u64,
    mismatch: bool,
}

impl DownloadSession {
    async fn run(self) -> SessionReport {
        let mut report = SessionReport {
            session_id: self.id,
            packet: self.request.packet,
            bot: self.request.bot.clone(),
            file: self.request.file.clone(),
            outcome: TransferOutcome::ConnectFailed,
            start: self.request.offset,
            received: 0,
        };

        let mut lease = match self.context.store.resolve(&self.request.file) {
            Ok(lease) => lease,
            Err(err) => {
                warn!(error = %err, "no file to download into");
                return self.finish(report, None).await;
            }
        };

        let mut stream = match self.connect().await {
            Ok(stream) => stream,
            Err(err) => {
                let signal = self.control.current();
                if signal == SessionSignal::Running {
                    warn!(error = %err, "peer connection failed");
                } else {
                    info!(signal = signal.as_str(), "session stopped before connecting");
                    report.outcome =
                        decide_outcome(signal, report.start, 0, self.request.file.size);
                }
                return self.finish(report, Some(lease)).await;
            }
        };
        info!(endpoint = %self.request.endpoint(), offset = self.request.offset, "peer connected");
        self.context.statistics.increment(Statistic::BotConnectsOk, 1);
        self.context.events.publish(Event::Notification {
            kind: NotificationKind::BotConnected,
            subject: self.request.bot.clone(),
        });
        self.send(SessionUpdate::Connected {
            session_id: self.id,
            packet: self.request.packet,
            file: self.request.file.clone(),
        })
        .await;

        let clock = Arc::new(ActivityClock::new());
        let watchdog = spawn_watchdog(
            clock.clone(),
            self.control.clone(),
            self.context.settings.watchdog_poll,
            self.context.settings.stall_limit(),
        );
        let mut state = StreamState {
            received: 0,
            mismatch: false,
        };
        match self
            .stream(&mut stream, &mut lease, &clock, &mut state)
            .await
        {
            Ok(()) | Err(TransferError::Cancelled) => {}
            Err(err) => warn!(error = %err, "stream aborted by storage failure"),
        }
        watchdog.abort();
        drop(stream);

        report.received = state.received;
        report.outcome = if state.mismatch {
            TransferOutcome::RollbackMismatch
        } else {
            decide_outcome(
                self.control.current(),
                report.start,
                report.received,
                self.request.file.size,
            )
        };
        self.finish(report, Some(lease)).await
    }

    async fn connect(&self) -> TransferResult<TcpStream> {
        let endpoint = self.request.endpoint();
        self.unless_stopped(async {
            match timeout(
                self.context.settings.connect_timeout,
                TcpStream::connect(endpoint),
            )
            .await
            {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(source)) => Err(TransferError::Connect { endpoint, source }),
                Err(_) => Err(TransferError::ConnectTimeout { endpoint }),
            }
        })
        .await
    }

    /// Run `work` unless the control signal is raised first.
    async fn unless_stopped<T>(
        &self,
        work: impl Future<Output = TransferResult<T>>,
    ) -> TransferResult<T> {
        tokio::select! {
            biased;
            () = raised(self.control.subscribe()) => Err(TransferError::Cancelled),
            result = work => result,
        }
    }

    async fn stream(
        &self,
        stream: &mut TcpStream,
        lease: &mut FileLease,
        clock: &ActivityClock,
        state: &mut StreamState,
    ) -> TransferResult<()> {
        let settings = &self.context.settings;
        let start = self.request.offset;
        let expected = self.request.file.size;

        let mut guard = if start > 0 {
            if start > lease.existing_size() {
                warn!(
                    offset = start,
                    stored = lease.existing_size(),
                    "resume offset lies beyond the stored data"
                );
                state.mismatch = true;
                return Ok(());
            }
            let window = settings
                .rollback_check_bytes
                .min(expected.saturating_sub(start));
            let reference = self
                .unless_stopped(lease.read_window(start, window))
                .await?;
            if (reference.len() as u64) < window {
                warn!(
                    offset = start,
                    window,
                    stored = reference.len(),
                    "stored data does not cover the reference window"
                );
                state.mismatch = true;
                return Ok(());
            }
            debug!(offset = start, window, "verifying resume overlap");
            Some(RollbackGuard::new(reference))
        } else {
            lease.begin_at(0).await?;
            None
        };

        let mut signal = self.control.subscribe();
        let mut throughput = Throughput::new(settings.sample_interval, Instant::now());
        let mut buffer = vec![0_u8; settings.chunk_size.max(1)];

        loop {
            let current = *signal.borrow();
            if current != SessionSignal::Running {
                info!(signal = current.as_str(), "session stopped");
                return Ok(());
            }
            if start.saturating_add(state.received) >= expected {
                state.received += self.read_overrun(stream, &mut buffer).await;
                return Ok(());
            }

            let Some(read) = self.read_chunk(stream, &mut buffer, &mut signal).await else {
                continue;
            };
            if read == 0 {
                return Ok(());
            }
            clock.touch();
            state.received += read as u64;
            self.context
                .statistics
                .increment(Statistic::BytesReceived, read as u64);
            let chunk = &buffer[..read];

            match guard.as_mut().map(|guard| guard.feed(chunk)) {
                None => lease.append(chunk).await?,
                Some(RollbackProgress::Pending) => continue,
                Some(RollbackProgress::Mismatch) => {
                    warn!(offset = start, "resumed data does not match stored file");
                    state.mismatch = true;
                    return Ok(());
                }
                Some(RollbackProgress::Verified(head)) => {
                    debug!(offset = start, "resume overlap verified");
                    guard = None;
                    lease.begin_at(start).await?;
                    lease.append(&head).await?;
                }
            }

            if let Some(speed) = throughput.record(read as u64, Instant::now()) {
                lease.set_speed(speed);
                self.context.events.publish(Event::FileProgress {
                    session_id: self.id,
                    file: self.request.file.name.clone(),
                    current_size: lease.current_size(),
                    size: expected,
                    speed,
                });
            }
        }
    }

    /// Read one chunk. `Some(0)` ends the stream; `None` means the signal
    /// changed and the loop should look at it.
    async fn read_chunk(
        &self,
        stream: &mut TcpStream,
        buffer: &mut [u8],
        signal: &mut watch::Receiver<SessionSignal>,
    ) -> Option<usize> {
        let read_timeout = self.context.settings.read_timeout;
        tokio::select! {
            biased;
            changed = signal.changed() => {
                if changed.is_err() {
                    return Some(0);
                }
                None
            }
            read = timeout(read_timeout, stream.read(buffer)) => match read {
                Ok(Ok(read)) => {
                    if read == 0 {
                        debug!("peer closed the stream");
                    }
                    Some(read)
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "peer read failed");
                    Some(0)
                }
                Err(_) => {
                    warn!(timeout_ms = read_timeout.as_millis(), "peer sent nothing");
                    Some(0)
                }
            },
        }
    }

    async fn read_overrun(&self, stream: &mut TcpStream, buffer: &mut [u8]) -> u64 {
        match timeout(OVERRUN_GRACE, stream.read(buffer)).await {
            Ok(Ok(extra)) if extra > 0 => {
                warn!(extra, "peer sent more than the announced size");
                extra as u64
            }
            _ => 0,
        }
    }

    async fn finish(&self, report: SessionReport, lease: Option<FileLease>) -> SessionReport {
        let outcome = report.outcome;
        if let Some(lease) = lease {
            let stored = match outcome {
                TransferOutcome::Completed => lease.complete().await.map(|_| ()),
                TransferOutcome::SizeMismatch | TransferOutcome::Disabled => lease.remove().await,
                _ => Ok(()),
            };
            if let Err(err) = stored {
                warn!(error = %err, outcome = outcome.as_str(), "finalising stored file failed");
            }
        }

        if let Some(statistic) = outcome.statistic() {
            self.context.statistics.increment(statistic, 1);
        }
        if let Some(kind) = outcome.notification() {
            let subject = if kind == NotificationKind::BotConnectFailed {
                self.request.bot.clone()
            } else {
                self.request.file.name.clone()
            };
            self.context
                .events
                .publish(Event::Notification { kind, subject });
        }
        info!(
            outcome = outcome.as_str(),
            start = report.start,
            received = report.received,
            "download session finished"
        );
        self.send(SessionUpdate::Finished(report.clone())).await;
        report
    }

    async fn send(&self, update: SessionUpdate) {
        if self.context.updates.send(update).await.is_err() {
            debug!("session owner is gone");
        }
    }
}

/// Resolves once the signal leaves `Running`.
async fn raised(mut signal: watch::Receiver<SessionSignal>) {
    loop {
        if *signal.borrow_and_update() != SessionSignal::Running {
            return;
        }
        if signal.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

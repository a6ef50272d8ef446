//! Connection manager.
//!
//! The manager owns at most one live [`TransportSession`]. Accepting a new session tears the
//! previous one down first: its cancellation scope is cancelled, its socket is closed, and its
//! loops are awaited (for a bounded grace period) before the new session is installed.
//!
//! Each live session runs two loops under one [`CancellationToken`]:
//!
//! ```text
//!                 ┌──────────────┐  frames   ┌────────────┐
//!  send(frame) ──▶│ bounded queue│──────────▶│ send loop  │──▶ socket (+ ping every interval)
//!                 └──────────────┘           └────────────┘
//!                                            ┌────────────┐
//!  FrameHandler ◀─────────────────────────── │receive loop│◀── socket (read deadline)
//!                                            └────────────┘
//! ```
//!
//! Whichever loop exits first cancels the scope; the session is reported closed only after both
//! loops have finished.
//!
//! The outbound queue belongs to one session. Frames still queued when that session ends are
//! discarded with it and never reach a later session.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tether_core::{TransportError, TransportResult};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::session::{Frame, FrameSink, FrameStream, SessionId, TransportSession};

// =============================================================================
// Public types
// =============================================================================

/// Receives inbound payloads from the live session.
///
/// Called from the receive loop, so implementations must not block.
pub trait FrameHandler: Send + Sync + 'static {
    /// One inbound text or binary payload.
    fn on_frame(&self, session: SessionId, payload: &[u8]);

    /// The session has fully shut down.
    fn on_session_closed(&self, session: SessionId, reason: &CloseReason) {
        let _ = (session, reason);
    }
}

/// Why a session ended.
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// A newer session was accepted.
    Replaced,
    /// The manager was closed explicitly.
    Shutdown,
    /// The remote end closed the connection.
    PeerClosed,
    /// Nothing arrived within the read deadline.
    ReadTimeout,
    /// A read or write failed.
    Failed(TransportError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replaced => f.write_str("replaced"),
            Self::Shutdown => f.write_str("shutdown"),
            Self::PeerClosed => f.write_str("peer closed"),
            Self::ReadTimeout => f.write_str("read timeout"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Connection manager tuning.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Capacity of the outbound frame queue.
    pub queue_capacity: usize,
    /// Interval between ping frames.
    pub heartbeat_interval: Duration,
    /// Maximum silence on the receive side before the session is dropped.
    pub read_timeout: Duration,
    /// Maximum time a single write may take.
    pub write_timeout: Duration,
    /// How long a replaced session's loops get to exit before they are aborted.
    pub replace_grace: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            heartbeat_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            replace_grace: Duration::from_millis(500),
        }
    }
}

/// Counters since the manager was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub sessions_accepted: u64,
    pub sessions_replaced: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub heartbeats_sent: u64,
}

// =============================================================================
// Manager
// =============================================================================

/// Owns the single live session. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ManagerConfig,
    /// Serializes accept/close so only one swap is in flight.
    swap: AsyncMutex<()>,
    current: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
    counters: Counters,
}

struct ActiveSession {
    shared: Arc<SessionShared>,
    outbound: mpsc::Sender<Frame>,
    handler: Arc<dyn FrameHandler>,
    supervisor: JoinHandle<()>,
}

#[derive(Default)]
struct Counters {
    sessions_accepted: AtomicU64,
    sessions_replaced: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    heartbeats_sent: AtomicU64,
}

impl ConnectionManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                swap: AsyncMutex::new(()),
                current: Mutex::new(None),
                next_id: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Installs `transport` as the live session, tearing down any previous one first.
    pub async fn accept(
        &self,
        transport: TransportSession,
        handler: Arc<dyn FrameHandler>,
    ) -> SessionId {
        let _swap = self.inner.swap.lock().await;

        let previous = self.inner.current.lock().take();
        if let Some(previous) = previous {
            info!(session = %previous.shared.id, "Replacing live session");
            self.inner
                .counters
                .sessions_replaced
                .fetch_add(1, Ordering::Relaxed);
            self.teardown(previous, CloseReason::Replaced).await;
        }

        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let shared = Arc::new(SessionShared::new(id));
        let (outbound, queue) = mpsc::channel(self.inner.config.queue_capacity.max(1));
        info!(session = %id, peer = transport.label(), "Session accepted");

        let supervisor = tokio::spawn(supervise(
            self.inner.clone(),
            shared.clone(),
            transport,
            queue,
            handler.clone(),
        ));
        *self.inner.current.lock() = Some(ActiveSession {
            shared,
            outbound,
            handler,
            supervisor,
        });
        self.inner
            .counters
            .sessions_accepted
            .fetch_add(1, Ordering::Relaxed);

        id
    }

    /// Enqueues a frame for the live session without waiting for queue space.
    ///
    /// Returns the session whose queue took the frame.
    pub fn send(&self, frame: Frame) -> TransportResult<SessionId> {
        let current = self.inner.current.lock();
        let Some(session) = current.as_ref().filter(|s| s.shared.is_live()) else {
            return Err(TransportError::NotConnected);
        };
        match session.outbound.try_send(frame) {
            Ok(()) => Ok(session.shared.id),
            Err(TrySendError::Full(_)) => {
                let capacity = self.inner.config.queue_capacity;
                warn!(session = %session.shared.id, capacity, "Outbound queue is full");
                Err(TransportError::QueueFull { capacity })
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::NotConnected),
        }
    }

    /// Whether a session is live and not shutting down.
    pub fn is_connected(&self) -> bool {
        self.session_id().is_some()
    }

    /// Identity of the live session.
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner
            .current
            .lock()
            .as_ref()
            .filter(|s| s.shared.is_live())
            .map(|s| s.shared.id)
    }

    /// Tears down the live session, if any.
    pub async fn close(&self) {
        let _swap = self.inner.swap.lock().await;
        let current = self.inner.current.lock().take();
        if let Some(session) = current {
            self.teardown(session, CloseReason::Shutdown).await;
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        let c = &self.inner.counters;
        ConnectionStats {
            sessions_accepted: c.sessions_accepted.load(Ordering::Relaxed),
            sessions_replaced: c.sessions_replaced.load(Ordering::Relaxed),
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            frames_received: c.frames_received.load(Ordering::Relaxed),
            heartbeats_sent: c.heartbeats_sent.load(Ordering::Relaxed),
        }
    }

    async fn teardown(&self, session: ActiveSession, reason: CloseReason) {
        let ActiveSession {
            shared,
            outbound,
            handler,
            mut supervisor,
        } = session;
        drop(outbound);
        let grace = self.inner.config.replace_grace;

        shared.shut(reason);
        if time::timeout(grace, &mut supervisor).await.is_err() {
            warn!(session = %shared.id, ?grace, "Session loops outlived the grace period, aborting");
            supervisor.abort();
            let _ = supervisor.await;
            shared.finish(handler.as_ref());
        }
    }
}

// =============================================================================
// Session state
// =============================================================================

struct SessionShared {
    id: SessionId,
    cancel: CancellationToken,
    alive: AtomicBool,
    sink_closed: AtomicBool,
    reported: AtomicBool,
    reason: OnceLock<CloseReason>,
}

impl SessionShared {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            cancel: CancellationToken::new(),
            alive: AtomicBool::new(true),
            sink_closed: AtomicBool::new(false),
            reported: AtomicBool::new(false),
            reason: OnceLock::new(),
        }
    }

    fn is_live(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    /// Records the first close reason and cancels the scope.
    fn shut(&self, reason: CloseReason) {
        let _ = self.reason.set(reason);
        self.cancel.cancel();
    }

    /// Closes the socket; later calls are no-ops.
    async fn close_sink(&self, sink: &mut FrameSink, deadline: Duration) {
        if self.sink_closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match time::timeout(deadline, sink.close()).await {
            Ok(Ok(())) => trace!(session = %self.id, "Socket closed"),
            Ok(Err(e)) => debug!(session = %self.id, error = %e, "Error while closing socket"),
            Err(_) => debug!(session = %self.id, "Socket close timed out"),
        }
    }

    /// Marks the session dead and notifies the handler exactly once.
    fn finish(&self, handler: &dyn FrameHandler) {
        self.alive.store(false, Ordering::Release);
        if self.reported.swap(true, Ordering::AcqRel) {
            return;
        }
        let reason = self
            .reason
            .get()
            .cloned()
            .unwrap_or(CloseReason::Shutdown);
        info!(session = %self.id, %reason, "Session closed");
        handler.on_session_closed(self.id, &reason);
    }
}

// =============================================================================
// Loops
// =============================================================================

async fn supervise(
    inner: Arc<Inner>,
    shared: Arc<SessionShared>,
    transport: TransportSession,
    queue: mpsc::Receiver<Frame>,
    handler: Arc<dyn FrameHandler>,
) {
    let (sink, stream) = transport.into_parts();

    // Dropping the set aborts both loops if this task is itself aborted.
    let mut loops = JoinSet::new();
    loops.spawn(send_loop(inner.clone(), shared.clone(), sink, queue));
    loops.spawn(receive_loop(inner, shared.clone(), stream, handler.clone()));

    while let Some(joined) = loops.join_next().await {
        match joined {
            Ok(Some(reason)) => shared.shut(reason),
            Ok(None) => shared.cancel.cancel(),
            Err(e) => shared.shut(CloseReason::Failed(TransportError::Io(format!(
                "session task failed: {e}"
            )))),
        }
    }

    shared.finish(handler.as_ref());
}

/// Returns `None` when stopped by cancellation, otherwise the reason the session must end.
async fn send_loop(
    inner: Arc<Inner>,
    shared: Arc<SessionShared>,
    mut sink: FrameSink,
    mut queue: mpsc::Receiver<Frame>,
) -> Option<CloseReason> {
    let config = &inner.config;
    let mut heartbeat = time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break None,
            frame = queue.recv() => {
                let Some(frame) = frame else { break None };
                if let Err(e) = write(&mut sink, frame, config.write_timeout).await {
                    warn!(session = %shared.id, error = %e, "Write failed");
                    break Some(CloseReason::Failed(e));
                }
                inner.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            _ = heartbeat.tick() => {
                if let Err(e) = write(&mut sink, Frame::Ping(Vec::new()), config.write_timeout).await {
                    warn!(session = %shared.id, error = %e, "Heartbeat failed");
                    break Some(CloseReason::Failed(e));
                }
                inner.counters.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                trace!(session = %shared.id, "Heartbeat sent");
            }
        }
    };

    // Stop accepting frames before the socket is closed, which may take a while.
    if let Some(reason) = &exit {
        shared.shut(reason.clone());
    }
    queue.close();
    let mut stale = 0usize;
    while queue.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        debug!(session = %shared.id, stale, "Discarded frames queued for a closing session");
    }
    drop(queue);

    shared.close_sink(&mut sink, config.write_timeout).await;
    exit
}

async fn receive_loop(
    inner: Arc<Inner>,
    shared: Arc<SessionShared>,
    mut stream: FrameStream,
    handler: Arc<dyn FrameHandler>,
) -> Option<CloseReason> {
    let read_timeout = inner.config.read_timeout;

    loop {
        let next = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => return None,
            next = time::timeout(read_timeout, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                warn!(session = %shared.id, ?read_timeout, "No frame within read deadline");
                return Some(CloseReason::ReadTimeout);
            }
            Ok(None) => return Some(CloseReason::PeerClosed),
            Ok(Some(Err(e))) => {
                warn!(session = %shared.id, error = %e, "Receive failed");
                return Some(CloseReason::Failed(e));
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match &frame {
            Frame::Text(_) | Frame::Binary(_) => {
                inner
                    .counters
                    .frames_received
                    .fetch_add(1, Ordering::Relaxed);
                if let Some(payload) = frame.payload() {
                    trace!(session = %shared.id, len = payload.len(), "Frame received");
                    handler.on_frame(shared.id, payload);
                }
            }
            Frame::Ping(_) | Frame::Pong(_) => trace!(session = %shared.id, "Control frame"),
            Frame::Close => {
                debug!(session = %shared.id, "Peer sent close frame");
                return Some(CloseReason::PeerClosed);
            }
        }
    }
}

async fn write(sink: &mut FrameSink, frame: Frame, deadline: Duration) -> TransportResult<()> {
    match time::timeout(deadline, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::WriteTimeout(deadline)),
    }
}

// =============================================================================
// Tests
// =============================================================================

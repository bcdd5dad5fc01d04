//! Non-blocking actuation channel to the remote renderer.
//!
//! Producers anywhere in the process call [`CommandSink::submit`] and never
//! wait on the network. A bounded [`OutboundQueue`] absorbs bursts: when it
//! is full the oldest command is evicted to admit the newest.
//!
//! A single sender task drains the queue over one persistent connection.
//! Delivery rules:
//!
//! - While the connection is down the sender does not consume commands, so
//!   everything queued during an outage is delivered in order once the
//!   connection is back (minus whatever the drop-oldest policy evicted).
//! - A command whose write fails mid-flight is **not** requeued. Delivery
//!   is at most once; a stale `SAY` or `ACTION` is worse than a missing one.
//! - A failed write schedules exactly one reconnect task. The reconnect
//!   task retries with a fixed delay until it succeeds or the channel is
//!   shut down.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use avatar_types::OutboundCommand;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ActuationConfig;

/// Anything that accepts outbound commands without blocking.
pub trait CommandSink: Send + Sync {
    /// Hand a command over for delivery. Must not block.
    fn submit(&self, command: OutboundCommand);
}

impl<T: CommandSink + ?Sized> CommandSink for Arc<T> {
    fn submit(&self, command: OutboundCommand) {
        (**self).submit(command);
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Bounded multi-producer FIFO with drop-oldest overflow.
#[derive(Debug)]
pub struct OutboundQueue {
    items: Mutex<VecDeque<OutboundCommand>>,
    capacity: usize,
    available: Notify,
    evicted: AtomicU64,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` commands (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            available: Notify::new(),
            evicted: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<OutboundCommand>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a command. Returns the command evicted to make room, if any.
    pub fn push(&self, command: OutboundCommand) -> Option<OutboundCommand> {
        let evicted = {
            let mut items = self.lock();
            let evicted = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(command);
            evicted
        };
        if let Some(old) = &evicted {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            debug!(cmd = old.tag(), "outbound queue full, evicted oldest command");
        }
        self.available.notify_one();
        evicted
    }

    /// Put a command back at the head. If the queue is full the command is
    /// itself the oldest and is evicted (returned).
    fn push_front(&self, command: OutboundCommand) -> Option<OutboundCommand> {
        let rejected = {
            let mut items = self.lock();
            if items.len() >= self.capacity {
                Some(command)
            } else {
                items.push_front(command);
                None
            }
        };
        if rejected.is_some() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.available.notify_one();
        }
        rejected
    }

    /// Take the oldest command.
    pub fn pop(&self) -> Option<OutboundCommand> {
        self.lock().pop_front()
    }

    /// Remove and return everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<OutboundCommand> {
        self.lock().drain(..).collect()
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of queued commands.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Commands evicted by the drop-oldest policy so far.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Resolve once at least one command is queued.
    pub async fn wait_for_item(&self) {
        while self.is_empty() {
            self.available.notified().await;
        }
    }
}

impl CommandSink for OutboundQueue {
    fn submit(&self, command: OutboundCommand) {
        self.push(command);
    }
}

// ---------------------------------------------------------------------------
// Connectors
// ---------------------------------------------------------------------------

/// Opens the byte stream to the remote renderer.
pub trait Connector: Send + Sync + 'static {
    /// Connection type.
    type Conn: AsyncWrite + Unpin + Send + 'static;

    /// Open a fresh connection.
    fn connect(&self) -> impl Future<Output = std::io::Result<Self::Conn>> + Send;

    /// Where this connector points, for logs.
    fn describe(&self) -> String;
}

/// Plain TCP connection to `host:port`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    /// Connect to the given `host:port`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Connect to the renderer configured in `config`.
    pub fn from_config(config: &ActuationConfig) -> Self {
        Self::new(config.address())
    }
}

impl Connector for TcpConnector {
    type Conn = TcpStream;

    fn connect(&self) -> impl Future<Output = std::io::Result<TcpStream>> + Send {
        let address = self.address.clone();
        async move {
            let stream = TcpStream::connect(&address).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
    }

    fn describe(&self) -> String {
        self.address.clone()
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Timing for the sender and reconnect tasks.
#[derive(Debug, Clone, Copy)]
pub struct ChannelTiming {
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Sender pause while disconnected.
    pub disconnected_backoff: Duration,
    /// Longest the sender waits for a command before re-checking state.
    pub idle_wait: Duration,
}

impl From<&ActuationConfig> for ChannelTiming {
    fn from(config: &ActuationConfig) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay(),
            disconnected_backoff: config.disconnected_backoff(),
            idle_wait: config.idle_wait(),
        }
    }
}

/// Counters exposed for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Commands written to the connection.
    pub sent: u64,
    /// Commands lost to a failed write.
    pub lost: u64,
    /// Commands evicted from a full queue.
    pub evicted: u64,
    /// Successful connections, including the first.
    pub connects: u64,
}

struct Shared<C: Connector> {
    queue: Arc<OutboundQueue>,
    connector: C,
    timing: ChannelTiming,
    writer: tokio::sync::Mutex<Option<C::Conn>>,
    connected: AtomicBool,
    reconnecting: AtomicBool,
    shutdown: AtomicBool,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    sent: AtomicU64,
    lost: AtomicU64,
    connects: AtomicU64,
}

/// Owner of the single connection to the remote renderer.
pub struct ActuationChannel<C: Connector> {
    shared: Arc<Shared<C>>,
    sender_task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> std::fmt::Debug for ActuationChannel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuationChannel")
            .field("target", &self.shared.connector.describe())
            .field("connected", &self.is_connected())
            .field("queued", &self.shared.queue.len())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ActuationChannel<C> {
    /// Spawn the sender task and the first connection attempt.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(connector: C, queue: Arc<OutboundQueue>, timing: ChannelTiming) -> Self {
        let shared = Arc::new(Shared {
            queue,
            connector,
            timing,
            writer: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            reconnect_task: Mutex::new(None),
            sent: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            connects: AtomicU64::new(0),
        });

        info!(
            target_addr = %shared.connector.describe(),
            capacity = shared.queue.capacity(),
            "starting actuation channel"
        );

        schedule_reconnect(&shared, Duration::ZERO);
        let sender = tokio::spawn(run_sender(Arc::clone(&shared)));

        Self {
            shared,
            sender_task: Mutex::new(Some(sender)),
        }
    }

    /// The queue producers write into.
    pub fn queue(&self) -> Arc<OutboundQueue> {
        Arc::clone(&self.shared.queue)
    }

    /// Enqueue a command. Never blocks.
    pub fn enqueue(&self, command: OutboundCommand) {
        self.shared.queue.push(command);
    }

    /// Enqueue a liveness probe if the connection is up.
    pub fn ping(&self) -> bool {
        if self.is_connected() {
            self.enqueue(OutboundCommand::ping());
            true
        } else {
            false
        }
    }

    /// Whether the connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Delivery counters.
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            sent: self.shared.sent.load(Ordering::Relaxed),
            lost: self.shared.lost.load(Ordering::Relaxed),
            evicted: self.shared.queue.evicted(),
            connects: self.shared.connects.load(Ordering::Relaxed),
        }
    }

    /// Stop the sender and any pending reconnect, then close the
    /// connection. Queued commands are left in the queue.
    pub async fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);

        if let Some(task) = self
            .sender_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        if let Some(task) = self
            .shared
            .reconnect_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        let conn = self.shared.writer.lock().await.take();
        if let Some(mut conn) = conn
            && let Err(e) = conn.shutdown().await
        {
            debug!(error = %e, "error closing actuation connection");
        }
        self.shared.connected.store(false, Ordering::Release);
        info!(
            queued = self.shared.queue.len(),
            "actuation channel shut down"
        );
    }
}

impl<C: Connector> CommandSink for ActuationChannel<C> {
    fn submit(&self, command: OutboundCommand) {
        self.enqueue(command);
    }
}

/// Spawn the reconnect task unless one is already running.
fn schedule_reconnect<C: Connector>(shared: &Arc<Shared<C>>, first_delay: Duration) -> bool {
    if shared.shutdown.load(Ordering::Acquire) {
        return false;
    }
    if shared
        .reconnecting
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return false;
    }

    let task = tokio::spawn(run_reconnect(Arc::clone(shared), first_delay));
    let previous = shared
        .reconnect_task
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(task);
    drop(previous);
    true
}

async fn run_reconnect<C: Connector>(shared: Arc<Shared<C>>, first_delay: Duration) {
    let mut delay = first_delay;
    let mut attempt: u64 = 0;
    loop {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay = shared.timing.reconnect_delay;
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        attempt = attempt.saturating_add(1);

        match shared.connector.connect().await {
            Ok(conn) => {
                *shared.writer.lock().await = Some(conn);
                shared.connects.fetch_add(1, Ordering::Relaxed);
                // Clear the guard before the sender can observe the
                // connection, so a write failing right away can schedule
                // the next reconnect.
                shared.reconnecting.store(false, Ordering::Release);
                shared.connected.store(true, Ordering::Release);
                info!(
                    target_addr = %shared.connector.describe(),
                    attempt = attempt,
                    queued = shared.queue.len(),
                    "actuation channel connected"
                );
                return;
            }
            Err(e) => {
                warn!(
                    target_addr = %shared.connector.describe(),
                    attempt = attempt,
                    error = %e,
                    retry_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "actuation connect failed"
                );
            }
        }
    }
    shared.reconnecting.store(false, Ordering::Release);
}

async fn run_sender<C: Connector>(shared: Arc<Shared<C>>) {
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        // Leave commands queued while the connection is down so they go
        // out in order once it is back.
        if !shared.connected.load(Ordering::Acquire) {
            tokio::time::sleep(shared.timing.disconnected_backoff).await;
            continue;
        }

        if tokio::time::timeout(shared.timing.idle_wait, shared.queue.wait_for_item())
            .await
            .is_err()
        {
            continue;
        }
        let Some(command) = shared.queue.pop() else {
            continue;
        };

        let mut writer = shared.writer.lock().await;
        let Some(conn) = writer.as_mut() else {
            drop(writer);
            if let Some(dropped) = shared.queue.push_front(command) {
                debug!(cmd = dropped.tag(), "queue refilled while offline, dropped oldest");
            }
            tokio::time::sleep(shared.timing.disconnected_backoff).await;
            continue;
        };

        let line = match command.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(cmd = command.tag(), error = %e, "failed to serialize command");
                continue;
            }
        };

        let written = match conn.write_all(&line).await {
            Ok(()) => conn.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                shared.sent.fetch_add(1, Ordering::Relaxed);
                debug!(cmd = command.tag(), "command sent");
            }
            Err(e) => {
                *writer = None;
                drop(writer);
                shared.connected.store(false, Ordering::Release);
                shared.lost.fetch_add(1, Ordering::Relaxed);
                warn!(
                    cmd = command.tag(),
                    error = %e,
                    "write failed, command dropped; reconnecting"
                );
                schedule_reconnect(&shared, shared.timing.reconnect_delay);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn say(n: usize) -> OutboundCommand {
        OutboundCommand::say(format!("line {n}"))
    }

    fn text(command: &OutboundCommand) -> String {
        match &command.kind {
            avatar_types::CommandKind::Say { text, .. } => text.clone(),
            other => format!("{other:?}"),
        }
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let queue = OutboundQueue::new(3);
        for n in 0..3 {
            assert!(queue.push(say(n)).is_none());
        }
        let evicted = queue.push(say(3)).unwrap();
        assert_eq!(text(&evicted), "line 0");
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.evicted(), 1);

        let rest: Vec<String> = queue.drain().iter().map(text).collect();
        assert_eq!(rest, ["line 1", "line 2", "line 3"]);
    }

    #[test]
    fn push_front_restores_head_or_drops_when_full() {
        let queue = OutboundQueue::new(2);
        queue.push(say(1));
        assert!(queue.push_front(say(0)).is_none());
        assert_eq!(text(&queue.pop().unwrap()), "line 0");

        queue.push(say(2));
        let dropped = queue.push_front(say(9)).unwrap();
        assert_eq!(text(&dropped), "line 9");
        assert_eq!(queue.evicted(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let queue = OutboundQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.submit(say(0));
        queue.submit(say(1));
        assert_eq!(queue.len(), 1);
        assert_eq!(text(&queue.pop().unwrap()), "line 1");
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn wait_for_item_wakes_on_push() {
        let queue = Arc::new(OutboundQueue::new(4));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.wait_for_item().await })
        };
        tokio::task::yield_now().await;
        queue.push(OutboundCommand::ping());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}

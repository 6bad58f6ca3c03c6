//! Retry-until-success delivery of queued messages.
//!
//! A [`DeliveryController`] owns a bounded queue and one worker task. The
//! caller enqueues without ever blocking; when the queue is full the oldest
//! message is dropped so that fresh telemetry wins over a stale backlog.
//!
//! The worker delivers messages strictly in order. When a delivery fails it
//! raises the controller's "unreachable" flag, waits on the transport's
//! lightweight probe until the endpoint answers again, then retries the
//! same message. A message is never skipped while the controller runs.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped --start()--> Running --stop()--> Draining --> Stopped
//! ```
//!
//! [`DeliveryController::stop`] cancels the retry loop, gives every queued
//! message one more attempt bounded by the drain timeout, then joins the
//! worker.
//!
//! The controller is generic over a [`Transport`]; the daemon instantiates
//! it for the HTTP backend and for the mesh relay.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use blescan_core::RetryConfig;

use crate::error::DeliveryError;
use crate::state::{HealthFlag, SharedHealth};

/// Something a [`DeliveryController`] can hand messages to.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Message: Send + Sync + 'static;

    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Deliver one message. `Ok` only once the endpoint accepted it.
    async fn deliver(&self, message: &Self::Message) -> Result<(), DeliveryError>;

    /// Cheap reachability check used between failed attempts.
    async fn probe(&self) -> bool;
}

/// Bounded FIFO that drops its oldest entry when full.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item. Returns the entry dropped to make room, if any.
    pub fn push(&self, item: T) -> Option<T> {
        let dropped = {
            let mut items = self.lock();
            let dropped = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(item);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Put an item back at the head. Returns `false` if the queue filled up
    /// in the meantime and the item was discarded.
    fn push_front(&self, item: T) -> bool {
        let mut items = self.lock();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_front(item);
        true
    }

    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Wait until an item is available and take it.
    pub async fn pop_wait(&self) -> T {
        loop {
            if let Some(item) = self.pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Lifecycle state of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Draining,
}

/// Tuning of one controller instance.
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    pub capacity: usize,
    /// Queue depth above which `stacking_flag` is raised.
    pub stacking_threshold: usize,
    /// Delay schedule between reachability probes.
    pub retry: RetryConfig,
    /// Budget for each message while draining.
    pub drain_timeout: Duration,
    pub stacking_flag: Option<HealthFlag>,
    pub unreachable_flag: Option<HealthFlag>,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            capacity: 1000,
            stacking_threshold: 10,
            retry: RetryConfig::fixed(Duration::from_secs(5)),
            drain_timeout: Duration::from_secs(2),
            stacking_flag: None,
            unreachable_flag: None,
        }
    }
}

/// Counters of one controller.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    failed_attempts: AtomicU64,
    dropped: AtomicU64,
}

impl DeliveryStats {
    /// Messages accepted by the endpoint.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Delivery attempts that failed.
    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts.load(Ordering::Relaxed)
    }

    /// Messages lost to queue overflow or to an unsuccessful drain.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Shared<T: Transport> {
    transport: Arc<T>,
    queue: BoundedQueue<T::Message>,
    options: DeliveryOptions,
    health: SharedHealth,
    stats: DeliveryStats,
    state: Mutex<RunState>,
}

impl<T: Transport> Shared<T> {
    fn set_state(&self, state: RunState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn update_stacking(&self) {
        if let Some(flag) = self.options.stacking_flag {
            let depth = self.queue.len();
            let stacking = depth > self.options.stacking_threshold;
            if stacking && !self.health.is_set(flag) {
                warn!("{} queue is stacking up: {} message(s)", self.transport.name(), depth);
            }
            self.health.set(flag, stacking);
        }
    }

    fn set_unreachable(&self, value: bool) {
        if let Some(flag) = self.options.unreachable_flag {
            self.health.set(flag, value);
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Bounded queue plus retry-until-success worker for one transport.
pub struct DeliveryController<T: Transport> {
    shared: Arc<Shared<T>>,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl<T: Transport> DeliveryController<T> {
    pub fn new(transport: T, options: DeliveryOptions, health: SharedHealth) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport: Arc::new(transport),
                queue: BoundedQueue::new(options.capacity),
                options,
                health,
                stats: DeliveryStats::default(),
                state: Mutex::new(RunState::Stopped),
            }),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    pub fn state(&self) -> RunState {
        *self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.shared.stats
    }

    /// Number of messages waiting.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Queue a message. Never blocks; drops the oldest message when full.
    pub fn enqueue(&self, message: T::Message) {
        if self.shared.queue.push(message).is_some() {
            self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                "{} queue full ({}), dropped oldest message",
                self.shared.transport.name(),
                self.shared.queue.capacity()
            );
        }
        self.shared.update_stacking();
        debug!(
            "{} enqueued message, queue size {}",
            self.shared.transport.name(),
            self.shared.queue.len()
        );
    }

    /// Spawn the worker and wait until it is ready. No-op when running.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            debug!("{} worker already running", self.shared.transport.name());
            return;
        }

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        shared.set_state(RunState::Running);
        let handle = tokio::spawn(run_worker(shared, cancel.clone(), ready_tx));

        if ready_rx.await.is_err() {
            error!("{} worker exited before becoming ready", self.shared.transport.name());
        }
        *worker = Some(Worker { handle, cancel });
    }

    /// Drain the queue with a bounded effort per message and join the
    /// worker. No-op when stopped.
    pub async fn stop(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };

        info!(
            "Stopping {} worker, {} message(s) queued",
            self.shared.transport.name(),
            self.shared.queue.len()
        );
        self.shared.set_state(RunState::Draining);
        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            error!("{} worker failed: {}", self.shared.transport.name(), e);
        }
        self.shared.set_state(RunState::Stopped);
    }
}

async fn run_worker<T: Transport>(
    shared: Arc<Shared<T>>,
    cancel: CancellationToken,
    ready: oneshot::Sender<()>,
) {
    let name = shared.transport.name().to_string();
    let _ = ready.send(());
    info!("{} worker started", name);

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = shared.queue.pop_wait() => message,
        };
        shared.update_stacking();

        if !deliver_until_success(&shared, &message, &cancel).await {
            // Interrupted by stop(); the drain gets one more try at it.
            if !shared.queue.push_front(message) {
                shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            break;
        }
        debug!(
            "{} message delivered, remaining in queue: {}",
            name,
            shared.queue.len()
        );
    }

    shared.set_state(RunState::Draining);
    drain(&shared).await;
    shared.update_stacking();
    info!("{} worker finished", name);
}

/// Returns `false` only when cancelled before the message got through.
async fn deliver_until_success<T: Transport>(
    shared: &Shared<T>,
    message: &T::Message,
    cancel: &CancellationToken,
) -> bool {
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            result = shared.transport.deliver(message) => result,
        };

        match result {
            Ok(()) => {
                shared.stats.delivered.fetch_add(1, Ordering::Relaxed);
                shared.set_unreachable(false);
                return true;
            }
            Err(e) => {
                shared.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
                shared.set_unreachable(true);
                warn!("{} delivery failed: {}", shared.transport.name(), e);
                if !wait_until_reachable(shared, cancel).await {
                    return false;
                }
            }
        }
    }
}

async fn wait_until_reachable<T: Transport>(shared: &Shared<T>, cancel: &CancellationToken) -> bool {
    let mut attempt = 0u32;
    loop {
        let delay = shared.options.retry.delay_for_attempt(attempt);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = sleep(delay) => {}
        }

        let reachable = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            reachable = shared.transport.probe() => reachable,
        };
        if reachable {
            info!("{} reachable again", shared.transport.name());
            return true;
        }

        attempt = attempt.saturating_add(1);
        debug!(
            "{} still unreachable after {} probe(s)",
            shared.transport.name(),
            attempt
        );
    }
}

async fn drain<T: Transport>(shared: &Shared<T>) {
    let budget = shared.options.drain_timeout;
    let mut flushed = 0u64;
    let mut lost = 0u64;

    while let Some(message) = shared.queue.pop() {
        match timeout(budget, shared.transport.deliver(&message)).await {
            Ok(Ok(())) => {
                shared.stats.delivered.fetch_add(1, Ordering::Relaxed);
                flushed += 1;
            }
            Ok(Err(e)) => {
                debug!("{} drain attempt failed: {}", shared.transport.name(), e);
                lost += 1;
            }
            Err(_) => {
                debug!("{} drain attempt timed out after {:?}", shared.transport.name(), budget);
                lost += 1;
            }
        }
    }

    shared.stats.dropped.fetch_add(lost, Ordering::Relaxed);
    if flushed + lost > 0 {
        info!(
            "{} drained: {} delivered, {} dropped",
            shared.transport.name(),
            flushed,
            lost
        );
    }
}

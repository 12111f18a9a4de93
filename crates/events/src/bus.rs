//! Async event bus
//!
//! A FIFO queue feeding a single dispatcher task. The dispatcher lives on
//! a resident background runtime (one dedicated thread owning its own
//! scheduler), so emission is a plain non-blocking enqueue that works from
//! sync and async contexts alike: events are never created-and-dropped in
//! a context without a scheduler.
//!
//! ## Dispatch
//!
//! Per event, the dispatcher:
//! 1. links the event into its parent's history entry,
//! 2. settles pending-parent completion tracking,
//! 3. appends the event to the bounded history ring,
//! 4. invokes matching subscribers in priority order; handler panics are
//!    caught and counted, never propagated.
//!
//! ## Ordering
//!
//! Events enqueued from one task dispatch in submission order. Handler
//! invocations within a single dispatch are sequential.

use crate::config::EventBusConfig;
use crate::subscription::{
    EventHandler, EventPredicate, Subscription, SubscriptionFilter, SubscriptionId,
    SubscriptionTables,
};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use provenant_core::{Error, Event, EventId, EventPhase, Result};
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// The resident dispatcher runtime
///
/// One background thread owning its own scheduler; every bus's dispatcher
/// task runs here, which is what makes sync emission safe.
static DISPATCH_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("provenant-events")
        .enable_all()
        .build()
        .expect("failed to build event dispatch runtime")
});

/// The documented default bus instance
///
/// Prefer constructing and injecting your own bus; the default exists for
/// code without a better place to thread one through.
static DEFAULT_BUS: Lazy<Arc<EventBus>> = Lazy::new(|| Arc::new(EventBus::new()));

/// Get the process-wide default bus
pub fn default_bus() -> Arc<EventBus> {
    DEFAULT_BUS.clone()
}

enum BusCommand {
    Emit(Event),
    Flush(oneshot::Sender<()>),
}

/// Counters describing a bus's activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Events accepted for dispatch
    pub emitted: u64,
    /// Handler invocations performed
    pub dispatched: u64,
    /// Handler panics caught
    pub handler_errors: u64,
    /// Live subscriptions
    pub subscriptions: usize,
    /// Parents currently awaiting child completions
    pub pending_parents: usize,
}

struct PendingParent {
    start: Event,
    remaining: usize,
    any_failed: bool,
    deadline: Instant,
}

struct BusShared {
    config: EventBusConfig,
    subscriptions: RwLock<SubscriptionTables>,
    history: Mutex<VecDeque<Event>>,
    pending: Mutex<HashMap<EventId, PendingParent>>,
    next_subscription: AtomicU64,
    emitted: AtomicU64,
    dispatched: AtomicU64,
    handler_errors: AtomicU64,
}

/// Async pub/sub engine with history and completion tracking
pub struct EventBus {
    tx: mpsc::UnboundedSender<BusCommand>,
    shared: Arc<BusShared>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a bus with explicit configuration
    pub fn with_config(config: EventBusConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(BusShared {
            config,
            subscriptions: RwLock::new(SubscriptionTables::default()),
            history: Mutex::new(VecDeque::new()),
            pending: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            emitted: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
        });
        DISPATCH_RUNTIME.spawn(dispatch_loop(shared.clone(), rx));
        EventBus { tx, shared }
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Subscribe a handler to every event
    pub fn subscribe(&self, handler: impl Fn(&Event) + Send + Sync + 'static) -> SubscriptionId {
        self.subscribe_with(SubscriptionFilter::All, 0, handler)
    }

    /// Subscribe a handler to exact types (including descendant types)
    pub fn subscribe_types<I, S>(
        &self,
        types: I,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let types: Vec<String> = types.into_iter().map(Into::into).collect();
        self.subscribe_with(SubscriptionFilter::Types(types), 0, handler)
    }

    /// Subscribe a handler to event types matching a pattern
    pub fn subscribe_pattern(
        &self,
        pattern: &str,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        let regex =
            Regex::new(pattern).map_err(|_| Error::InvalidPattern(pattern.to_string()))?;
        Ok(self.subscribe_with(SubscriptionFilter::Pattern(regex), 0, handler))
    }

    /// Subscribe a handler behind an arbitrary predicate
    pub fn subscribe_predicate(
        &self,
        predicate: impl Fn(&Event) -> bool + Send + Sync + 'static,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let predicate: EventPredicate = Arc::new(predicate);
        self.subscribe_with(SubscriptionFilter::Predicate(predicate), 0, handler)
    }

    /// Subscribe with an explicit filter and priority
    ///
    /// Higher priorities are invoked first.
    pub fn subscribe_with(
        &self,
        filter: SubscriptionFilter,
        priority: i32,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        let handler: EventHandler = Arc::new(handler);
        self.shared.subscriptions.write().insert(Subscription {
            id,
            filter,
            handler,
            priority,
        });
        id
    }

    /// Remove a subscription
    ///
    /// Returns false when the handle is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.subscriptions.write().remove(id)
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Enqueue an event for dispatch and return immediately
    pub fn emit(&self, event: Event) {
        self.shared.emitted.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(BusCommand::Emit(event)).is_err() {
            warn!("event bus dispatcher is gone; event dropped");
        }
    }

    /// Enqueue an event from a context without a running scheduler
    ///
    /// The dispatcher is resident on its own background scheduler, so this
    /// is the same non-blocking enqueue as [`emit`](Self::emit); the method
    /// exists so call sites can state their context explicitly. The event
    /// is guaranteed to be dispatched (never created-and-discarded).
    pub fn emit_sync(&self, event: Event) {
        self.emit(event);
    }

    /// Wait until every previously enqueued event has been dispatched
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(BusCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Blocking variant of [`flush`](Self::flush) for sync contexts
    pub fn flush_blocking(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(BusCommand::Flush(ack)).is_ok() {
            let _ = done.blocking_recv();
        }
    }

    // =========================================================================
    // Completion tracking
    // =========================================================================

    /// Track a start event until its expected children complete
    ///
    /// As each child `completed`/`failed` event arrives, the remaining
    /// count decrements; at zero (or at the timeout) the bus emits the
    /// parent's completion event: `completed` when every child succeeded,
    /// `failed` otherwise.
    pub fn expect_children(&self, start: &Event, count: usize, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(self.shared.config.default_completion_timeout);
        let mut start = start.clone();
        start.pending_children_count = Some(count);
        self.shared.pending.lock().insert(
            start.id,
            PendingParent {
                start,
                remaining: count,
                any_failed: false,
                deadline: Instant::now() + timeout,
            },
        );
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Most recent events, oldest first, optionally limited to the last `n`
    pub fn history(&self, limit: Option<usize>) -> Vec<Event> {
        let history = self.shared.history.lock();
        let skip = limit
            .map(|n| history.len().saturating_sub(n))
            .unwrap_or(0);
        history.iter().skip(skip).cloned().collect()
    }

    /// Find one event in the history by id
    pub fn find(&self, id: EventId) -> Option<Event> {
        self.shared.history.lock().iter().find(|e| e.id == id).cloned()
    }

    /// Activity counters
    pub fn stats(&self) -> BusStats {
        BusStats {
            emitted: self.shared.emitted.load(Ordering::Relaxed),
            dispatched: self.shared.dispatched.load(Ordering::Relaxed),
            handler_errors: self.shared.handler_errors.load(Ordering::Relaxed),
            subscriptions: self.shared.subscriptions.read().len(),
            pending_parents: self.shared.pending.lock().len(),
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

async fn dispatch_loop(shared: Arc<BusShared>, mut rx: mpsc::UnboundedReceiver<BusCommand>) {
    let poll = shared.config.completion_poll_interval;
    loop {
        let has_pending = !shared.pending.lock().is_empty();
        let command = if has_pending {
            tokio::select! {
                cmd = rx.recv() => cmd,
                _ = tokio::time::sleep(poll) => {
                    for event in expire_pending(&shared) {
                        dispatch_one(&shared, event);
                    }
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match command {
            Some(BusCommand::Emit(event)) => dispatch_one(&shared, event),
            Some(BusCommand::Flush(ack)) => {
                let _ = ack.send(());
            }
            None => break,
        }
    }
    debug!("event bus dispatcher stopped");
}

fn dispatch_one(shared: &Arc<BusShared>, event: Event) {
    // Link into the parent's history entry.
    if let Some(parent_id) = event.parent_id {
        let mut history = shared.history.lock();
        if let Some(parent) = history.iter_mut().find(|e| e.id == parent_id) {
            parent.children_ids.push(event.id);
        }
    }

    // Settle completion tracking, possibly synthesising parent completions.
    let follow_ups = settle_pending(shared, &event);

    // Record in the bounded history ring.
    {
        let mut history = shared.history.lock();
        if history.len() >= shared.config.history_capacity {
            history.pop_front();
        }
        history.push_back(event.clone());
    }

    // Deliver to subscribers, priority order, sequentially.
    let matched = shared.subscriptions.read().matching(&event);
    for sub in matched {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (sub.handler)(&event)
        }));
        shared.dispatched.fetch_add(1, Ordering::Relaxed);
        if outcome.is_err() {
            shared.handler_errors.fetch_add(1, Ordering::Relaxed);
            warn!(subscription = %sub.id, event_type = %event.event_type, "event handler panicked");
        }
    }

    for follow_up in follow_ups {
        dispatch_one(shared, follow_up);
    }
}

/// Decrement tracked parents on terminal child events
fn settle_pending(shared: &Arc<BusShared>, event: &Event) -> Vec<Event> {
    let Some(parent_id) = event.parent_id else {
        return Vec::new();
    };
    if !event.is_terminal() {
        return Vec::new();
    }
    let mut pending = shared.pending.lock();
    let Some(parent) = pending.get_mut(&parent_id) else {
        return Vec::new();
    };
    parent.remaining = parent.remaining.saturating_sub(1);
    parent.any_failed |= event.phase == EventPhase::Failed;
    if parent.remaining > 0 {
        return Vec::new();
    }
    match pending.remove(&parent_id) {
        Some(done) => vec![completion_for(&done)],
        None => Vec::new(),
    }
}

/// Emit completions for tracked parents whose deadline passed
fn expire_pending(shared: &Arc<BusShared>) -> Vec<Event> {
    let now = Instant::now();
    let mut pending = shared.pending.lock();
    let expired: Vec<EventId> = pending
        .iter()
        .filter(|(_, p)| p.deadline <= now)
        .map(|(id, _)| *id)
        .collect();
    expired
        .into_iter()
        .filter_map(|id| pending.remove(&id))
        .map(|p| completion_for(&p))
        .collect()
}

fn completion_for(parent: &PendingParent) -> Event {
    let phase = if parent.any_failed || parent.remaining > 0 {
        EventPhase::Failed
    } else {
        EventPhase::Completed
    };
    let mut event = parent
        .start
        .follow_up(completion_type(&parent.start.event_type, phase), phase);
    event.pending_children_count = Some(parent.remaining);
    event
}

/// Derive a completion type from a start type
///
/// `function.executing` completes as `function.completed` / `function.failed`;
/// a type without a dot gains a `.completed` / `.failed` suffix.
fn completion_type(start_type: &str, phase: EventPhase) -> String {
    let suffix = if phase == EventPhase::Failed {
        "failed"
    } else {
        "completed"
    };
    match start_type.rfind('.') {
        Some(i) => format!("{}.{}", &start_type[..i], suffix),
        None => format!("{}.{}", start_type, suffix),
    }
}

//! Emit decorator
//!
//! Wraps an operation so that it emits a paired start and completion (or
//! failure) event, automatically parented from the context stack. The
//! wrapped operation's own nested decorated calls therefore appear as
//! children of its events without any manual threading.
//!
//! ## Procedure
//!
//! 1. Build the start event; when `auto_parent` finds a parent on the
//!    context stack, link `parent_id`/`root_id` and inherit the lineage.
//!    Push the start event and emit it.
//! 2. Run the operation (with an optional timeout).
//! 3. On success emit the completion event, on error the failure event;
//!    both share the start event's lineage and parent linkage, and carry
//!    `duration_ms` when timing is on.
//! 4. Pop the stack on every exit path; if the operation's future is
//!    dropped mid-flight (task cancellation) or the body panics, a cleanup
//!    guard pops the stack and emits a `cancelled`-phase failure event.

use crate::bus::EventBus;
use crate::context::{self, StackKind};
use provenant_core::{Error, Event, EventPhase, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Description of one decorated operation
#[derive(Debug, Clone)]
pub struct OperationSpec {
    start: Event,
    completed_type: String,
    failed_type: String,
    auto_parent: bool,
    include_timing: bool,
    timeout: Option<Duration>,
}

impl OperationSpec {
    /// Describe an operation by its start event
    ///
    /// Completion and failure event types default to the start type with
    /// its last segment replaced by `completed` / `failed`.
    pub fn new(start: Event) -> Self {
        let completed_type = sibling_type(&start.event_type, "completed");
        let failed_type = sibling_type(&start.event_type, "failed");
        OperationSpec {
            start,
            completed_type,
            failed_type,
            auto_parent: true,
            include_timing: true,
            timeout: None,
        }
    }

    /// Override the completion event type
    pub fn completed_as(mut self, event_type: impl Into<String>) -> Self {
        self.completed_type = event_type.into();
        self
    }

    /// Override the failure event type
    pub fn failed_as(mut self, event_type: impl Into<String>) -> Self {
        self.failed_type = event_type.into();
        self
    }

    /// Control automatic parenting from the context stack (default on)
    pub fn auto_parent(mut self, on: bool) -> Self {
        self.auto_parent = on;
        self
    }

    /// Control `duration_ms` on completion events (default on)
    pub fn include_timing(mut self, on: bool) -> Self {
        self.include_timing = on;
        self
    }

    /// Cancel the operation after a deadline
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }
}

/// Replace the last dotted segment of an event type
fn sibling_type(event_type: &str, suffix: &str) -> String {
    match event_type.rfind('.') {
        Some(i) => format!("{}.{}", &event_type[..i], suffix),
        None => format!("{}.{}", event_type, suffix),
    }
}

/// Cleanup for abandoned operations
///
/// Pops the context stack and emits a `cancelled`-phase failure event when
/// the decorated operation neither completed nor failed through the normal
/// paths (future dropped, or panic unwinding a sync body).
struct CleanupGuard {
    bus: Arc<EventBus>,
    start: Event,
    failed_type: String,
    t0: Instant,
    include_timing: bool,
    kind: StackKind,
    armed: bool,
}

impl CleanupGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        context::pop(self.kind);
        let mut event = self
            .start
            .follow_up(self.failed_type.as_str(), EventPhase::Cancelled);
        if self.include_timing {
            event.duration_ms = Some(self.t0.elapsed().as_millis() as u64);
        }
        self.bus.emit(event);
    }
}

/// Decorate an async operation
pub async fn decorate_async<T, F>(bus: &Arc<EventBus>, spec: OperationSpec, f: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    decorate_async_with(bus, spec, f, |_, event| event).await
}

/// Decorate an async operation, enriching the completion event
///
/// `finish` receives the operation's output and the prepared completion
/// event and may attach metadata or context ids before emission.
pub async fn decorate_async_with<T, F>(
    bus: &Arc<EventBus>,
    spec: OperationSpec,
    f: F,
    finish: impl FnOnce(&T, Event) -> Event,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let bus = bus.clone();
    context::scoped(async move {
        let (start, mut guard) = begin(&bus, &spec);

        let outcome = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, f).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    guard.disarm();
                    context::pop(guard.kind);
                    let mut cancelled =
                        start.follow_up(spec.failed_type.as_str(), EventPhase::Cancelled);
                    cancelled = cancelled.with_metadata("error_kind", "timeout");
                    if spec.include_timing {
                        cancelled.duration_ms = Some(guard.t0.elapsed().as_millis() as u64);
                    }
                    bus.emit(cancelled);
                    return Err(Error::Timeout(limit));
                }
            },
            None => f.await,
        };

        settle(&bus, &spec, start, &mut guard, outcome, finish)
    })
    .await
}

/// Decorate a sync operation
pub fn decorate_sync<T>(
    bus: &Arc<EventBus>,
    spec: OperationSpec,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    decorate_sync_with(bus, spec, f, |_, event| event)
}

/// Decorate a sync operation, enriching the completion event
pub fn decorate_sync_with<T>(
    bus: &Arc<EventBus>,
    spec: OperationSpec,
    f: impl FnOnce() -> Result<T>,
    finish: impl FnOnce(&T, Event) -> Event,
) -> Result<T> {
    let (start, mut guard) = begin(bus, &spec);
    let outcome = f();
    settle(bus, &spec, start, &mut guard, outcome, finish)
}

fn begin(bus: &Arc<EventBus>, spec: &OperationSpec) -> (Event, CleanupGuard) {
    let mut start = spec.start.clone();
    if spec.auto_parent {
        if let Some(parent) = context::current_parent() {
            start = start.with_parent(&parent);
        }
    }
    let t0 = Instant::now();
    let kind = context::push(start.clone());
    bus.emit(start.clone());
    let guard = CleanupGuard {
        bus: bus.clone(),
        start: start.clone(),
        failed_type: spec.failed_type.clone(),
        t0,
        include_timing: spec.include_timing,
        kind,
        armed: true,
    };
    (start, guard)
}

fn settle<T>(
    bus: &Arc<EventBus>,
    spec: &OperationSpec,
    start: Event,
    guard: &mut CleanupGuard,
    outcome: Result<T>,
    finish: impl FnOnce(&T, Event) -> Event,
) -> Result<T> {
    guard.disarm();
    context::pop(guard.kind);
    match outcome {
        Ok(value) => {
            let mut completed = start.follow_up(spec.completed_type.as_str(), EventPhase::Completed);
            if spec.include_timing {
                completed.duration_ms = Some(guard.t0.elapsed().as_millis() as u64);
            }
            let completed = finish(&value, completed);
            bus.emit(completed);
            Ok(value)
        }
        Err(error) => {
            let mut failed = start.follow_up(spec.failed_type.as_str(), EventPhase::Failed);
            failed = failed
                .with_metadata("error", error.to_string())
                .with_metadata("error_kind", error.kind());
            if spec.include_timing {
                failed.duration_ms = Some(guard.t0.elapsed().as_millis() as u64);
            }
            bus.emit(failed);
            Err(error)
        }
    }
}

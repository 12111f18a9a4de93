//! Task-local context stack
//!
//! The stack of currently-active operation events. Decorated operations
//! push their start event before running and pop it afterwards; whatever
//! is on top when a new operation starts becomes that operation's parent.
//!
//! ## Storage
//!
//! Async operations use a tokio task-local stack: it survives across
//! `.await` points within one task and never bleeds into unrelated
//! concurrent tasks. Sync operations outside any async scope fall back to
//! a thread-local stack. A sync operation invoked from inside an async
//! decorated scope (same thread, during a poll) sees the task-local stack,
//! so mixed nesting composes.
//!
//! Spawned tasks do not implicitly inherit the stack; wrap the spawned
//! future in [`inherit`] to hand the current stack down explicitly.

use provenant_core::Event;
use std::cell::RefCell;
use std::future::Future;

tokio::task_local! {
    static TASK_STACK: RefCell<Vec<Event>>;
}

thread_local! {
    static THREAD_STACK: RefCell<Vec<Event>> = const { RefCell::new(Vec::new()) };
}

/// Which stack an event was pushed onto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StackKind {
    /// The tokio task-local stack
    Task,
    /// The thread-local fallback stack
    Thread,
}

fn task_stack_active() -> bool {
    TASK_STACK.try_with(|_| ()).is_ok()
}

/// The event that would parent a new operation, if any
pub fn current_parent() -> Option<Event> {
    if task_stack_active() {
        TASK_STACK.with(|s| s.borrow().last().cloned())
    } else {
        THREAD_STACK.with(|s| s.borrow().last().cloned())
    }
}

/// Current nesting depth of active operations
pub fn depth() -> usize {
    if task_stack_active() {
        TASK_STACK.with(|s| s.borrow().len())
    } else {
        THREAD_STACK.with(|s| s.borrow().len())
    }
}

/// Snapshot of the active stack, bottom first
fn snapshot() -> Vec<Event> {
    if task_stack_active() {
        TASK_STACK.with(|s| s.borrow().clone())
    } else {
        THREAD_STACK.with(|s| s.borrow().clone())
    }
}

pub(crate) fn push(event: Event) -> StackKind {
    if task_stack_active() {
        TASK_STACK.with(|s| s.borrow_mut().push(event));
        StackKind::Task
    } else {
        THREAD_STACK.with(|s| s.borrow_mut().push(event));
        StackKind::Thread
    }
}

pub(crate) fn pop(kind: StackKind) -> Option<Event> {
    match kind {
        StackKind::Task => TASK_STACK.try_with(|s| s.borrow_mut().pop()).ok().flatten(),
        StackKind::Thread => THREAD_STACK.with(|s| s.borrow_mut().pop()),
    }
}

/// Run a future inside a task-local stack scope
///
/// When a scope is already active the future runs in place; otherwise a
/// fresh scope is created, seeded from the caller's stack so a sync
/// ancestor still parents async descendants.
pub async fn scoped<F: Future>(f: F) -> F::Output {
    if task_stack_active() {
        f.await
    } else {
        TASK_STACK.scope(RefCell::new(snapshot()), f).await
    }
}

/// Hand the current stack down to a spawned task
///
/// Wrap the future passed to `tokio::spawn` so the child task sees its
/// ancestor's stack:
///
/// ```ignore
/// tokio::spawn(context::inherit(async move { ... }));
/// ```
pub fn inherit<F: Future>(f: F) -> impl Future<Output = F::Output> {
    TASK_STACK.scope(RefCell::new(snapshot()), f)
}

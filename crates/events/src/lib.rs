//! Event coordination for the provenant framework
//!
//! This crate provides:
//! - EventBus: async pub/sub with a single dispatcher task, bounded
//!   history, three subscription indices and completion tracking
//! - context: the task-local stack of active operation events
//! - emitter: the decorator wrapping operations in paired start and
//!   completion events, automatically parented via the context stack
//!
//! The dispatcher runs on a resident background scheduler, so emission is
//! safe from both sync and async contexts and events are never silently
//! dropped. Construct buses per component and inject them; [`default_bus`]
//! exists for code with nowhere better to thread one through.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod config;
pub mod context;
pub mod emitter;
pub mod subscription;

pub use bus::{default_bus, BusStats, EventBus};
pub use config::EventBusConfig;
pub use emitter::{
    decorate_async, decorate_async_with, decorate_sync, decorate_sync_with, OperationSpec,
};
pub use subscription::{SubscriptionFilter, SubscriptionId};

// Re-export the event model for convenience
pub use provenant_core::{Event, EventPhase};

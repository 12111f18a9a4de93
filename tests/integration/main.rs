//! End-to-end suites for the provenant workspace
//!
//! - scenarios: the core user journeys (promote/address, versioning,
//!   function execution, unpacking, borrowing, event hierarchy)
//! - properties: property-based universal invariants
//! - events: cross-crate event bus behaviour

mod events;
mod properties;
mod scenarios;

mod common {
    /// Install a fmt subscriber once so failing runs show tracing output
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }
}

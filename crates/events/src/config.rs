//! Event bus configuration

use std::time::Duration;

/// Tunables for an [`EventBus`](crate::EventBus)
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Ring-buffer capacity of the recent-event history
    pub history_capacity: usize,
    /// How often the dispatcher checks pending-parent deadlines
    pub completion_poll_interval: Duration,
    /// Deadline applied to tracked parents when none is given
    pub default_completion_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        EventBusConfig {
            history_capacity: 10_000,
            completion_poll_interval: Duration::from_millis(50),
            default_completion_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_history_capacity() {
        let config = EventBusConfig::default();
        assert_eq!(config.history_capacity, 10_000);
        assert!(config.completion_poll_interval < config.default_completion_timeout);
    }
}

//! Process-wide maintenance flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::observability::metrics;

/// Shared maintenance state. Starts live; clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceMode(Arc<AtomicBool>);

impl MaintenanceMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the process is in maintenance.
    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Set the flag, returning the previous value.
    pub(crate) fn set(&self, enabled: bool) -> bool {
        let previous = self.0.swap(enabled, Ordering::AcqRel);
        metrics::set_maintenance(enabled);
        if previous != enabled {
            tracing::info!(maintenance = enabled, "Maintenance mode changed");
        }
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let flag = MaintenanceMode::new();
        let reader = flag.clone();
        assert!(!reader.is_enabled());
        for value in [true, true, false, true, false, false, true] {
            flag.set(value);
            assert_eq!(reader.is_enabled(), value);
        }
    }
}

//! Global atomic counters.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (end of a CLI command, daemon shutdown).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocation and no locking.
pub struct Metrics {
    sessions_started: AtomicU64,
    operations_executed: AtomicU64,
    operations_failed: AtomicU64,
    rollbacks_applied: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            sessions_started: AtomicU64::new(0),
            operations_executed: AtomicU64::new(0),
            operations_failed: AtomicU64::new(0),
            rollbacks_applied: AtomicU64::new(0),
        }
    }

    pub fn inc_sessions(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sessions_started", "counter incremented");
    }

    pub fn inc_operations(&self) {
        self.operations_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "operations_executed", "counter incremented");
    }

    pub fn inc_failures(&self) {
        self.operations_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "operations_failed", "counter incremented");
    }

    pub fn inc_rollbacks(&self) {
        self.rollbacks_applied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rollbacks_applied", "counter incremented");
    }

    /// Emit all current counter values as one `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            sessions_started = self.sessions_started(),
            operations_executed = self.operations_executed(),
            operations_failed = self.operations_failed(),
            rollbacks_applied = self.rollbacks_applied(),
        );
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    pub fn operations_executed(&self) -> u64 {
        self.operations_executed.load(Ordering::Relaxed)
    }

    pub fn operations_failed(&self) -> u64 {
        self.operations_failed.load(Ordering::Relaxed)
    }

    pub fn rollbacks_applied(&self) -> u64 {
        self.rollbacks_applied.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (tests).
    pub fn reset(&self) {
        self.sessions_started.store(0, Ordering::Relaxed);
        self.operations_executed.store(0, Ordering::Relaxed);
        self.operations_failed.store(0, Ordering::Relaxed);
        self.rollbacks_applied.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_sessions();
        m.inc_operations();
        m.inc_operations();
        m.inc_failures();
        m.inc_rollbacks();
        m.inc_rollbacks();
        m.inc_rollbacks();
        assert_eq!(m.sessions_started(), 1);
        assert_eq!(m.operations_executed(), 2);
        assert_eq!(m.operations_failed(), 1);
        assert_eq!(m.rollbacks_applied(), 3);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_sessions();
        m.inc_failures();
        m.reset();
        assert_eq!(m.sessions_started(), 0);
        assert_eq!(m.operations_failed(), 0);
    }
}

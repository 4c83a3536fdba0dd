use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of the work done by the extension.
#[derive(Debug, Default)]
pub struct ExtensionStats {
    limits_set: AtomicU64,
    limits_cleared: AtomicU64,
    notifications: AtomicU64,
    failures: AtomicU64,
}

impl ExtensionStats {
    /// Rate limits installed.
    #[inline]
    pub fn limits_set(&self) -> u64 {
        self.limits_set.load(Ordering::Relaxed)
    }

    /// Rate limits removed.
    #[inline]
    pub fn limits_cleared(&self) -> u64 {
        self.limits_cleared.load(Ordering::Relaxed)
    }

    /// Policy notifications handled.
    #[inline]
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Failed router events and failed per-IP notification updates.
    #[inline]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn increment_limits_set(&self) {
        self.limits_set.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_limits_cleared(&self) {
        self.limits_cleared.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_notifications(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

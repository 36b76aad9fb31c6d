//! Scoped subscription lifetime (C7, DESIGN NOTES "per-kind subscription lifetime"): a
//! guard owning exactly one `(source, handler)` attachment, released on drop or
//! explicitly. Every node kind that attaches to a host object's `Notify` capability or to
//! a child's change fan-out stores one of these per attachment so teardown on both the
//! happy path and the construction-rollback path (§7 "Initialization fault") is a single
//! `drop`.

pub struct SubscriptionGuard {
    teardown: Option<std::boxed::Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        SubscriptionGuard { teardown: Some(std::boxed::Box::new(teardown)) }
    }

    /// A guard that owns nothing, for node kinds/branches that never subscribed.
    pub fn none() -> Self {
        SubscriptionGuard { teardown: None }
    }

    /// Tears down immediately rather than waiting for drop; used when a node replaces a
    /// subscription mid-lifetime (e.g. `Conditional` switching the live branch).
    pub fn release(&mut self) {
        if let Some(f) = self.teardown.take() {
            f()
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release()
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SubscriptionGuard(active={})", self.teardown.is_some())
    }
}

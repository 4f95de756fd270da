//! Disposable subscription handles

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

type Teardown = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct SubscriptionState {
    closed: bool,
    teardowns: Vec<Teardown>,
}

/// Handle to an active subscription.
///
/// Clones share state. `unsubscribe` runs every registered teardown exactly
/// once; teardowns added after that run immediately.
#[derive(Clone, Default)]
pub struct Subscription {
    state: Arc<Mutex<SubscriptionState>>,
}

impl Subscription {
    /// Open subscription without teardowns
    #[must_use] pub fn new() -> Self {
        Self::default()
    }

    /// Open subscription running `teardown` on unsubscribe
    pub fn from_fn<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let subscription = Self::new();
        subscription.add(teardown);
        subscription
    }

    /// Already closed subscription
    #[must_use] pub fn closed() -> Self {
        let subscription = Self::new();
        subscription.unsubscribe();
        subscription
    }

    /// Register a teardown
    pub fn add<F>(&self, teardown: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            teardown();
        } else {
            state.teardowns.push(Box::new(teardown));
        }
    }

    /// Unsubscribe `child` together with this subscription
    pub fn add_subscription(&self, child: Subscription) {
        if Arc::ptr_eq(&self.state, &child.state) {
            return;
        }
        self.add(move || child.unsubscribe());
    }

    /// Run every teardown; idempotent
    pub fn unsubscribe(&self) {
        let teardowns = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.teardowns)
        };
        for teardown in teardowns {
            teardown();
        }
    }

    /// Whether `unsubscribe` has run
    #[must_use] pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Subscription")
            .field("closed", &state.closed)
            .field("teardowns", &state.teardowns.len())
            .finish()
    }
}

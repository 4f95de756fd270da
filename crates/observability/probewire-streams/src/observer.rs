//! Observer abstraction

use probewire_core::ProbeWireError;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Receiver of stream notifications.
///
/// After `on_error` or `on_completed` no further notifications are expected.
pub trait Observer<T>: Send + Sync {
    /// Next value
    fn on_next(&self, value: T);

    /// Stream failed
    fn on_error(&self, error: ProbeWireError);

    /// Stream ended
    fn on_completed(&self);
}

/// Observer shared between a stream and its subscriber
pub type SharedObserver<T> = Arc<dyn Observer<T>>;

type NextFn<T> = Box<dyn Fn(T) + Send + Sync>;
type ErrorFn = Box<dyn Fn(ProbeWireError) + Send + Sync>;
type CompletedFn = Box<dyn Fn() + Send + Sync>;

/// Closure-based observer
pub struct FunctionObserver<T> {
    next: NextFn<T>,
    error: Option<ErrorFn>,
    completed: Option<CompletedFn>,
}

impl<T> FunctionObserver<T> {
    /// Observer calling `next` for every value
    pub fn new<F>(next: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            next: Box::new(next),
            error: None,
            completed: None,
        }
    }

    /// Handle errors; by default they are logged
    #[must_use]
    pub fn with_error<F>(mut self, error: F) -> Self
    where
        F: Fn(ProbeWireError) + Send + Sync + 'static,
    {
        self.error = Some(Box::new(error));
        self
    }

    /// Handle completion
    #[must_use]
    pub fn with_completed<F>(mut self, completed: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.completed = Some(Box::new(completed));
        self
    }

    /// Share as a [`SharedObserver`]
    pub fn shared(self) -> SharedObserver<T>
    where
        T: 'static,
    {
        Arc::new(self)
    }
}

impl<T> fmt::Debug for FunctionObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionObserver")
            .field("handles_error", &self.error.is_some())
            .field("handles_completed", &self.completed.is_some())
            .finish()
    }
}

impl<T> Observer<T> for FunctionObserver<T> {
    fn on_next(&self, value: T) {
        (self.next)(value);
    }

    fn on_error(&self, error: ProbeWireError) {
        match &self.error {
            Some(handler) => handler(error),
            None => warn!("unhandled stream error: {error}"),
        }
    }

    fn on_completed(&self) {
        if let Some(handler) = &self.completed {
            handler();
        }
    }
}

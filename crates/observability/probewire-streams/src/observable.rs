//! Cold observable wrapper and creation functions

use crate::observer::{FunctionObserver, Observer, SharedObserver};
use crate::subscription::Subscription;
use probewire_core::ProbeWireError;
use std::fmt;
use std::sync::Arc;

type SubscribeFn<T> = Arc<dyn Fn(SharedObserver<T>) -> Subscription + Send + Sync>;

/// A stream that starts producing when subscribed.
///
/// Each `subscribe` call runs the producer again with a fresh observer;
/// operators build new observables around an existing one.
pub struct Observable<T> {
    subscribe_fn: SubscribeFn<T>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self { subscribe_fn: self.subscribe_fn.clone() }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable").finish()
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Observable backed by a subscribe function
    pub fn create<F>(subscribe: F) -> Self
    where
        F: Fn(SharedObserver<T>) -> Subscription + Send + Sync + 'static,
    {
        Self { subscribe_fn: Arc::new(subscribe) }
    }

    /// Start the stream
    pub fn subscribe(&self, observer: SharedObserver<T>) -> Subscription {
        (self.subscribe_fn)(observer)
    }

    /// Start the stream with a value callback only
    pub fn subscribe_next<F>(&self, next: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe(FunctionObserver::new(next).shared())
    }

    /// Stream emitting `values` then completing
    #[must_use] pub fn of(values: Vec<T>) -> Self
    where
        T: Clone + Sync,
    {
        Self::create(move |observer| {
            let subscription = Subscription::new();
            for value in &values {
                if subscription.is_closed() {
                    return subscription;
                }
                observer.on_next(value.clone());
            }
            observer.on_completed();
            subscription
        })
    }

    /// Stream emitting one value then completing
    #[must_use] pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::of(vec![value])
    }

    /// Stream completing immediately
    #[must_use] pub fn empty() -> Self {
        Self::create(|observer| {
            observer.on_completed();
            Subscription::new()
        })
    }

    /// Stream failing immediately
    #[must_use] pub fn error(error: ProbeWireError) -> Self {
        Self::create(move |observer| {
            observer.on_error(error.clone());
            Subscription::new()
        })
    }
}

type NextStep<T, U> = Box<dyn Fn(T, &SharedObserver<U>) + Send + Sync>;
type CompletedStep<U> = Box<dyn Fn(&SharedObserver<U>) + Send + Sync>;

/// Observer sitting between an upstream and a downstream observer
pub(crate) struct OperatorObserver<T, U> {
    downstream: SharedObserver<U>,
    next: NextStep<T, U>,
    completed: Option<CompletedStep<U>>,
}

impl<T, U> OperatorObserver<T, U> {
    pub(crate) fn new<F>(downstream: SharedObserver<U>, next: F) -> Self
    where
        F: Fn(T, &SharedObserver<U>) + Send + Sync + 'static,
    {
        Self { downstream, next: Box::new(next), completed: None }
    }

    pub(crate) fn on_complete<F>(mut self, completed: F) -> Self
    where
        F: Fn(&SharedObserver<U>) + Send + Sync + 'static,
    {
        self.completed = Some(Box::new(completed));
        self
    }
}

impl<T, U> Observer<T> for OperatorObserver<T, U> {
    fn on_next(&self, value: T) {
        (self.next)(value, &self.downstream);
    }

    fn on_error(&self, error: ProbeWireError) {
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        match &self.completed {
            Some(completed) => completed(&self.downstream),
            None => self.downstream.on_completed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_of_is_cold() {
        let source = Observable::of(vec![1, 2, 3]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let sink = seen.clone();
            source.subscribe_next(move |v| sink.lock().push(v));
        }
        assert_eq!(*seen.lock(), vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_empty_and_error() {
        let done = Arc::new(Mutex::new(Vec::new()));
        let sink = done.clone();
        Observable::<i32>::empty().subscribe(
            FunctionObserver::new(|_| {}).with_completed(move || sink.lock().push("completed")).shared(),
        );
        let sink = done.clone();
        Observable::<i32>::error(ProbeWireError::evaluation("bad")).subscribe(
            FunctionObserver::new(|_| {}).with_error(move |_| sink.lock().push("error")).shared(),
        );
        assert_eq!(*done.lock(), vec!["completed", "error"]);
    }
}

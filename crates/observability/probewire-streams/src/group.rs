//! Grouping operator

use crate::observable::Observable;
use crate::observer::{Observer, SharedObserver};
use crate::subject::Subject;
use crate::subscription::Subscription;
use parking_lot::Mutex;
use probewire_core::ProbeWireError;
use std::fmt;
use std::sync::Arc;

/// Child stream of [`Observable::group_by`] for one key
pub struct GroupedObservable<K, T> {
    /// Group key
    pub key: K,
    /// Values with this key
    pub observable: Observable<T>,
}

impl<K: Clone, T> Clone for GroupedObservable<K, T> {
    fn clone(&self) -> Self {
        Self { key: self.key.clone(), observable: self.observable.clone() }
    }
}

impl<K: fmt::Debug, T> fmt::Debug for GroupedObservable<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupedObservable").field("key", &self.key).finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    /// Split the stream into one child per distinct key, emitted in
    /// first-seen order before its first value
    #[must_use]
    pub fn group_by<K, F>(&self, key_fn: F) -> Observable<GroupedObservable<K, T>>
    where
        K: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let source = self.clone();
        let key_fn: Arc<dyn Fn(&T) -> K + Send + Sync> = Arc::new(key_fn);
        Observable::create(move |downstream| {
            let grouper = Arc::new(Grouper {
                groups: Mutex::new(Some(Vec::new())),
                key_fn: key_fn.clone(),
                downstream,
            });
            let subscription = Subscription::new();
            let teardown = grouper.clone();
            subscription.add(move || {
                teardown.groups.lock().take();
            });
            subscription.add_subscription(source.subscribe(grouper));
            subscription
        })
    }
}

struct Grouper<K, T> {
    // None once terminated
    groups: Mutex<Option<Vec<(K, Subject<T>)>>>,
    key_fn: Arc<dyn Fn(&T) -> K + Send + Sync>,
    downstream: SharedObserver<GroupedObservable<K, T>>,
}

impl<K, T> Grouper<K, T>
where
    K: Clone + PartialEq + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn take_groups(&self) -> Vec<Subject<T>> {
        self.groups
            .lock()
            .take()
            .map(|groups| groups.into_iter().map(|(_, subject)| subject).collect())
            .unwrap_or_default()
    }
}

impl<K, T> Observer<T> for Grouper<K, T>
where
    K: Clone + PartialEq + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn on_next(&self, value: T) {
        let key = (self.key_fn)(&value);
        let (subject, created) = {
            let mut groups = self.groups.lock();
            let Some(groups) = groups.as_mut() else {
                return;
            };
            match groups.iter().find(|(k, _)| *k == key) {
                Some((_, subject)) => (subject.clone(), false),
                None => {
                    let subject = Subject::new();
                    groups.push((key.clone(), subject.clone()));
                    (subject, true)
                }
            }
        };
        if created {
            self.downstream.on_next(GroupedObservable { key, observable: subject.as_observable() });
        }
        subject.on_next(value);
    }

    fn on_error(&self, error: ProbeWireError) {
        for subject in self.take_groups() {
            subject.on_error(error.clone());
        }
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        for subject in self.take_groups() {
            subject.on_completed();
        }
        self.downstream.on_completed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::FunctionObserver;

    #[test]
    fn test_groups_in_first_seen_order() {
        let words = vec!["apple", "bean", "avocado", "carrot", "banana"];
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();
        Observable::of(words)
            .group_by(|w: &&str| w.chars().next().unwrap_or(' '))
            .flat_map(|group| {
                let key = group.key;
                group.observable.count().map(move |n| (key, n))
            })
            .subscribe_next(move |r| sink.lock().push(r));
        assert_eq!(*results.lock(), vec![('a', 2), ('b', 2), ('c', 1)]);
    }

    #[test]
    fn test_completion_reaches_children() {
        let source = Subject::new();
        let completed = Arc::new(Mutex::new(0));
        let counter = completed.clone();
        source.as_observable().group_by(|v: &i32| v % 2).subscribe_next(move |group| {
            let counter = counter.clone();
            group.observable.subscribe(
                FunctionObserver::new(|_| {}).with_completed(move || *counter.lock() += 1).shared(),
            );
        });
        source.on_next(1);
        source.on_next(2);
        source.on_next(3);
        source.on_completed();
        assert_eq!(*completed.lock(), 2);
    }
}

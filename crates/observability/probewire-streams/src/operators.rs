//! Stream operators

use crate::observable::{Observable, OperatorObserver};
use crate::observer::{FunctionObserver, Observer, SharedObserver};
use crate::subscription::Subscription;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

impl<T: Send + 'static> Observable<T> {
    /// Transform every value
    #[must_use]
    pub fn map<U, F>(&self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::create(move |downstream| {
            let f = f.clone();
            source.subscribe(Arc::new(OperatorObserver::new(downstream, move |v, d: &SharedObserver<U>| {
                d.on_next(f(v));
            })))
        })
    }

    /// Keep values matching `predicate`
    #[must_use]
    pub fn filter<F>(&self, predicate: F) -> Observable<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let source = self.clone();
        let predicate = Arc::new(predicate);
        Observable::create(move |downstream| {
            let predicate = predicate.clone();
            source.subscribe(Arc::new(OperatorObserver::new(downstream, move |v, d: &SharedObserver<T>| {
                if predicate(&v) {
                    d.on_next(v);
                }
            })))
        })
    }

    /// Transform and drop in one step
    #[must_use]
    pub fn filter_map<U, F>(&self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::create(move |downstream| {
            let f = f.clone();
            source.subscribe(Arc::new(OperatorObserver::new(downstream, move |v, d: &SharedObserver<U>| {
                if let Some(u) = f(v) {
                    d.on_next(u);
                }
            })))
        })
    }

    /// Drop the first `n` values
    #[must_use]
    pub fn skip(&self, n: usize) -> Observable<T> {
        let source = self.clone();
        Observable::create(move |downstream| {
            let skipped = Mutex::new(0usize);
            source.subscribe(Arc::new(OperatorObserver::new(downstream, move |v, d: &SharedObserver<T>| {
                {
                    let mut skipped = skipped.lock();
                    if *skipped < n {
                        *skipped += 1;
                        return;
                    }
                }
                d.on_next(v);
            })))
        })
    }

    /// Forward the first `n` values, then complete and unsubscribe upstream
    #[must_use]
    pub fn take(&self, n: usize) -> Observable<T> {
        let source = self.clone();
        Observable::create(move |downstream: SharedObserver<T>| {
            let upstream = Subscription::new();
            if n == 0 {
                downstream.on_completed();
                upstream.unsubscribe();
                return upstream;
            }
            let remaining = Arc::new(Mutex::new(n));
            let on_done = remaining.clone();
            let stop = upstream.clone();
            let observer = OperatorObserver::new(downstream, move |v, d: &SharedObserver<T>| {
                let last = {
                    let mut remaining = remaining.lock();
                    if *remaining == 0 {
                        return;
                    }
                    *remaining -= 1;
                    *remaining == 0
                };
                d.on_next(v);
                if last {
                    d.on_completed();
                    stop.unsubscribe();
                }
            })
            .on_complete(move |d| {
                let open = std::mem::take(&mut *on_done.lock()) > 0;
                if open {
                    d.on_completed();
                }
            });
            upstream.add_subscription(source.subscribe(Arc::new(observer)));
            upstream
        })
    }

    /// Fold every value; emit the accumulator once on completion
    #[must_use]
    pub fn reduce<A, F>(&self, seed: A, f: F) -> Observable<A>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A, T) -> A + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::create(move |downstream| {
            let acc = Arc::new(Mutex::new(Some(seed.clone())));
            let flush = acc.clone();
            let f = f.clone();
            let observer = OperatorObserver::new(downstream, move |v, _d: &SharedObserver<A>| {
                let mut acc = acc.lock();
                if let Some(current) = acc.take() {
                    *acc = Some(f(current, v));
                }
            })
            .on_complete(move |d| {
                let result = flush.lock().take();
                if let Some(result) = result {
                    d.on_next(result);
                }
                d.on_completed();
            });
            source.subscribe(Arc::new(observer))
        })
    }

    /// Number of values, on completion
    #[must_use]
    pub fn count(&self) -> Observable<u64> {
        self.reduce(0u64, |n, _| n + 1)
    }

    /// Every value collected into one vector, on completion
    #[must_use]
    pub fn to_vec(&self) -> Observable<Vec<T>>
    where
        T: Clone + Sync,
    {
        self.reduce(Vec::new(), |mut acc, v| {
            acc.push(v);
            acc
        })
    }

    /// Call `f` for every value without changing the stream
    #[must_use]
    pub fn tap<F>(&self, f: F) -> Observable<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.map(move |v| {
            f(&v);
            v
        })
    }

    /// Pair values by position. Completes once a completed side has no
    /// buffered values left.
    #[must_use]
    pub fn zip<U, R, F>(&self, other: &Observable<U>, f: F) -> Observable<R>
    where
        U: Send + 'static,
        R: Send + 'static,
        F: Fn(T, U) -> R + Send + Sync + 'static,
    {
        let left = self.clone();
        let right = other.clone();
        let f = Arc::new(f);
        Observable::create(move |downstream: SharedObserver<R>| {
            let zipper = Arc::new(Zipper {
                state: Mutex::new(ZipState {
                    left: VecDeque::new(),
                    right: VecDeque::new(),
                    left_done: false,
                    right_done: false,
                    done: false,
                }),
                f: f.clone(),
                downstream,
                subscription: Subscription::new(),
            });
            let subscription = zipper.subscription.clone();
            subscription.add_subscription(left.subscribe(Arc::new(ZipLeft { zipper: zipper.clone() })));
            subscription.add_subscription(right.subscribe(Arc::new(ZipRight { zipper })));
            subscription
        })
    }

    /// Subscribe to the stream returned by `f` for every value and forward
    /// all their emissions. Completes when the source and every inner stream
    /// have completed.
    #[must_use]
    pub fn flat_map<U, F>(&self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Observable<U> + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::create(move |downstream: SharedObserver<U>| {
            let merge = Arc::new(Merge {
                state: Mutex::new(MergeState { active: 1, next_id: 0, inner: HashMap::new() }),
                downstream,
            });
            let subscription = Subscription::new();
            let teardown = merge.clone();
            subscription.add(move || {
                let inner: Vec<Subscription> = teardown.state.lock().inner.drain().map(|(_, s)| s).collect();
                for s in inner {
                    s.unsubscribe();
                }
            });

            let f = f.clone();
            let outer = merge.clone();
            let on_done = merge.clone();
            let observer = OperatorObserver::new(merge.downstream.clone(), move |v, _d: &SharedObserver<U>| {
                let inner_stream = f(v);
                outer.subscribe_inner(&inner_stream);
            })
            .on_complete(move |_d| on_done.finish_one());
            subscription.add_subscription(source.subscribe(Arc::new(observer)));
            subscription
        })
    }

    /// Alias of [`Observable::flat_map`]
    #[must_use]
    pub fn select_many<U, F>(&self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Observable<U> + Send + Sync + 'static,
    {
        self.flat_map(f)
    }
}

impl Observable<f64> {
    /// Sum of values; 0 for an empty stream
    #[must_use]
    pub fn sum(&self) -> Observable<f64> {
        self.reduce(0.0, |acc, v| acc + v)
    }

    /// Smallest value; nothing for an empty stream
    #[must_use]
    pub fn min(&self) -> Observable<f64> {
        self.reduce(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.min(v))))
            .filter_map(|v| v)
    }

    /// Largest value; nothing for an empty stream
    #[must_use]
    pub fn max(&self) -> Observable<f64> {
        self.reduce(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
            .filter_map(|v| v)
    }

    /// Arithmetic mean; nothing for an empty stream
    #[must_use]
    pub fn average(&self) -> Observable<f64> {
        self.reduce((0.0, 0u64), |(sum, n), v| (sum + v, n + 1))
            .filter_map(|(sum, n)| if n == 0 { None } else { Some(sum / n as f64) })
    }
}

struct ZipState<T, U> {
    left: VecDeque<T>,
    right: VecDeque<U>,
    left_done: bool,
    right_done: bool,
    done: bool,
}

struct Zipper<T, U, R> {
    state: Mutex<ZipState<T, U>>,
    f: Arc<dyn Fn(T, U) -> R + Send + Sync>,
    downstream: SharedObserver<R>,
    subscription: Subscription,
}

impl<T, U, R> Zipper<T, U, R> {
    fn drained(state: &ZipState<T, U>) -> bool {
        (state.left_done && state.left.is_empty()) || (state.right_done && state.right.is_empty())
    }

    fn complete(&self) {
        self.downstream.on_completed();
        self.subscription.unsubscribe();
    }
}

struct ZipLeft<T, U, R> {
    zipper: Arc<Zipper<T, U, R>>,
}

struct ZipRight<T, U, R> {
    zipper: Arc<Zipper<T, U, R>>,
}

impl<T, U, R> Zipper<T, U, R> {
    fn emit(&self, pair: Option<(T, U)>) {
        if let Some((l, r)) = pair {
            self.downstream.on_next((self.f)(l, r));
        }
        let finished = {
            let mut state = self.state.lock();
            if !state.done && Self::drained(&state) {
                state.done = true;
                true
            } else {
                false
            }
        };
        if finished {
            self.complete();
        }
    }

    fn fail(&self, error: probewire_core::ProbeWireError) {
        let first = !std::mem::replace(&mut self.state.lock().done, true);
        if first {
            self.downstream.on_error(error);
            self.subscription.unsubscribe();
        }
    }
}

impl<T: Send, U: Send, R> Observer<T> for ZipLeft<T, U, R> {
    fn on_next(&self, value: T) {
        let pair = {
            let mut state = self.zipper.state.lock();
            if state.done {
                return;
            }
            state.left.push_back(value);
            match state.right.pop_front() {
                Some(r) => state.left.pop_front().map(|l| (l, r)),
                None => None,
            }
        };
        self.zipper.emit(pair);
    }

    fn on_error(&self, error: probewire_core::ProbeWireError) {
        self.zipper.fail(error);
    }

    fn on_completed(&self) {
        self.zipper.state.lock().left_done = true;
        self.zipper.emit(None);
    }
}

impl<T: Send, U: Send, R> Observer<U> for ZipRight<T, U, R> {
    fn on_next(&self, value: U) {
        let pair = {
            let mut state = self.zipper.state.lock();
            if state.done {
                return;
            }
            state.right.push_back(value);
            match state.left.pop_front() {
                Some(l) => state.right.pop_front().map(|r| (l, r)),
                None => None,
            }
        };
        self.zipper.emit(pair);
    }

    fn on_error(&self, error: probewire_core::ProbeWireError) {
        self.zipper.fail(error);
    }

    fn on_completed(&self) {
        self.zipper.state.lock().right_done = true;
        self.zipper.emit(None);
    }
}

struct MergeState {
    active: usize,
    next_id: u64,
    inner: HashMap<u64, Subscription>,
}

struct Merge<U> {
    state: Mutex<MergeState>,
    downstream: SharedObserver<U>,
}

impl<U: Send + 'static> Merge<U> {
    fn subscribe_inner(self: &Arc<Self>, stream: &Observable<U>) {
        let slot = Subscription::new();
        let id = {
            let mut state = self.state.lock();
            state.active += 1;
            state.next_id += 1;
            let id = state.next_id;
            state.inner.insert(id, slot.clone());
            id
        };
        let downstream = self.downstream.clone();
        let errors = self.downstream.clone();
        let merge = self.clone();
        let observer = FunctionObserver::new(move |v| downstream.on_next(v))
            .with_error(move |e| errors.on_error(e))
            .with_completed(move || {
                merge.state.lock().inner.remove(&id);
                merge.finish_one();
            });
        slot.add_subscription(stream.subscribe(observer.shared()));
    }

    fn finish_one(&self) {
        let finished = {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            state.active == 0
        };
        if finished {
            self.downstream.on_completed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::Subject;

    fn collect<T: Clone + Send + Sync + 'static>(stream: &Observable<T>) -> (Arc<Mutex<Vec<T>>>, Arc<Mutex<bool>>) {
        let values = Arc::new(Mutex::new(Vec::new()));
        let completed = Arc::new(Mutex::new(false));
        let (sink, done) = (values.clone(), completed.clone());
        stream.subscribe(
            FunctionObserver::new(move |v| sink.lock().push(v))
                .with_completed(move || *done.lock() = true)
                .shared(),
        );
        (values, completed)
    }

    #[test]
    fn test_map_filter_skip_take() {
        let stream = Observable::of((1..=10).collect::<Vec<i32>>())
            .map(|v| v * 10)
            .filter(|v| v % 20 == 0)
            .skip(1)
            .take(2);
        let (values, completed) = collect(&stream);
        assert_eq!(*values.lock(), vec![40, 60]);
        assert!(*completed.lock());
    }

    #[test]
    fn test_take_unsubscribes_hot_source() {
        let subject = Subject::new();
        let (values, completed) = collect(&subject.as_observable().take(1));
        subject.on_next(1);
        subject.on_next(2);
        assert_eq!(*values.lock(), vec![1]);
        assert!(*completed.lock());
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn test_reductions() {
        let values = vec![3.0, 1.0, 2.0];
        let (sum, _) = collect(&Observable::of(values.clone()).sum());
        let (min, _) = collect(&Observable::of(values.clone()).min());
        let (max, _) = collect(&Observable::of(values.clone()).max());
        let (avg, _) = collect(&Observable::of(values.clone()).average());
        let (count, _) = collect(&Observable::of(values).count());
        assert_eq!(*sum.lock(), vec![6.0]);
        assert_eq!(*min.lock(), vec![1.0]);
        assert_eq!(*max.lock(), vec![3.0]);
        assert_eq!(*avg.lock(), vec![2.0]);
        assert_eq!(*count.lock(), vec![3]);
    }

    #[test]
    fn test_empty_reductions() {
        let (avg, done) = collect(&Observable::<f64>::empty().average());
        assert!(avg.lock().is_empty());
        assert!(*done.lock());
        let (sum, _) = collect(&Observable::<f64>::empty().sum());
        assert_eq!(*sum.lock(), vec![0.0]);
        let (count, _) = collect(&Observable::<f64>::empty().count());
        assert_eq!(*count.lock(), vec![0]);
    }

    #[test]
    fn test_zip_consecutive_pairs_hot_and_cold() {
        let cold = Observable::of(vec![1, 2, 3, 4]);
        let (pairs, done) = collect(&cold.zip(&cold.skip(1), |a, b| (a, b)));
        assert_eq!(*pairs.lock(), vec![(1, 2), (2, 3), (3, 4)]);
        assert!(*done.lock());

        let subject = Subject::new();
        let hot = subject.as_observable();
        let (pairs, done) = collect(&hot.zip(&hot.skip(1), |a, b| (a, b)));
        for v in 1..=3 {
            subject.on_next(v);
        }
        subject.on_completed();
        assert_eq!(*pairs.lock(), vec![(1, 2), (2, 3)]);
        assert!(*done.lock());
    }

    #[test]
    fn test_flat_map_waits_for_inner_streams() {
        let outer = Subject::new();
        let inner = Subject::new();
        let inner_stream = inner.as_observable();
        let stream = outer
            .as_observable()
            .flat_map(move |v: i32| if v == 0 { inner_stream.clone() } else { Observable::just(v) });
        let (values, done) = collect(&stream);

        outer.on_next(0);
        outer.on_next(7);
        inner.on_next(1);
        outer.on_completed();
        assert!(!*done.lock());
        inner.on_next(2);
        inner.on_completed();

        assert_eq!(*values.lock(), vec![7, 1, 2]);
        assert!(*done.lock());
    }

    #[test]
    fn test_flat_map_unsubscribe_reaches_inner() {
        let outer = Subject::new();
        let inner = Subject::<i32>::new();
        let inner_stream = inner.as_observable();
        let subscription = outer.as_observable().flat_map(move |_: i32| inner_stream.clone()).subscribe_next(|_| {});
        outer.on_next(1);
        assert_eq!(inner.observer_count(), 1);
        subscription.unsubscribe();
        assert_eq!(inner.observer_count(), 0);
        assert_eq!(outer.observer_count(), 0);
    }
}

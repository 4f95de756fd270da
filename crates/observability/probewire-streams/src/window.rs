//! Time windows.
//!
//! Window boundaries are driven by the Tokio clock. A background task wakes
//! at the next boundary, and every incoming value first processes the
//! boundaries already due, so a value never lands in a window whose close
//! time has passed.

use crate::observable::Observable;
use crate::observer::{Observer, SharedObserver};
use crate::subject::Subject;
use crate::subscription::Subscription;
use parking_lot::Mutex;
use probewire_core::ProbeWireError;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::trace;

const MIN_PERIOD: Duration = Duration::from_millis(1);

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    /// Contiguous windows of `span`
    #[must_use]
    pub fn window_with_time(&self, span: Duration) -> Observable<Observable<T>> {
        self.window_with_time_and_shift(span, span)
    }

    /// Open a window every `shift`; each collects the values of the following
    /// `span` and then completes. The first window opens on subscribe.
    ///
    /// Must be subscribed inside a Tokio runtime.
    #[must_use]
    pub fn window_with_time_and_shift(&self, span: Duration, shift: Duration) -> Observable<Observable<T>> {
        let source = self.clone();
        let span = span.max(MIN_PERIOD);
        let shift = shift.max(MIN_PERIOD);
        Observable::create(move |downstream| {
            let windower = Arc::new(Windower {
                state: Mutex::new(WindowState {
                    next_open: Instant::now(),
                    windows: VecDeque::new(),
                    done: false,
                }),
                span,
                shift,
                downstream,
            });
            windower.advance(Instant::now());

            let subscription = Subscription::new();
            let ticker = tokio::spawn(Windower::run(Arc::downgrade(&windower)));
            let teardown = windower.clone();
            subscription.add(move || {
                ticker.abort();
                let mut state = teardown.state.lock();
                state.done = true;
                state.windows.clear();
            });
            subscription.add_subscription(source.subscribe(windower));
            subscription
        })
    }
}

struct WindowState<T> {
    next_open: Instant,
    // ordered by close time
    windows: VecDeque<(Instant, Subject<T>)>,
    done: bool,
}

enum Boundary<T> {
    Close(Subject<T>),
    Open(Subject<T>),
}

struct Windower<T> {
    state: Mutex<WindowState<T>>,
    span: Duration,
    shift: Duration,
    downstream: SharedObserver<Observable<T>>,
}

impl<T: Clone + Send + Sync + 'static> Windower<T> {
    async fn run(windower: Weak<Self>) {
        loop {
            let deadline = match windower.upgrade() {
                Some(w) => match w.next_deadline() {
                    Some(deadline) => deadline,
                    None => return,
                },
                None => return,
            };
            time::sleep_until(deadline).await;
            match windower.upgrade() {
                Some(w) => w.advance(Instant::now()),
                None => return,
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let state = self.state.lock();
        if state.done {
            return None;
        }
        let close = state.windows.front().map(|(close_at, _)| *close_at);
        Some(close.map_or(state.next_open, |close| close.min(state.next_open)))
    }

    /// Process every boundary at or before `now`; closes win ties
    fn advance(&self, now: Instant) {
        loop {
            let boundary = {
                let mut state = self.state.lock();
                if state.done {
                    return;
                }
                let close = state.windows.front().map(|(close_at, _)| *close_at);
                match close {
                    Some(close_at) if close_at <= now && close_at <= state.next_open => {
                        state.windows.pop_front().map(|(_, subject)| Boundary::Close(subject))
                    }
                    _ if state.next_open <= now => {
                        let subject = Subject::new();
                        let close_at = state.next_open + self.span;
                        state.windows.push_back((close_at, subject.clone()));
                        state.next_open += self.shift;
                        Some(Boundary::Open(subject))
                    }
                    _ => None,
                }
            };
            match boundary {
                Some(Boundary::Close(subject)) => subject.on_completed(),
                Some(Boundary::Open(subject)) => {
                    trace!("window opened");
                    self.downstream.on_next(subject.as_observable());
                }
                None => return,
            }
        }
    }

    fn terminate(&self) -> Vec<Subject<T>> {
        let mut state = self.state.lock();
        if state.done {
            return Vec::new();
        }
        state.done = true;
        state.windows.drain(..).map(|(_, subject)| subject).collect()
    }
}

impl<T: Clone + Send + Sync + 'static> Observer<T> for Windower<T> {
    fn on_next(&self, value: T) {
        self.advance(Instant::now());
        let open: Vec<Subject<T>> = {
            let state = self.state.lock();
            if state.done {
                return;
            }
            state.windows.iter().map(|(_, subject)| subject.clone()).collect()
        };
        for subject in open {
            subject.on_next(value.clone());
        }
    }

    fn on_error(&self, error: ProbeWireError) {
        for subject in self.terminate() {
            subject.on_error(error.clone());
        }
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        for subject in self.terminate() {
            subject.on_completed();
        }
        self.downstream.on_completed();
    }
}

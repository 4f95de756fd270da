//! Multicast source

use crate::observable::Observable;
use crate::observer::{Observer, SharedObserver};
use crate::subscription::Subscription;
use parking_lot::Mutex;
use probewire_core::ProbeWireError;
use std::fmt;
use std::sync::{Arc, Weak};

#[derive(Clone)]
enum Terminal {
    Completed,
    Errored(ProbeWireError),
}

struct SubjectState<T> {
    observers: Vec<(u64, SharedObserver<T>)>,
    next_id: u64,
    terminal: Option<Terminal>,
}

/// Hot source delivering each value to every current observer in
/// subscription order. Completion is terminal; late subscribers only see the
/// terminal notification.
pub struct Subject<T> {
    state: Arc<Mutex<SubjectState<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self { state: self.state.clone() }
    }
}

impl<T> Default for Subject<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(SubjectState {
                observers: Vec::new(),
                next_id: 0,
                terminal: None,
            })),
        }
    }
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Subject")
            .field("observers", &state.observers.len())
            .field("terminated", &state.terminal.is_some())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Subject<T> {
    /// Create an open subject
    #[must_use] pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer
    pub fn subscribe(&self, observer: SharedObserver<T>) -> Subscription {
        let id = {
            let mut state = self.state.lock();
            match state.terminal.clone() {
                Some(terminal) => {
                    drop(state);
                    match terminal {
                        Terminal::Completed => observer.on_completed(),
                        Terminal::Errored(error) => observer.on_error(error),
                    }
                    return Subscription::closed();
                }
                None => {
                    state.next_id += 1;
                    let id = state.next_id;
                    state.observers.push((id, observer));
                    id
                }
            }
        };
        let weak: Weak<Mutex<SubjectState<T>>> = Arc::downgrade(&self.state);
        Subscription::from_fn(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().observers.retain(|(observer_id, _)| *observer_id != id);
            }
        })
    }

    /// View as an [`Observable`]
    #[must_use] pub fn as_observable(&self) -> Observable<T> {
        let subject = self.clone();
        Observable::create(move |observer| subject.subscribe(observer))
    }

    /// Number of attached observers
    #[must_use] pub fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }

    /// Whether the subject completed or failed
    #[must_use] pub fn is_terminated(&self) -> bool {
        self.state.lock().terminal.is_some()
    }

    fn snapshot(&self) -> Vec<SharedObserver<T>> {
        let state = self.state.lock();
        if state.terminal.is_some() {
            return Vec::new();
        }
        state.observers.iter().map(|(_, o)| o.clone()).collect()
    }

    fn terminate(&self, terminal: Terminal) -> Vec<SharedObserver<T>> {
        let mut state = self.state.lock();
        if state.terminal.is_some() {
            return Vec::new();
        }
        state.terminal = Some(terminal);
        std::mem::take(&mut state.observers)
            .into_iter()
            .map(|(_, o)| o)
            .collect()
    }
}

impl<T: Clone + Send + 'static> Observer<T> for Subject<T> {
    fn on_next(&self, value: T) {
        for observer in self.snapshot() {
            observer.on_next(value.clone());
        }
    }

    fn on_error(&self, error: ProbeWireError) {
        for observer in self.terminate(Terminal::Errored(error.clone())) {
            observer.on_error(error.clone());
        }
    }

    fn on_completed(&self) {
        for observer in self.terminate(Terminal::Completed) {
            observer.on_completed();
        }
    }
}

//! # ProbeWire Streams
//!
//! Push-based streams for consuming probe samples, plus the pieces queries
//! are built from.
//!
//! - [`Observable`], [`Subject`] and [`Observer`] with `map`, `filter`,
//!   `group_by`, `window_with_time`, `flat_map`, `zip`, `reduce` and friends
//! - [`Quantizer`] power-of-two and linear histograms
//! - [`PairFormula`] metrics over consecutive samples
//! - [`Expr`] record expressions
//! - [`QueryCompiler`] turning a [`QueryConfig`] into a pipeline
//!
//! ```rust
//! use probewire_streams::{Observable, Observer, Subject};
//! use std::sync::{Arc, Mutex};
//!
//! let subject = Subject::new();
//! let total = Arc::new(Mutex::new(0));
//! let sink = total.clone();
//! subject
//!     .as_observable()
//!     .filter(|v: &i32| v % 2 == 0)
//!     .subscribe_next(move |v| *sink.lock().unwrap() += v);
//! for v in 1..=4 {
//!     subject.on_next(v);
//! }
//! assert_eq!(*total.lock().unwrap(), 6);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod expr;
pub mod group;
pub mod observable;
pub mod observer;
pub mod operators;
pub mod pair;
pub mod quantize;
pub mod query;
pub mod subject;
pub mod subscription;
pub mod window;

pub use expr::Expr;
pub use group::GroupedObservable;
pub use observable::Observable;
pub use observer::{FunctionObserver, Observer, SharedObserver};
pub use pair::{PairFormula, PairPoint};
pub use quantize::{Bucket, Histogram, Linear, Pow2, Quantizer, Scale};
pub use query::{CompiledQuery, QueryCallback, QueryCompiler, QueryConfig, Reducer, WindowSpec};
pub use subject::Subject;
pub use subscription::Subscription;

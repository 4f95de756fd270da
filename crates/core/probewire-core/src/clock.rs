//! Producer-local wall clock.
//!
//! Sample timestamps are epoch milliseconds, but rate limiting and window
//! boundaries must follow the same monotonic clock that drives the Tokio
//! timers. The epoch is read once and advanced by `tokio::time::Instant`, which
//! also keeps paused-time tests deterministic.

use chrono::Utc;
use once_cell::sync::Lazy;
use tokio::time::Instant;

static ANCHOR: Lazy<(Instant, i64)> = Lazy::new(|| (Instant::now(), Utc::now().timestamp_millis()));

/// Current time in milliseconds since the Unix epoch
#[must_use] pub fn now_millis() -> i64 {
    let (anchor, epoch_ms) = *ANCHOR;
    let now = Instant::now();
    // Each paused test runtime has its own virtual clock, which may sit behind
    // the anchor; differences stay exact either way.
    let offset_ns: i128 = match now.checked_duration_since(anchor) {
        Some(ahead) => i128::try_from(ahead.as_nanos()).unwrap_or(i128::MAX),
        None => -i128::try_from(anchor.duration_since(now).as_nanos()).unwrap_or(i128::MAX),
    };
    let offset_ms = i64::try_from(offset_ns.div_euclid(1_000_000)).unwrap_or(i64::MAX);
    epoch_ms.saturating_add(offset_ms)
}

//! Process-monotonic nanosecond clock.
//!
//! All timestamps in the engine (command ingress, trades, journal entries)
//! come from this clock, so they are comparable to each other but not to
//! wall-clock time on other machines.

use std::sync::OnceLock;
use std::time::Instant;

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed since the first call in this process.
///
/// Monotonic and cheap enough for the hot path (one `Instant::elapsed`).
#[inline]
pub fn monotonic_ns() -> u64 {
    ANCHOR.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

//! Chunk operation counters
//!
//! A single process-wide counter for transcode operations, incremented from
//! independently-owned chunk-mutation call sites. Kept atomic so it needs no
//! per-chunk synchronization; the observability layer reads it through
//! [`transcode_ops`].

use std::sync::atomic::{AtomicU64, Ordering};

static TRANSCODE_OPS: AtomicU64 = AtomicU64::new(0);

/// Record one transcode operation. Called exactly once per
/// [`crate::chunk::transcode_and_add`] invocation.
pub(crate) fn record_transcode() {
    TRANSCODE_OPS.fetch_add(1, Ordering::Relaxed);
}

/// Total number of transcode operations since process start.
pub fn transcode_ops() -> u64 {
    TRANSCODE_OPS.load(Ordering::Relaxed)
}

/// Serializes tests that assert on process-global state (the transcode
/// counter and the default encoding), which other tests mutate concurrently.
#[cfg(test)]
pub(crate) fn global_state_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! Process-wide cooperative abort flag.
//!
//! All blocking operations in `walk` and `store::copier` poll [`aborting`] at node and
//! I/O-chunk boundaries. There is exactly one flag per process.

use std::sync::atomic::{AtomicBool, Ordering};

static ABORT: AtomicBool = AtomicBool::new(false);

/// Request that any in-progress walk or copy stop at its next poll point.
pub fn request_abort() {
    ABORT.store(true, Ordering::SeqCst);
}

/// Clear a previously requested abort, e.g. before starting a new backup.
pub fn reset() {
    ABORT.store(false, Ordering::SeqCst);
}

/// Whether an abort has been requested.
#[must_use]
pub fn aborting() -> bool {
    ABORT.load(Ordering::SeqCst)
}

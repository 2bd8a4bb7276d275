//! Diagnostic/progress logging for the runner itself.
//!
//! Standard output is reserved for TAP — nothing here ever writes there.
//! Verbosity is a single process-global `AtomicBool`, read by the
//! `vprintln!` macro, mirroring the build tool's own `verbose` module rather
//! than pulling in an external logging framework for a harness this small.

use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Reads `TAPDANCE_VERBOSE` once and latches the result. Subsequent calls
/// are idempotent; later changes to the environment are not observed.
pub fn init() {
    let enabled = std::env::var_os("TAPDANCE_VERBOSE").is_some_and(|v| v != "0" && v != "");
    VERBOSE.store(enabled, Ordering::Relaxed);
}

/// Returns `true` if verbose diagnostics are enabled.
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Print a message to stderr only when verbose mode is enabled.
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::diag::is_verbose() {
            eprintln!($($arg)*);
        }
    };
}

pub(crate) use vprintln;

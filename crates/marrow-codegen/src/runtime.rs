//! Runtime support functions mapped into JIT-compiled code.
//!
//! The only hook today is the uninitialised-use report: code paths that
//! read a variable with no reaching def call it before substituting a zero
//! value, so the host can observe the condition.

use std::sync::atomic::{AtomicBool, Ordering};

static UNINIT_REPORTED: AtomicBool = AtomicBool::new(false);

/// Called by compiled code when an undefined value is read.
pub extern "C" fn marrow_report_uninit() {
    UNINIT_REPORTED.store(true, Ordering::SeqCst);
}

/// Whether any compiled function reported an uninitialised read since the
/// last [`reset_uninit_flag`].
pub fn uninit_reported() -> bool {
    UNINIT_REPORTED.load(Ordering::SeqCst)
}

/// Clears the uninitialised-read flag.
pub fn reset_uninit_flag() {
    UNINIT_REPORTED.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_roundtrip() {
        reset_uninit_flag();
        assert!(!uninit_reported());
        marrow_report_uninit();
        assert!(uninit_reported());
        reset_uninit_flag();
        assert!(!uninit_reported());
    }
}

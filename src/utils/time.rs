//! Monotonic wall clock as f64 seconds
//!
//! All timestamps in the client core (operation start/end, pacing deadlines,
//! moderation) are seconds since an anchor taken at first use. A single
//! monotonic source keeps latency math immune to wall-clock steps.

use std::sync::OnceLock;
use std::time::Instant;

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Seconds elapsed since the process clock anchor.
#[inline]
pub fn now() -> f64 {
    ANCHOR.get_or_init(Instant::now).elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let a = now();
        let b = now();
        assert!(b >= a);
        assert!(a >= 0.0);
    }
}

//! Race-safe one-shot gates: [`Latch`], [`Once`], [`VolatileBarrier`].
//!
//! Grounded on the single-shot `AtomicUsize` status-word idiom in
//! `examples/other_examples/17efcbb9_dgrunwald-rust-cancellation__lib.rs.rs`.

use std::sync::atomic::{AtomicBool, Ordering};

/// A compare-and-swap gate that returns `true` to exactly one caller across
/// any number of concurrent callers.
#[derive(Debug, Default)]
pub struct Latch(AtomicBool);

impl Latch {
    pub fn new() -> Self {
        Latch(AtomicBool::new(false))
    }

    /// Returns `true` exactly once; every other call (from any thread)
    /// returns `false`.
    pub fn signal(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_signalled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Guards a thunk so it runs at most once, regardless of how many callers
/// invoke [`Once::call_once`] concurrently.
#[derive(Debug, Default)]
pub struct Once {
    latch: Latch,
}

impl Once {
    pub fn new() -> Self {
        Once {
            latch: Latch::new(),
        }
    }

    /// Runs `f` iff this is the first call; returns whether `f` ran.
    pub fn call_once(&self, f: impl FnOnce()) -> bool {
        if self.latch.signal() {
            f();
            true
        } else {
            false
        }
    }

    pub fn has_run(&self) -> bool {
        self.latch.is_signalled()
    }
}

/// A plain `bool` shared across threads with acquire/release semantics,
/// used where a value (not a one-shot transition) needs to be observed
/// consistently without a full mutex.
#[derive(Debug)]
pub struct VolatileBarrier(AtomicBool);

impl VolatileBarrier {
    pub fn new(initial: bool) -> Self {
        VolatileBarrier(AtomicBool::new(initial))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_fires_once() {
        let l = Latch::new();
        assert!(l.signal());
        assert!(!l.signal());
        assert!(!l.signal());
    }

    #[test]
    fn once_runs_exactly_once() {
        let once = Once::new();
        let mut count = 0;
        once.call_once(|| count += 1);
        once.call_once(|| count += 1);
        assert_eq!(count, 1);
        assert!(once.has_run());
    }
}

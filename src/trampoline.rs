//! Per-thread bind-counting trampoline used to bound synchronous recursion
//! across long chains of [`crate::combinators::bind`].

use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::computation::Completion;

thread_local! {
    /// Whether the current thread already owns an active trampoline scope.
    /// Set by whichever `execute` call installs it, cleared only by that
    /// same call on the way out.
    static ON_TRAMPOLINE: Cell<bool> = Cell::new(false);
}

/// Returns true if the current thread is already running under a trampoline.
pub fn is_on_trampoline() -> bool {
    ON_TRAMPOLINE.with(|c| c.get())
}

type StoredAction = Box<dyn FnOnce() -> Completion + Send>;

/// Bounds synchronous recursion depth for one top-level execution step.
///
/// The bind counter and stored-continuation slot are logically thread-local
/// (a `Trampoline` is only ever driven by the thread that called
/// [`Trampoline::execute`]); they are backed by atomics/a mutex purely so
/// the owning [`crate::trampoline::TrampolineHolder`] can be `Send + Sync`
/// for sharing across an `Arc<Aux>`, not because of real contention.
pub struct Trampoline {
    bind_count: AtomicU32,
    hijack_threshold: u32,
    stored: Mutex<Option<StoredAction>>,
}

impl Trampoline {
    pub fn new(hijack_threshold: u32) -> Self {
        Trampoline {
            bind_count: AtomicU32::new(0),
            hijack_threshold,
            stored: Mutex::new(None),
        }
    }

    /// Increments the bind counter, returning true once it has reached the
    /// hijack threshold (and resetting it back to zero).
    pub fn increment_bind_count(&self) -> bool {
        let prev = self.bind_count.fetch_add(1, Ordering::AcqRel);
        if prev + 1 >= self.hijack_threshold {
            self.bind_count.store(0, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Stores `action` to be run by the enclosing `execute` loop.
    ///
    /// Panics if a continuation is already stored — at most one may be
    /// pending at a time within a single trampoline scope.
    fn set(&self, action: StoredAction) {
        let mut slot = self.stored.lock().unwrap();
        assert!(
            slot.is_none(),
            "cpsync: trampoline already has a stored continuation"
        );
        *slot = Some(action);
    }

    fn take(&self) -> Option<StoredAction> {
        self.stored.lock().unwrap().take()
    }

    /// If the bind count has reached the threshold, defers `cont(value)`
    /// onto the trampoline's run loop and returns immediately; otherwise
    /// tail-calls `cont(value)` directly.
    pub fn hijack_check_then_call<T>(
        &self,
        cont: impl FnOnce(T) -> Completion + Send + 'static,
        value: T,
    ) -> Completion
    where
        T: Send + 'static,
    {
        if self.increment_bind_count() {
            tracing::trace!("cpsync: trampoline hijack, deferring continuation");
            self.set(Box::new(move || cont(value)));
            Completion::pending()
        } else {
            cont(value)
        }
    }

    /// Runs `first`, then drains the stored-continuation slot until empty.
    /// Installs the thread-local "on trampoline" flag if not already set,
    /// and only clears it if this call installed it.
    pub fn execute(&self, first: impl FnOnce() -> Completion + Send + 'static) -> Completion {
        let installed = ON_TRAMPOLINE.with(|c| {
            if c.get() {
                false
            } else {
                c.set(true);
                true
            }
        });

        let mut result = first();
        while let Some(action) = self.take() {
            result = action();
        }

        if installed {
            ON_TRAMPOLINE.with(|c| c.set(false));
        }
        result
    }
}

/// Owns the active trampoline for one top-level execution step and exposes
/// the scheduling primitives everything else is built on: post to a sync
/// context, queue to the default pool, or start a dedicated thread.
pub struct TrampolineHolder {
    trampoline: Trampoline,
}

impl TrampolineHolder {
    pub fn new(hijack_threshold: u32) -> Self {
        TrampolineHolder {
            trampoline: Trampoline::new(hijack_threshold),
        }
    }

    pub fn trampoline(&self) -> &Trampoline {
        &self.trampoline
    }

    /// The hijack threshold this holder's trampoline was built with, so a
    /// boundary crossing to a new holder can carry the same configured
    /// value forward instead of silently reverting to the default.
    pub fn hijack_threshold(&self) -> u32 {
        self.trampoline.hijack_threshold
    }

    /// Allocates a fresh holder and runs `first` under its trampoline.
    pub fn execute_with_trampoline(
        hijack_threshold: u32,
        first: impl FnOnce(std::sync::Arc<TrampolineHolder>) -> Completion + Send + 'static,
    ) -> Completion {
        let holder = std::sync::Arc::new(TrampolineHolder::new(hijack_threshold));
        let for_trampoline = holder.clone();
        holder
            .trampoline
            .execute(move || first(for_trampoline))
    }

    /// Posts `f` to `ctx`, which will run it under a fresh trampoline.
    pub fn post_with_trampoline(
        ctx: &std::sync::Arc<dyn crate::sync_context::SyncContext>,
        hijack_threshold: u32,
        f: impl FnOnce(std::sync::Arc<TrampolineHolder>) -> Completion + Send + 'static,
    ) {
        ctx.post(Box::new(move || {
            TrampolineHolder::execute_with_trampoline(hijack_threshold, f);
        }));
    }

    /// Queues `f` onto the default worker pool, which will run it under a
    /// fresh trampoline.
    pub fn queue_work_item_with_trampoline(
        hijack_threshold: u32,
        f: impl FnOnce(std::sync::Arc<TrampolineHolder>) -> Completion + Send + 'static,
    ) -> Result<(), crate::error::Error> {
        crate::pool::queue_work_item(move || {
            TrampolineHolder::execute_with_trampoline(hijack_threshold, f);
        })
    }

    /// Posts to `ctx` if present, otherwise queues on the default pool.
    pub fn post_or_queue_with_trampoline(
        ctx: Option<std::sync::Arc<dyn crate::sync_context::SyncContext>>,
        hijack_threshold: u32,
        f: impl FnOnce(std::sync::Arc<TrampolineHolder>) -> Completion + Send + 'static,
    ) {
        match ctx {
            Some(ctx) => TrampolineHolder::post_with_trampoline(&ctx, hijack_threshold, f),
            None => {
                let _ = TrampolineHolder::queue_work_item_with_trampoline(hijack_threshold, f);
            }
        }
    }

    /// Starts a dedicated background thread running `f` under a fresh
    /// trampoline.
    pub fn start_thread_with_trampoline(
        hijack_threshold: u32,
        f: impl FnOnce(std::sync::Arc<TrampolineHolder>) -> Completion + Send + 'static,
    ) {
        std::thread::Builder::new()
            .name("cpsync-dedicated-thread".into())
            .spawn(move || {
                TrampolineHolder::execute_with_trampoline(hijack_threshold, f);
            })
            .expect("cpsync: failed to start dedicated thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hijacks_after_threshold() {
        let t = Trampoline::new(3);
        assert!(!t.increment_bind_count());
        assert!(!t.increment_bind_count());
        assert!(t.increment_bind_count());
        // counter reset
        assert!(!t.increment_bind_count());
    }

    #[test]
    fn execute_drains_stored_chain() {
        thread_local! {
            static TRAMP: Trampoline = Trampoline::new(1);
        }

        fn step(depth: std::sync::Arc<AtomicU32>, n: u32) -> Completion {
            depth.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Completion::done()
            } else {
                TRAMP.with(|t| t.hijack_check_then_call(move |n| step(depth, n), n - 1))
            }
        }

        let depth = std::sync::Arc::new(AtomicU32::new(0));
        let depth_for_run = depth.clone();
        TRAMP.with(|t| t.execute(move || step(depth_for_run, 5)));
        assert_eq!(depth.load(Ordering::SeqCst), 6);
    }
}

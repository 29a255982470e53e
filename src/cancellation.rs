//! Cooperative cancellation: [`CancellationTokenSource`], [`CancellationToken`],
//! and [`LinkedSubSource`].
//!
//! Grounded on `examples/other_examples/17efcbb9_dgrunwald-rust-cancellation__lib.rs.rs`
//! for the overall shape — in particular, checking the atomic status word
//! *before* touching the registration-list lock, so a callback that
//! re-enters `cancel()` or `register()` from inside another callback cannot
//! deadlock against its own mutex. Unlike that reference, which threads an
//! intrusive doubly-linked list of `Registration<'a>` nodes through raw
//! pointers (`unsafe impl Sync`/`Send`), this crate uses a safe
//! `Mutex<Vec<(id, callback)>>` keyed by a monotonic id — the registration
//! counts in this domain (closures per in-flight await) are small enough
//! that O(n) removal is not a concern, and it costs no `unsafe`.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

const NOT_CANCELLED: u8 = 0;
const CANCELLING: u8 = 1;
const CANCELLED: u8 = 2;

type Callback = Box<dyn FnOnce() + Send>;

struct Inner {
    status: AtomicU8,
    next_id: AtomicU64,
    registrations: Mutex<Vec<(u64, Callback)>>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            status: AtomicU8::new(NOT_CANCELLED),
            next_id: AtomicU64::new(1),
            registrations: Mutex::new(Vec::new()),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.status.load(Ordering::Acquire) == CANCELLED
    }

    fn cancel(&self) {
        // Re-entrant cancel (a callback itself triggering cancellation of
        // the same token) returns immediately without touching the lock.
        if self.status.swap(CANCELLING, Ordering::AcqRel) != NOT_CANCELLED {
            return;
        }
        let callbacks: Vec<Callback> = {
            let mut regs = self.registrations.lock().unwrap();
            regs.drain(..).map(|(_, cb)| cb).collect()
        };
        self.status.store(CANCELLED, Ordering::Release);
        for cb in callbacks {
            cb();
        }
    }

    fn register(self: &Arc<Self>, f: Callback) -> Registration {
        // Checked before acquiring the lock: if cancellation is already
        // under way (or done), running `f` here cannot deadlock even if
        // this call itself originated from inside `cancel`'s callback loop.
        if self.status.load(Ordering::Acquire) != NOT_CANCELLED {
            f();
            return Registration {
                inner: Arc::clone(self),
                id: 0,
            };
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut regs = self.registrations.lock().unwrap();
        // Re-check under the lock: cancellation may have started between
        // the optimistic check above and acquiring the lock.
        if self.status.load(Ordering::Acquire) != NOT_CANCELLED {
            drop(regs);
            f();
            return Registration {
                inner: Arc::clone(self),
                id: 0,
            };
        }
        regs.push((id, f));
        Registration {
            inner: Arc::clone(self),
            id,
        }
    }

    fn unregister(&self, id: u64) {
        if id == 0 {
            return;
        }
        let mut regs = self.registrations.lock().unwrap();
        if let Some(pos) = regs.iter().position(|(rid, _)| *rid == id) {
            regs.remove(pos);
        }
    }
}

/// Owns the cancellable state; call [`CancellationTokenSource::cancel`] to
/// trigger it. Produce [`CancellationToken`]s to hand to computations via
/// [`CancellationTokenSource::token`].
pub struct CancellationTokenSource {
    inner: Arc<Inner>,
}

impl CancellationTokenSource {
    pub fn new() -> Self {
        CancellationTokenSource {
            inner: Arc::new(Inner::new()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Cancels the token. Idempotent; safe to call from within a
    /// registered callback.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

impl Default for CancellationTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

/// A cheaply cloneable handle observers use to check for, and react to,
/// cancellation. Carries no authority to cancel — only a
/// [`CancellationTokenSource`] can do that.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// A token that can never be cancelled.
    pub fn none() -> Self {
        static NONE: OnceLock<Arc<Inner>> = OnceLock::new();
        CancellationToken {
            inner: Arc::clone(NONE.get_or_init(|| Arc::new(Inner::new()))),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Registers `f` to run when this token is cancelled. If the token is
    /// already cancelled (or in the process of being cancelled), `f` runs
    /// synchronously before this call returns. The returned [`Registration`]
    /// removes `f` if dropped before it has fired.
    pub fn register(&self, f: impl FnOnce() + Send + 'static) -> Registration {
        self.inner.register(Box::new(f))
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A handle to a registered cancellation callback. Dropping it before the
/// token cancels removes the callback; dropping it afterward is a no-op
/// (the callback has already run and been removed from the registry).
pub struct Registration {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.inner.unregister(self.id);
    }
}

/// A composite cancellation source whose token fires when either a parent
/// token or this source's own trigger is cancelled.
pub struct LinkedSubSource {
    source: CancellationTokenSource,
    _parent_registration: Option<Registration>,
}

impl LinkedSubSource {
    pub fn new(parent: &CancellationToken) -> Self {
        let source = CancellationTokenSource::new();
        let parent_registration = if parent.is_cancelled() {
            source.cancel();
            None
        } else {
            let child_inner = Arc::clone(&source.inner);
            Some(parent.register(move || {
                child_inner.cancel();
            }))
        };
        LinkedSubSource {
            source,
            _parent_registration: parent_registration,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.source.token()
    }

    /// Cancels this sub-source directly (the "internal trigger" path),
    /// independent of the parent.
    pub fn cancel(&self) {
        self.source.cancel();
    }
}

fn default_source_slot() -> &'static RwLock<Arc<CancellationTokenSource>> {
    static SLOT: OnceLock<RwLock<Arc<CancellationTokenSource>>> = OnceLock::new();
    SLOT.get_or_init(|| RwLock::new(Arc::new(CancellationTokenSource::new())))
}

/// The process-wide default cancellation token, shared by any computation
/// that does not carry its own. Replaced (not mutated) by
/// [`cancel_default_token`].
pub fn default_cancellation_token() -> CancellationToken {
    default_source_slot().read().unwrap().token()
}

/// Cancels the current default token and publishes a fresh
/// [`CancellationTokenSource`] in its place. The new source is published
/// before the old one is cancelled, so no caller can observe the default
/// token sitting in a cancelled steady state.
pub fn cancel_default_token() {
    let fresh = Arc::new(CancellationTokenSource::new());
    let stale = {
        let mut slot = default_source_slot().write().unwrap();
        std::mem::replace(&mut *slot, fresh)
    };
    stale.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fires_registered_callbacks_once() {
        let source = CancellationTokenSource::new();
        let token = source.token();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&count);
        let _reg = token.register(move || {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        source.cancel();
        source.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(token.is_cancelled());
    }

    #[test]
    fn register_after_cancel_runs_immediately() {
        let source = CancellationTokenSource::new();
        source.cancel();
        let token = source.token();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        let _reg = token.register(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_registration_does_not_fire() {
        let source = CancellationTokenSource::new();
        let token = source.token();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&count);
        {
            let _reg = token.register(move || {
                c1.fetch_add(1, Ordering::SeqCst);
            });
        }
        source.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reentrant_cancel_from_callback_does_not_deadlock() {
        let source = Arc::new(CancellationTokenSource::new());
        let token = source.token();
        let inner = Arc::clone(&source);
        let _reg = token.register(move || {
            inner.cancel();
        });
        source.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn linked_sub_source_fires_with_parent() {
        let parent_source = CancellationTokenSource::new();
        let parent = parent_source.token();
        let linked = LinkedSubSource::new(&parent);
        assert!(!linked.token().is_cancelled());
        parent_source.cancel();
        assert!(linked.token().is_cancelled());
    }

    #[test]
    fn linked_sub_source_fires_internally() {
        let parent_source = CancellationTokenSource::new();
        let parent = parent_source.token();
        let linked = LinkedSubSource::new(&parent);
        linked.cancel();
        assert!(linked.token().is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn none_token_never_cancels() {
        let none = CancellationToken::none();
        assert!(!none.is_cancelled());
    }

    #[test]
    fn cancel_default_token_replaces_rather_than_leaves_cancelled() {
        let before = default_cancellation_token();
        assert!(!before.is_cancelled());
        cancel_default_token();
        assert!(before.is_cancelled());
        let after = default_cancellation_token();
        assert!(!after.is_cancelled());
    }
}

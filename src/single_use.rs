//! [`SingleUse`]: lets a `Fn` closure take ownership of a captured value
//! exactly once.
//!
//! Several combinators and bridges share one captured continuation (a
//! `FnOnce`) between two or more `Arc<dyn Fn>` paths where at most one path
//! ever actually runs in practice (a success path and an exception path, a
//! result and a timeout) but the type system cannot see that invariant.
//! `SingleUse` makes it explicit and enforces it at runtime instead.

use std::sync::Mutex;

pub(crate) struct SingleUse<F>(Mutex<Option<F>>);

impl<F> SingleUse<F> {
    pub(crate) fn new(f: F) -> Self {
        SingleUse(Mutex::new(Some(f)))
    }

    /// Takes the wrapped value. Panics if called more than once — exactly
    /// one of the paths sharing a `SingleUse` is ever supposed to win.
    pub(crate) fn take(&self) -> F {
        self.0
            .lock()
            .unwrap()
            .take()
            .expect("cpsync: continuation invoked more than once")
    }
}

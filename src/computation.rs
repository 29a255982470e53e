//! The [`Computation`] value type and the [`Completion`] marker it returns.

use std::sync::Arc;

use crate::activation::Activation;

/// A zero-sized marker returned by every step of a computation.
///
/// Invoking a computation never yields a meaningful value directly — the
/// result, if any, is delivered through one of the three continuations in
/// the activation it was given. `Completion` exists so that forgetting to
/// tail-call into the next step (and instead discarding the return value of
/// an inner call) is at least visible at the type level, even though Rust
/// gives no hard guarantee of tail-call elimination the way this marker's
/// origin in other runtimes implies.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion(());

impl Completion {
    /// A step has finished without deferring further work.
    pub fn done() -> Self {
        Completion(())
    }

    /// A step has suspended: control returns to the caller, and the
    /// continuation will be invoked later by some other party (the
    /// trampoline's run loop, a result cell, a timer, ...).
    pub fn pending() -> Self {
        Completion(())
    }
}

type Inner<T> = Arc<dyn Fn(Activation<T>) -> Completion + Send + Sync>;

/// An opaque, deferred computation yielding a value of type `T`.
///
/// A `Computation<T>` is cheap to clone (it is reference-counted) and
/// produces no side effects until it is handed an [`Activation`] by a
/// runner or a combinator.
pub struct Computation<T> {
    inner: Inner<T>,
}

impl<T> Computation<T> {
    /// Wraps a raw step function as a computation.
    pub fn new(f: impl Fn(Activation<T>) -> Completion + Send + Sync + 'static) -> Self {
        Computation { inner: Arc::new(f) }
    }

    /// Runs one step of this computation against `activation`.
    pub fn invoke(&self, activation: Activation<T>) -> Completion {
        (self.inner)(activation)
    }
}

impl<T> Clone for Computation<T> {
    fn clone(&self) -> Self {
        Computation {
            inner: self.inner.clone(),
        }
    }
}

//! [`Activation`] and the shared [`Aux`] block it carries.

use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::computation::Completion;
use crate::error::Error;
use crate::exception_info::ExceptionDispatchInfo;
use crate::trampoline::TrampolineHolder;

/// A cancellation signal delivered to the cancellation continuation,
/// carrying the token whose cancellation triggered it.
#[derive(Debug, Clone)]
pub struct Cancelled {
    pub token: CancellationToken,
}

pub type SuccessCont<T> = Box<dyn FnOnce(T) -> Completion + Send>;
pub type ExceptionCont = Arc<dyn Fn(ExceptionDispatchInfo) -> Completion + Send + Sync>;
pub type CancelCont = Arc<dyn Fn(Cancelled) -> Completion + Send + Sync>;

/// The portion of an activation that is shared, not replaced, as control
/// passes through nested combinators.
pub struct Aux {
    pub exception: ExceptionCont,
    pub cancel: CancelCont,
    pub token: CancellationToken,
    pub holder: Arc<TrampolineHolder>,
}

impl Aux {
    /// Raises `err` through the exception continuation.
    pub fn raise(&self, err: ExceptionDispatchInfo) -> Completion {
        (self.exception)(err)
    }

    /// Delivers cancellation through the cancel continuation.
    pub fn deliver_cancel(&self) -> Completion {
        (self.cancel)(Cancelled {
            token: self.token.clone(),
        })
    }

    /// Checks the token; if already cancelled, delivers cancellation and
    /// returns `Err(())`. Every primitive combinator calls this before
    /// touching user code.
    pub fn cancel_check(&self) -> Result<(), Completion> {
        if self.token.is_cancelled() {
            Err(self.deliver_cancel())
        } else {
            Ok(())
        }
    }

    pub fn with_exception(&self, exception: ExceptionCont) -> Arc<Aux> {
        Arc::new(Aux {
            exception,
            cancel: self.cancel.clone(),
            token: self.token.clone(),
            holder: self.holder.clone(),
        })
    }

    pub fn with_token(&self, token: CancellationToken) -> Arc<Aux> {
        Arc::new(Aux {
            exception: self.exception.clone(),
            cancel: self.cancel.clone(),
            token,
            holder: self.holder.clone(),
        })
    }

    pub fn with_holder(&self, holder: Arc<TrampolineHolder>) -> Arc<Aux> {
        Arc::new(Aux {
            exception: self.exception.clone(),
            cancel: self.cancel.clone(),
            token: self.token.clone(),
            holder,
        })
    }
}

/// The full context handed to one step of a [`crate::computation::Computation`].
pub struct Activation<T> {
    pub success: SuccessCont<T>,
    pub aux: Arc<Aux>,
}

impl<T> Activation<T> {
    pub fn new(success: SuccessCont<T>, aux: Arc<Aux>) -> Self {
        Activation { success, aux }
    }

    /// Rebuilds this activation around a new success continuation, keeping
    /// the same aux block.
    pub fn with_success<U>(aux: Arc<Aux>, success: SuccessCont<U>) -> Activation<U> {
        Activation { success, aux }
    }
}

/// Converts an `Error` produced by a runner-facing boundary back into an
/// [`ExceptionDispatchInfo`] suitable for routing through an exception
/// continuation (used by bridges that adapt a `Result`-returning external
/// API into the three-continuation model).
pub fn error_to_exception(err: Error) -> ExceptionDispatchInfo {
    ExceptionDispatchInfo::from_error(err)
}

//! Bridges between this crate's CPS model and the outside world: timers,
//! raw futures, task handles, begin/end-style callback APIs, event sources,
//! structured child computations, and thread/context switches.
//!
//! `await_task`'s cancellation race is a near-direct port of
//! `examples/juliusl-lifec/lifec/src/operation.rs`'s `task()` method:
//! `select! { r = task => ..., _ = cancel_source => ... }`.

use std::sync::Arc;
use std::time::Duration;

use crate::activation::{Activation, Aux, CancelCont, ExceptionCont, SuccessCont};
use crate::cancellation::{CancellationToken, LinkedSubSource, Registration};
use crate::computation::{Completion, Computation};
use crate::error::Error;
use crate::exception_info::ExceptionDispatchInfo;
use crate::gate::Latch;
use crate::result_cell::ResultCell;
use crate::single_use::SingleUse;
use crate::trampoline::TrampolineHolder;

/// Registers a one-shot oneshot-channel receiver that resolves when `token`
/// is cancelled. The returned [`Registration`] must be kept alive for as
/// long as the receiver might still be awaited, or the registration is
/// removed before it can fire.
fn cancel_future(token: &CancellationToken) -> (tokio::sync::oneshot::Receiver<()>, Registration) {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let reg = token.register(move || {
        let _ = tx.send(());
    });
    (rx, reg)
}

/// A computation that succeeds after `duration`, unless cancelled first.
pub fn sleep(duration: Duration) -> Computation<()> {
    Computation::new(move |activation: Activation<()>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }
        let threshold = activation.aux.holder.hijack_threshold();
        let success = activation.success;
        let aux = activation.aux;
        let aux_for_cancel = aux.clone();
        let (cancel_rx, reg) = cancel_future(&aux.token);

        crate::pool::spawn(async move {
            let _reg = reg;
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    let _ = TrampolineHolder::queue_work_item_with_trampoline(threshold, move |holder| {
                        aux.with_holder(holder)
                            .holder
                            .trampoline()
                            .hijack_check_then_call(success, ())
                    });
                }
                _ = cancel_rx => {
                    let _ = TrampolineHolder::queue_work_item_with_trampoline(threshold, move |holder| {
                        aux_for_cancel.with_holder(holder).deliver_cancel()
                    });
                }
            }
        });
        Completion::pending()
    })
}

/// Something that can be blocked on synchronously, optionally with a
/// timeout, the way a native OS wait handle or a manual-reset event would
/// be. The blocking wait itself runs on the default pool, never on whatever
/// thread drives the computation.
pub trait WaitHandle: Send + Sync + 'static {
    /// Blocks the calling thread until signalled or until `timeout` elapses
    /// (`None` means forever). Returns whether it was signalled.
    fn wait(&self, timeout: Option<Duration>) -> bool;
}

/// Awaits a [`WaitHandle`], delivering `true` if it signals and `false` if
/// `timeout` elapses first. A `timeout` of zero polls the handle
/// synchronously on the calling thread instead of handing the wait to the
/// pool. Otherwise a pool-queued blocking wait races a token-cancellation
/// registration; whichever settles first wins via the same CAS-guarded
/// [`Latch`] pattern `start_child` uses for its result-vs-timeout race, and
/// the registration is kept alive for the duration of the losing wait so a
/// late cancellation cannot be missed.
pub fn await_wait_handle(wh: impl WaitHandle, timeout: Option<Duration>) -> Computation<bool> {
    let wh = Arc::new(wh);
    Computation::new(move |activation: Activation<bool>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }

        if timeout == Some(Duration::ZERO) {
            let signalled = wh.wait(Some(Duration::ZERO));
            return activation
                .aux
                .holder
                .trampoline()
                .hijack_check_then_call(activation.success, signalled);
        }

        let threshold = activation.aux.holder.hijack_threshold();
        let settled = Arc::new(Latch::new());
        let success = activation.success;
        let aux = activation.aux;

        let settled_for_cancel = settled.clone();
        let aux_for_cancel = aux.clone();
        let reg = aux.token.register(move || {
            if settled_for_cancel.signal() {
                let _ = TrampolineHolder::queue_work_item_with_trampoline(threshold, move |holder| {
                    aux_for_cancel.with_holder(holder).deliver_cancel()
                });
            }
        });

        let wh = wh.clone();
        let _ = crate::pool::queue_work_item(move || {
            let _reg = reg;
            let signalled = wh.wait(timeout);
            if settled.signal() {
                let _ = TrampolineHolder::queue_work_item_with_trampoline(threshold, move |holder| {
                    aux.with_holder(holder)
                        .holder
                        .trampoline()
                        .hijack_check_then_call(success, signalled)
                });
            }
        });

        Completion::pending()
    })
}

/// Awaits a `tokio::task::JoinHandle`, converting a join error (the task
/// panicked or was aborted) into a raised exception instead of an `Err`
/// value in `T`.
pub fn await_task<T>(handle: tokio::task::JoinHandle<T>) -> Computation<T>
where
    T: Clone + Send + 'static,
{
    let handle = Arc::new(SingleUse::new(handle));
    Computation::new(move |activation: Activation<T>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }
        let threshold = activation.aux.holder.hijack_threshold();
        let success = activation.success;
        let aux = activation.aux;
        let aux_for_cancel = aux.clone();
        let aux_for_err = aux.clone();
        let (cancel_rx, reg) = cancel_future(&aux.token);
        let handle = handle.take();

        crate::pool::spawn(async move {
            let _reg = reg;
            tokio::select! {
                r = handle => {
                    match r {
                        Ok(v) => {
                            let _ = TrampolineHolder::queue_work_item_with_trampoline(threshold, move |holder| {
                                aux.with_holder(holder)
                                    .holder
                                    .trampoline()
                                    .hijack_check_then_call(success, v)
                            });
                        }
                        Err(join_err) => {
                            tracing::warn!(%join_err, "cpsync: awaited task did not complete normally");
                            let edi = ExceptionDispatchInfo::from_message(format!(
                                "cpsync: task panicked or was aborted: {join_err}"
                            ));
                            let _ = TrampolineHolder::queue_work_item_with_trampoline(threshold, move |holder| {
                                aux_for_err.with_holder(holder).raise(edi)
                            });
                        }
                    }
                }
                _ = cancel_rx => {
                    let _ = TrampolineHolder::queue_work_item_with_trampoline(threshold, move |holder| {
                        aux_for_cancel.with_holder(holder).deliver_cancel()
                    });
                }
            }
        });
        Completion::pending()
    })
}

/// Adapts a begin/end-style callback API (`begin` receives a completion
/// callback and is expected to call it exactly once) into a computation.
/// Cancellation observed before the callback fires suppresses delivery, but
/// cannot abort `begin` itself — callback-based APIs are not assumed to
/// expose a cancellation hook.
pub fn from_begin_end<T, F>(begin: F) -> Computation<T>
where
    F: FnOnce(Box<dyn FnOnce(T) + Send>) + Send + 'static,
    T: Clone + Send + 'static,
{
    let begin = Arc::new(SingleUse::new(begin));
    Computation::new(move |activation: Activation<T>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }
        let threshold = activation.aux.holder.hijack_threshold();
        let success = activation.success;
        let aux = activation.aux;
        let begin = begin.take();

        begin(Box::new(move |v: T| {
            if aux.token.is_cancelled() {
                return;
            }
            let _ = TrampolineHolder::queue_work_item_with_trampoline(threshold, move |holder| {
                aux.with_holder(holder)
                    .holder
                    .trampoline()
                    .hijack_check_then_call(success, v)
            });
        }));
        Completion::pending()
    })
}

/// Something that fires exactly once, handing its payload to a completion
/// callback, used with [`await_event`].
pub trait EventSource<T>: Send + 'static {
    fn subscribe(self: Box<Self>, on_fire: Box<dyn FnOnce(T) + Send>);
}

/// Awaits a single-fire event source.
pub fn await_event<T>(source: impl EventSource<T>) -> Computation<T>
where
    T: Clone + Send + 'static,
{
    let source: Box<dyn EventSource<T>> = Box::new(source);
    from_begin_end(move |cb| source.subscribe(cb))
}

/// Runs `handler` when cancellation is observed flowing through this scope,
/// in addition to (not instead of) propagating it outward.
pub fn on_cancel<T: Clone + Send + 'static>(
    p: Computation<T>,
    handler: impl Fn() + Send + Sync + 'static,
) -> Computation<T> {
    let handler = Arc::new(handler);
    Computation::new(move |activation: Activation<T>| {
        let handler = handler.clone();
        let outer_cancel = activation.aux.cancel.clone();
        let cancel: CancelCont = Arc::new(move |signal| {
            handler();
            outer_cancel(signal)
        });
        let inner_aux = Arc::new(Aux {
            exception: activation.aux.exception.clone(),
            cancel,
            token: activation.aux.token.clone(),
            holder: activation.aux.holder.clone(),
        });
        p.invoke(Activation::new(activation.success, inner_aux))
    })
}

/// Runs `p` as a structured child: its own linked cancellation sub-source
/// (cancelling the parent cancels the child; cancelling the child does not
/// cancel the parent), and, if `timeout` is given, races it against the
/// child's completion — whichever settles first wins, via the same
/// CAS-guarded [`Latch`] pattern `src/gate.rs` already provides.
pub fn start_child<T: Clone + Send + 'static>(
    p: Computation<T>,
    timeout: Option<Duration>,
) -> Computation<T> {
    Computation::new(move |activation: Activation<T>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }
        let threshold = activation.aux.holder.hijack_threshold();
        let sub = Arc::new(LinkedSubSource::new(&activation.aux.token));
        let child_token = sub.token();
        let cell: Arc<ResultCell<T>> = Arc::new(ResultCell::new(threshold));

        let cell_for_success = cell.clone();
        let child_success: SuccessCont<T> = Box::new(move |v: T| {
            cell_for_success.register_result(v, true);
            Completion::done()
        });

        let outer_exception = activation.aux.exception.clone();
        let child_exception: ExceptionCont = Arc::new(move |edi| outer_exception(edi));

        let sub_for_cancel = sub.clone();
        let outer_cancel = activation.aux.cancel.clone();
        let child_cancel: CancelCont = Arc::new(move |signal| {
            sub_for_cancel.cancel();
            outer_cancel(signal)
        });

        let child_aux = Arc::new(Aux {
            exception: child_exception,
            cancel: child_cancel,
            token: child_token,
            holder: activation.aux.holder.clone(),
        });

        p.invoke(Activation::new(child_success, child_aux));

        let duration = match timeout {
            None => {
                let cell_for_close = cell.clone();
                let success = activation.success;
                let wrapped: SuccessCont<T> = Box::new(move |v: T| {
                    cell_for_close.close();
                    success(v)
                });
                return cell
                    .await_result()
                    .invoke(Activation::new(wrapped, activation.aux));
            }
            Some(d) => d,
        };

        let settled = Arc::new(Latch::new());
        let outer_success = Arc::new(SingleUse::new(activation.success));
        let outer_aux = activation.aux;

        let settled_for_result = settled.clone();
        let outer_success_for_result = outer_success.clone();
        let outer_aux_for_result = outer_aux.clone();
        let cell_for_result = cell.clone();
        cell.await_result().invoke(Activation::new(
            Box::new(move |v: T| {
                cell_for_result.close();
                if settled_for_result.signal() {
                    (outer_success_for_result.take())(v)
                } else {
                    Completion::done()
                }
            }),
            outer_aux_for_result,
        ));

        crate::pool::spawn(async move {
            tokio::time::sleep(duration).await;
            if settled.signal() {
                sub.cancel();
                cell.close();
                let edi = ExceptionDispatchInfo::from_error(Error::timeout(duration));
                let _ = TrampolineHolder::queue_work_item_with_trampoline(threshold, move |holder| {
                    outer_aux.with_holder(holder).raise(edi)
                });
            }
        });

        Completion::pending()
    })
}

/// Adapts `computation` into a begin/end-style callback API: the returned
/// closure starts the computation (on its own root activation, ignoring
/// external cancellation) each time it is called and delivers the result to
/// `callback` exactly once. There is no `end`/`cancel` half to return
/// alongside it the way the ambient asynchronous-result contract in other
/// runtimes allows — an unhandled exception or cancellation becomes a panic
/// here, since a plain callback has no second channel to report anything but
/// `T`. The inverse of [`from_begin_end`].
pub fn as_begin_end<T: Clone + Send + 'static>(
    computation: Computation<T>,
) -> impl Fn(Box<dyn FnOnce(T) + Send>) + Send + Sync + 'static {
    move |callback: Box<dyn FnOnce(T) + Send>| {
        let settings = crate::settings::Settings::from_env();
        let callback = Arc::new(SingleUse::new(callback));
        let success: SuccessCont<T> = Box::new(move |v: T| {
            (callback.take())(v);
            Completion::done()
        });
        let exception: ExceptionCont =
            Arc::new(|edi| panic!("cpsync: as_begin_end's computation raised: {edi}"));
        let cancel: CancelCont =
            Arc::new(|_| panic!("cpsync: as_begin_end's computation observed cancellation"));
        let aux = Arc::new(Aux {
            exception,
            cancel,
            token: CancellationToken::none(),
            holder: Arc::new(TrampolineHolder::new(settings.hijack_threshold)),
        });
        computation.invoke(Activation::new(success, aux));
    }
}

/// Posts the remainder of the computation onto `sc`; if `sc` is `None`,
/// queues onto the default pool instead. Re-exported by `combinators` under
/// the same name used in the builder surface.
pub use crate::combinators::{switch_to_context, switch_to_new_thread, switch_to_thread_pool};

//! Entry points that turn a [`Computation`] into something that actually
//! runs: blocking (optionally with a deadline), fire-and-forget, or as a
//! joinable `tokio` task.
//!
//! `run_synchronously`/`run_synchronously_with_timeout` are grounded
//! directly on `examples/juliusl-lifec/lifec/src/operation.rs`'s `wait()`
//! and `wait_with_timeout()` — block the calling thread, optionally racing
//! a deadline, until the underlying task settles.

use std::sync::Arc;
use std::time::Duration;

use crate::activation::{Activation, Aux, CancelCont, Cancelled, ExceptionCont, SuccessCont};
use crate::cancellation::{CancellationToken, CancellationTokenSource, LinkedSubSource};
use crate::computation::{Completion, Computation};
use crate::error::Error;
use crate::exception_info::ExceptionDispatchInfo;
use crate::result_cell::ResultCell;
use crate::settings::Settings;
use crate::trampoline::TrampolineHolder;

fn root_activation<T: Clone + Send + 'static>(
    holder: Arc<TrampolineHolder>,
    token: CancellationToken,
    cell: Arc<ResultCell<Result<T, Error>>>,
) -> Activation<T> {
    let cell_for_success = cell.clone();
    let success: SuccessCont<T> = Box::new(move |v: T| {
        cell_for_success.register_result(Ok(v), true);
        Completion::done()
    });

    let cell_for_exception = cell.clone();
    let exception: ExceptionCont = Arc::new(move |edi: ExceptionDispatchInfo| {
        cell_for_exception.register_result(Err(Error::user(edi)), true);
        Completion::done()
    });

    let cell_for_cancel = cell;
    let cancel: CancelCont = Arc::new(move |signal: Cancelled| {
        cell_for_cancel.register_result(Err(Error::cancelled(signal.token)), true);
        Completion::done()
    });

    Activation::new(
        success,
        Arc::new(Aux {
            exception,
            cancel,
            token,
            holder,
        }),
    )
}

/// Runs `p` on the calling thread, blocking until it succeeds, raises, or
/// observes cancellation. There is no deadline; see
/// [`run_synchronously_with_timeout`] for a bounded wait.
pub fn run_synchronously<T: Clone + Send + 'static>(p: Computation<T>) -> Result<T, Error> {
    run_synchronously_on(p, CancellationToken::none(), None)
}

/// As [`run_synchronously`], but observing `token` for external
/// cancellation in addition to whatever `p` does on its own.
pub fn run_synchronously_cancellable<T: Clone + Send + 'static>(
    p: Computation<T>,
    token: CancellationToken,
) -> Result<T, Error> {
    run_synchronously_on(p, token, None)
}

/// As [`run_synchronously`], but gives up with `Err(Error::timeout(..))` if
/// `p` has not settled within `timeout`. Mirrors `operation.rs`'s
/// `wait_with_timeout()` (`tokio::time::timeout(timeout, task)`), except the
/// wait itself happens synchronously on the calling thread via
/// [`ResultCell::try_wait_for_result_synchronously`] rather than inside an
/// async block.
pub fn run_synchronously_with_timeout<T: Clone + Send + 'static>(
    p: Computation<T>,
    timeout: Duration,
) -> Result<T, Error> {
    run_synchronously_on(p, CancellationToken::none(), Some(timeout))
}

/// With no timeout, runs `p` directly on the calling thread and blocks
/// unbounded for its result. With a timeout, `p` is instead queued onto the
/// pool (it may still be running after the deadline, so it cannot run on
/// this thread) under a sub-source linked to `token`; if the deadline
/// passes first, the sub-source is cancelled and this thread then blocks,
/// unbounded, for `p` to actually quiesce before raising a timeout — `p` is
/// never left running unobserved in the background.
fn run_synchronously_on<T: Clone + Send + 'static>(
    p: Computation<T>,
    token: CancellationToken,
    timeout: Option<Duration>,
) -> Result<T, Error> {
    let settings = Settings::from_env();
    let cell: Arc<ResultCell<Result<T, Error>>> = Arc::new(ResultCell::new(settings.hijack_threshold));
    let threshold = settings.hijack_threshold;

    let Some(duration) = timeout else {
        let cell_for_run = cell.clone();
        TrampolineHolder::execute_with_trampoline(threshold, move |holder| {
            let activation = root_activation(holder, token, cell_for_run);
            p.invoke(activation)
        });
        return cell
            .try_wait_for_result_synchronously(None)
            .expect("cpsync: an unbounded wait cannot time out");
    };

    let sub = LinkedSubSource::new(&token);
    let child_token = sub.token();
    let cell_for_run = cell.clone();
    let _ = TrampolineHolder::queue_work_item_with_trampoline(threshold, move |holder| {
        let activation = root_activation(holder, child_token, cell_for_run);
        p.invoke(activation)
    });

    if let Some(result) = cell.try_wait_for_result_synchronously(Some(duration)) {
        return result;
    }

    sub.cancel();
    cell.try_wait_for_result_synchronously(None);
    Err(Error::timeout(duration))
}

/// Starts `p` in the background without blocking the calling thread,
/// logging (rather than propagating) any unobserved exception. Returns a
/// [`CancellationTokenSource`] the caller can use to cancel it.
pub fn start<T: Clone + Send + 'static>(p: Computation<T>) -> CancellationTokenSource {
    start_with_continuations(
        p,
        |_| {},
        |edi| tracing::warn!(%edi, "cpsync: unobserved exception from a computation started with start()"),
        |_| {},
    )
}

/// Starts `p` in the background, invoking exactly one of `on_success`,
/// `on_exception`, `on_cancel` once it settles. Returns a
/// [`CancellationTokenSource`] the caller can use to cancel it.
pub fn start_with_continuations<T>(
    p: Computation<T>,
    on_success: impl Fn(T) + Send + Sync + 'static,
    on_exception: impl Fn(ExceptionDispatchInfo) + Send + Sync + 'static,
    on_cancel: impl Fn(Cancelled) + Send + Sync + 'static,
) -> CancellationTokenSource
where
    T: Clone + Send + 'static,
{
    let settings = Settings::from_env();
    let source = CancellationTokenSource::new();
    let token = source.token();
    let threshold = settings.hijack_threshold;

    let success: SuccessCont<T> = Box::new(move |v| {
        on_success(v);
        Completion::done()
    });
    let exception: ExceptionCont = Arc::new(move |edi| {
        on_exception(edi);
        Completion::done()
    });
    let cancel: CancelCont = Arc::new(move |signal| {
        on_cancel(signal);
        Completion::done()
    });

    let _ = TrampolineHolder::queue_work_item_with_trampoline(threshold, move |holder| {
        let aux = Arc::new(Aux {
            exception,
            cancel,
            token,
            holder,
        });
        p.invoke(Activation::new(success, aux))
    });

    source
}

/// As [`start`], but begins executing `p` synchronously on the calling
/// thread instead of queueing it onto the default pool first — the
/// computation runs up to its first suspension point (or to completion, if
/// it never suspends) before this call returns.
pub fn start_immediate<T: Clone + Send + 'static>(p: Computation<T>) -> CancellationTokenSource {
    start_immediate_with_continuations(
        p,
        |_| {},
        |edi| {
            tracing::warn!(%edi, "cpsync: unobserved exception from a computation started with start_immediate()")
        },
        |_| {},
    )
}

/// As [`start_with_continuations`], but begins executing `p` synchronously
/// on the calling thread instead of queueing it onto the default pool.
pub fn start_immediate_with_continuations<T>(
    p: Computation<T>,
    on_success: impl Fn(T) + Send + Sync + 'static,
    on_exception: impl Fn(ExceptionDispatchInfo) + Send + Sync + 'static,
    on_cancel: impl Fn(Cancelled) + Send + Sync + 'static,
) -> CancellationTokenSource
where
    T: Clone + Send + 'static,
{
    let settings = Settings::from_env();
    let source = CancellationTokenSource::new();
    let token = source.token();

    let success: SuccessCont<T> = Box::new(move |v| {
        on_success(v);
        Completion::done()
    });
    let exception: ExceptionCont = Arc::new(move |edi| {
        on_exception(edi);
        Completion::done()
    });
    let cancel: CancelCont = Arc::new(move |signal| {
        on_cancel(signal);
        Completion::done()
    });

    TrampolineHolder::execute_with_trampoline(settings.hijack_threshold, move |holder| {
        let aux = Arc::new(Aux {
            exception,
            cancel,
            token,
            holder,
        });
        p.invoke(Activation::new(success, aux))
    });

    source
}

/// As [`start_as_task`], but begins executing `p` synchronously on the
/// calling thread instead of handing it to the pool via a blocking queue
/// item.
pub fn start_immediate_as_task<T: Clone + Send + 'static>(
    p: Computation<T>,
) -> tokio::task::JoinHandle<Result<T, Error>> {
    let settings = Settings::from_env();
    let cell: Arc<ResultCell<Result<T, Error>>> = Arc::new(ResultCell::new(settings.hijack_threshold));
    let cell_for_run = cell.clone();

    TrampolineHolder::execute_with_trampoline(settings.hijack_threshold, move |holder| {
        let activation = root_activation(holder, CancellationToken::none(), cell_for_run);
        p.invoke(activation)
    });

    crate::pool::spawn(async move {
        match tokio::task::spawn_blocking(move || cell.try_wait_for_result_synchronously(None)).await {
            Ok(Some(result)) => result,
            Ok(None) => unreachable!("cpsync: an unbounded wait cannot return None"),
            Err(join_err) => {
                tracing::warn!(%join_err, "cpsync: start_immediate_as_task's waiter thread panicked");
                Err(Error::misuse(
                    "cpsync: start_immediate_as_task's waiter thread panicked",
                ))
            }
        }
    })
}

/// Starts `p` on the default pool and returns a `tokio` task that resolves
/// once it settles, so an async caller can `.await` it instead of blocking.
pub fn start_as_task<T: Clone + Send + 'static>(
    p: Computation<T>,
) -> tokio::task::JoinHandle<Result<T, Error>> {
    let settings = Settings::from_env();
    let cell: Arc<ResultCell<Result<T, Error>>> = Arc::new(ResultCell::new(settings.hijack_threshold));
    let cell_for_run = cell.clone();
    let threshold = settings.hijack_threshold;

    let _ = TrampolineHolder::queue_work_item_with_trampoline(threshold, move |holder| {
        let activation = root_activation(holder, CancellationToken::none(), cell_for_run);
        p.invoke(activation)
    });

    crate::pool::spawn(async move {
        match tokio::task::spawn_blocking(move || cell.try_wait_for_result_synchronously(None)).await {
            Ok(Some(result)) => result,
            Ok(None) => unreachable!("cpsync: an unbounded wait cannot return None"),
            Err(join_err) => {
                tracing::warn!(%join_err, "cpsync: start_as_task's waiter thread panicked");
                Err(Error::misuse("cpsync: start_as_task's waiter thread panicked"))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::{bind, ret};

    #[test]
    fn run_synchronously_returns_the_value() {
        assert_eq!(run_synchronously(ret(5)), Ok(5));
    }

    #[test]
    fn run_synchronously_reports_a_caught_panic() {
        let c = bind(ret(0), |_| -> Computation<i32> { panic!("boom") });
        let result = run_synchronously(c);
        assert!(result.is_err());
        assert!(result.unwrap_err().is_user());
    }

    #[test]
    fn run_synchronously_with_timeout_times_out() {
        let c = crate::bridges::sleep(Duration::from_secs(5));
        let result = run_synchronously_with_timeout(c, Duration::from_millis(10));
        assert!(result.unwrap_err().is_timeout());
    }

    #[test]
    fn run_synchronously_cancellable_observes_a_pre_cancelled_token() {
        let source = CancellationTokenSource::new();
        source.cancel();
        let result = run_synchronously_cancellable(ret(1), source.token());
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn start_with_continuations_reaches_the_success_handler() {
        let (tx, rx) = std::sync::mpsc::channel();
        let _source = start_with_continuations(
            ret(42),
            move |v| tx.send(v).unwrap(),
            |_| panic!("unexpected exception"),
            |_| panic!("unexpected cancellation"),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 42);
    }

    #[test]
    fn start_as_task_resolves_with_the_result() {
        let handle = start_as_task(ret(9));
        let result = crate::pool::block_on(handle).unwrap();
        assert_eq!(result, Ok(9));
    }

    #[test]
    fn start_immediate_with_continuations_reaches_the_success_handler() {
        let (tx, rx) = std::sync::mpsc::channel();
        let _source = start_immediate_with_continuations(
            ret(11),
            move |v| tx.send(v).unwrap(),
            |_| panic!("unexpected exception"),
            |_| panic!("unexpected cancellation"),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 11);
    }

    #[test]
    fn start_immediate_as_task_resolves_with_the_result() {
        let handle = start_immediate_as_task(ret(13));
        let result = crate::pool::block_on(handle).unwrap();
        assert_eq!(result, Ok(13));
    }

    #[test]
    #[tracing_test::traced_test]
    fn start_immediate_logs_an_unobserved_exception() {
        // start_immediate runs synchronously on the calling thread, so the
        // warning lands on the thread this test's subscriber is scoped to
        // (a background start()'s worker thread would not).
        let failing: Computation<i32> = bind(ret(0), |_| -> Computation<i32> { panic!("boom") });
        let _source = start_immediate(failing);
        assert!(logs_contain("unobserved exception"));
    }
}

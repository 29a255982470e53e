//! Primitive combinators: `ret`, `bind`, `delay`, `sequential`, `try_finally`,
//! `try_with`, `using`, `while_loop`, `for_loop`, `ignore`, `switch_to_context`,
//! `catch`, plus the supplemented `retry`, `timeout`, `map`, `zip` sugar.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crate::activation::{Activation, Aux, CancelCont, ExceptionCont, SuccessCont};
use crate::computation::{Completion, Computation};
use crate::error::Error;
use crate::exception_info::ExceptionDispatchInfo;
use crate::gate::Once;
use crate::single_use::SingleUse;
use crate::sync_context::SyncContext;

/// Runs `f`, catching any panic and converting it into an
/// [`ExceptionDispatchInfo`] instead of letting it unwind through the
/// trampoline. This is this crate's idiomatic-Rust rendering of "capture a
/// synchronous exception raised by user code" — ordinary `Err` values
/// produced by user code are expected to flow back as part of `T`, not
/// through this path.
#[track_caller]
pub fn protect<T>(
    f: impl FnOnce() -> T + std::panic::UnwindSafe,
) -> Result<T, ExceptionDispatchInfo> {
    std::panic::catch_unwind(f).map_err(|payload| capture(&payload))
}

#[track_caller]
fn capture(payload: &Box<dyn Any + Send>) -> ExceptionDispatchInfo {
    ExceptionDispatchInfo::restore(payload)
        .unwrap_or_else(|| ExceptionDispatchInfo::from_panic(payload))
}

/// A computation that immediately succeeds with `v`.
pub fn ret<T: Clone + Send + 'static>(v: T) -> Computation<T> {
    Computation::new(move |activation: Activation<T>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }
        let v = v.clone();
        activation
            .aux
            .holder
            .trampoline()
            .hijack_check_then_call(activation.success, v)
    })
}

/// A computation that succeeds with the cancellation token carried by its
/// own activation, so computation bodies can observe the token they are
/// running under without it being threaded through explicitly.
pub fn cancellation_token() -> Computation<crate::cancellation::CancellationToken> {
    Computation::new(move |activation: Activation<crate::cancellation::CancellationToken>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }
        let token = activation.aux.token.clone();
        activation
            .aux
            .holder
            .trampoline()
            .hijack_check_then_call(activation.success, token)
    })
}

/// A computation that succeeds with `()` if its token is not cancelled, or
/// delivers cancellation otherwise. Exposes `Aux::cancel_check` (which every
/// primitive already calls internally) as a standalone combinator for
/// computation bodies that want to poll explicitly mid-chain.
pub fn cancel_check() -> Computation<()> {
    ret(())
}

/// Builds a computation directly from its three continuations, mirroring
/// the constructor every other combinator in this module is built on top
/// of. Useful for adapting APIs this crate has no dedicated bridge for.
pub fn from_continuations<T: Clone + Send + 'static>(
    f: impl Fn(SuccessCont<T>, ExceptionCont, CancelCont) -> Completion + Send + Sync + 'static,
) -> Computation<T> {
    Computation::new(move |activation: Activation<T>| {
        f(
            activation.success,
            activation.aux.exception.clone(),
            activation.aux.cancel.clone(),
        )
    })
}

/// Runs `handler` with the cancellation signal when `p` is cancelled, in
/// addition to (not instead of) propagating cancellation outward. A
/// `Cancelled`-aware counterpart to [`on_cancel`](crate::bridges::on_cancel).
pub fn try_cancelled<T: Clone + Send + 'static>(
    p: Computation<T>,
    handler: impl Fn(crate::activation::Cancelled) + Send + Sync + 'static,
) -> Computation<T> {
    let handler = Arc::new(handler);
    Computation::new(move |activation: Activation<T>| {
        let handler = handler.clone();
        let outer_cancel = activation.aux.cancel.clone();
        let cancel: CancelCont = Arc::new(move |signal: crate::activation::Cancelled| {
            handler(signal.clone());
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

/// A computation that delivers `edi` through the exception continuation.
pub fn raise<T: Clone + Send + 'static>(edi: ExceptionDispatchInfo) -> Computation<T> {
    Computation::new(move |activation: Activation<T>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }
        activation.aux.raise(edi.clone())
    })
}

/// Sequences `p` into `f`, running the computation `f` builds from `p`'s
/// result under the same aux block.
pub fn bind<T, U>(
    p: Computation<T>,
    f: impl Fn(T) -> Computation<U> + Send + Sync + 'static,
) -> Computation<U>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
{
    let f: Arc<dyn Fn(T) -> Computation<U> + Send + Sync> = Arc::new(f);
    Computation::new(move |activation: Activation<U>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }
        let f = f.clone();
        let next_success = activation.success;
        let inner_aux = activation.aux.clone();
        let outer_aux = activation.aux;

        let inner_success: SuccessCont<T> = Box::new(move |value: T| {
            match protect(AssertUnwindSafe(|| f(value))) {
                Ok(next) => next.invoke(Activation::new(next_success, inner_aux.clone())),
                Err(edi) => inner_aux.raise(edi),
            }
        });

        p.invoke(Activation::new(inner_success, outer_aux))
    })
}

/// A computation that defers calling `f` (which builds the next
/// computation) until invoked.
pub fn delay<T: Clone + Send + 'static>(
    f: impl Fn() -> Computation<T> + Send + Sync + 'static,
) -> Computation<T> {
    Computation::new(move |activation: Activation<T>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }
        match protect(AssertUnwindSafe(|| f())) {
            Ok(next) => next.invoke(activation),
            Err(edi) => activation.aux.raise(edi),
        }
    })
}

/// Runs `p1`, discards its result, then runs `p2`.
pub fn sequential<T, U>(p1: Computation<T>, p2: Computation<U>) -> Computation<U>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
{
    bind(p1, move |_| p2.clone())
}

/// A computation that immediately succeeds with `()`.
pub fn zero() -> Computation<()> {
    ret(())
}

/// Equivalent to [`sequential`], named to match the builder-surface
/// operation that composes two statements in a computation expression.
pub fn combine<U: Clone + Send + 'static>(
    p1: Computation<()>,
    p2: Computation<U>,
) -> Computation<U> {
    sequential(p1, p2)
}

/// Discards the result of `p`.
pub fn ignore<T: Clone + Send + 'static>(p: Computation<T>) -> Computation<()> {
    bind(p, |_| ret(()))
}

/// Runs `finalizer` exactly once on every exit path of `p` (success,
/// exception, or cancellation).
pub fn try_finally<T: Clone + Send + 'static>(
    p: Computation<T>,
    finalizer: impl Fn() + Send + Sync + 'static,
) -> Computation<T> {
    let finalizer = Arc::new(finalizer);
    let run_once = Arc::new(Once::new());

    Computation::new(move |activation: Activation<T>| {
        let outer_success = activation.success;
        let outer_exception = activation.aux.exception.clone();
        let outer_cancel = activation.aux.cancel.clone();

        let f1 = finalizer.clone();
        let ro1 = run_once.clone();
        let success: SuccessCont<T> = Box::new(move |v: T| {
            ro1.call_once(|| f1());
            outer_success(v)
        });

        let f2 = finalizer.clone();
        let ro2 = run_once.clone();
        let exception: ExceptionCont = Arc::new(move |edi| {
            let mut finalizer_failure = None;
            ro2.call_once(|| {
                if let Err(edi2) = protect(AssertUnwindSafe(|| f2())) {
                    finalizer_failure = Some(edi2);
                }
            });
            match finalizer_failure {
                Some(edi2) => outer_exception(edi2),
                None => outer_exception(edi),
            }
        });

        let f3 = finalizer.clone();
        let ro3 = run_once.clone();
        let cancel: CancelCont = Arc::new(move |signal| {
            ro3.call_once(|| {
                let _ = protect(AssertUnwindSafe(|| f3()));
            });
            outer_cancel(signal)
        });

        let inner_aux = Arc::new(Aux {
            exception,
            cancel,
            token: activation.aux.token.clone(),
            holder: activation.aux.holder.clone(),
        });

        p.invoke(Activation::new(success, inner_aux))
    })
}

/// Replaces the exception continuation so that `h` runs on any exception
/// raised by `p`; cancellation is not intercepted.
pub fn try_with<T: Clone + Send + 'static>(
    p: Computation<T>,
    h: impl Fn(ExceptionDispatchInfo) -> Computation<T> + Send + Sync + 'static,
) -> Computation<T> {
    let h: Arc<dyn Fn(ExceptionDispatchInfo) -> Computation<T> + Send + Sync> = Arc::new(h);

    Computation::new(move |activation: Activation<T>| {
        let h = h.clone();
        let success_cell = Arc::new(SingleUse::new(activation.success));
        let outer_exception = activation.aux.exception.clone();
        let handler_aux = activation.aux.clone();

        let success_for_p: SuccessCont<T> = {
            let cell = success_cell.clone();
            Box::new(move |v: T| (cell.take())(v))
        };

        let exception: ExceptionCont = Arc::new(move |edi| {
            match protect(AssertUnwindSafe(|| h(edi))) {
                Ok(handled) => {
                    let cell = success_cell.clone();
                    let success: SuccessCont<T> = Box::new(move |v: T| (cell.take())(v));
                    handled.invoke(Activation::new(success, handler_aux.clone()))
                }
                Err(edi2) => outer_exception(edi2),
            }
        });

        let inner_aux = Arc::new(Aux {
            exception,
            cancel: activation.aux.cancel.clone(),
            token: activation.aux.token.clone(),
            holder: activation.aux.holder.clone(),
        });

        p.invoke(Activation::new(success_for_p, inner_aux))
    })
}

/// Something disposable at the end of a [`using`] scope.
pub trait Resource: Send + Sync + 'static {
    fn dispose(&self);
}

/// Runs `body(&resource)`, disposing `resource` exactly once on every exit
/// path.
pub fn using<R, T>(
    resource: R,
    body: impl Fn(Arc<R>) -> Computation<T> + Send + Sync + 'static,
) -> Computation<T>
where
    R: Resource,
    T: Clone + Send + 'static,
{
    let resource = Arc::new(resource);
    let r1 = resource.clone();
    let r2 = resource.clone();
    try_finally(delay(move || body(r1.clone())), move || r2.dispose())
}

/// Repeats `body` while `guard` holds.
pub fn while_loop(
    guard: impl Fn() -> bool + Send + Sync + 'static,
    body: impl Fn() -> Computation<()> + Send + Sync + 'static,
) -> Computation<()> {
    fn step(
        guard: Arc<dyn Fn() -> bool + Send + Sync>,
        body: Arc<dyn Fn() -> Computation<()> + Send + Sync>,
    ) -> Computation<()> {
        delay(move || {
            if guard() {
                let g2 = guard.clone();
                let b2 = body.clone();
                bind(body(), move |_| step(g2.clone(), b2.clone()))
            } else {
                ret(())
            }
        })
    }
    step(Arc::new(guard), Arc::new(body))
}

/// Runs `body(item)` in order for every item of `items`.
pub fn for_loop<I>(
    items: Vec<I>,
    body: impl Fn(I) -> Computation<()> + Send + Sync + 'static,
) -> Computation<()>
where
    I: Clone + Send + Sync + 'static,
{
    fn step<I>(
        items: Arc<Vec<I>>,
        body: Arc<dyn Fn(I) -> Computation<()> + Send + Sync>,
        idx: usize,
    ) -> Computation<()>
    where
        I: Clone + Send + Sync + 'static,
    {
        delay(move || {
            if idx < items.len() {
                let item = items[idx].clone();
                let items2 = items.clone();
                let body2 = body.clone();
                bind(body(item), move |_| step(items2.clone(), body2.clone(), idx + 1))
            } else {
                ret(())
            }
        })
    }
    step(Arc::new(items), Arc::new(body), 0)
}

/// Posts the remainder of the computation onto `sc`; if `sc` is `None`,
/// queues onto the default pool instead.
pub fn switch_to_context(sc: Option<Arc<dyn SyncContext>>) -> Computation<()> {
    Computation::new(move |activation: Activation<()>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }
        let sc = sc.clone();
        let threshold = activation.aux.holder.hijack_threshold();
        let success = activation.success;
        let aux = activation.aux;
        crate::trampoline::TrampolineHolder::post_or_queue_with_trampoline(sc, threshold, move |holder| {
            aux.with_holder(holder)
                .holder
                .trampoline()
                .hijack_check_then_call(success, ())
        });
        Completion::pending()
    })
}

/// Queues the remainder of the computation onto the default worker pool.
pub fn switch_to_thread_pool() -> Computation<()> {
    switch_to_context(None)
}

/// Starts a dedicated background thread and continues there.
pub fn switch_to_new_thread() -> Computation<()> {
    Computation::new(move |activation: Activation<()>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }
        let threshold = activation.aux.holder.hijack_threshold();
        let success = activation.success;
        let aux = activation.aux;
        crate::trampoline::TrampolineHolder::start_thread_with_trampoline(threshold, move |holder| {
            aux.with_holder(holder)
                .holder
                .trampoline()
                .hijack_check_then_call(success, ())
        });
        Completion::pending()
    })
}

/// Converts `p` into a computation that always succeeds, yielding `Ok(v)`
/// on success and `Err` on an exception raised by `p`. Cancellation is not
/// intercepted and still flows to the cancellation continuation.
pub fn catch<T: Clone + Send + 'static>(p: Computation<T>) -> Computation<Result<T, Error>> {
    Computation::new(move |activation: Activation<Result<T, Error>>| {
        let success_cell = Arc::new(SingleUse::new(activation.success));
        let s1 = success_cell.clone();
        let s2 = success_cell.clone();

        let inner_success: SuccessCont<T> = Box::new(move |v: T| (s1.take())(Ok(v)));
        let inner_exception: ExceptionCont =
            Arc::new(move |edi| (s2.take())(Err(Error::user(edi))));

        let inner_aux = Arc::new(Aux {
            exception: inner_exception,
            cancel: activation.aux.cancel.clone(),
            token: activation.aux.token.clone(),
            holder: activation.aux.holder.clone(),
        });

        p.invoke(Activation::new(inner_success, inner_aux))
    })
}

/// Re-runs `p()` up to `attempts` more times, waiting `backoff` between
/// attempts, before giving up and re-raising the last exception.
pub fn retry<T: Clone + Send + 'static>(
    p: impl Fn() -> Computation<T> + Send + Sync + 'static,
    attempts: u32,
    backoff: Duration,
) -> Computation<T> {
    fn attempt<T: Clone + Send + 'static>(
        p: Arc<dyn Fn() -> Computation<T> + Send + Sync>,
        remaining: u32,
        backoff: Duration,
    ) -> Computation<T> {
        try_with(p(), move |edi| {
            if remaining > 0 {
                let p2 = p.clone();
                sequential(
                    crate::bridges::sleep(backoff),
                    delay(move || attempt(p2.clone(), remaining - 1, backoff)),
                )
            } else {
                raise(edi)
            }
        })
    }
    attempt(Arc::new(p), attempts, backoff)
}

/// Races `p` against `duration`; raises [`Error::timeout`] if the duration
/// elapses first.
pub fn timeout<T: Clone + Send + 'static>(p: Computation<T>, duration: Duration) -> Computation<T> {
    crate::bridges::start_child(p, Some(duration))
}

/// Maps the result of `p` through `f`.
pub fn map<T, U>(p: Computation<T>, f: impl Fn(T) -> U + Send + Sync + 'static) -> Computation<U>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
{
    bind(p, move |v| ret(f(v)))
}

/// Runs `p1` and `p2` in sequence, pairing their results.
pub fn zip<T, U>(p1: Computation<T>, p2: Computation<U>) -> Computation<(T, U)>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
{
    bind(p1, move |a: T| {
        let p2 = p2.clone();
        let a = a.clone();
        bind(p2, move |b: U| ret((a.clone(), b)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::trampoline::TrampolineHolder;
    use std::sync::mpsc;
    use std::sync::Mutex as StdMutex;

    fn root_aux() -> Arc<Aux> {
        Arc::new(Aux {
            exception: Arc::new(|edi| panic!("unexpected exception: {edi}")),
            cancel: Arc::new(|_| panic!("unexpected cancellation")),
            token: CancellationToken::none(),
            holder: Arc::new(TrampolineHolder::new(300)),
        })
    }

    fn run<T: Send + 'static>(c: Computation<T>) -> T {
        let (tx, rx) = mpsc::channel();
        let success: SuccessCont<T> = Box::new(move |v| {
            tx.send(v).unwrap();
            Completion::done()
        });
        c.invoke(Activation::new(success, root_aux()));
        rx.recv_timeout(Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn ret_delivers_its_value() {
        assert_eq!(run(ret(41)), 41);
    }

    #[test]
    fn bind_chains_in_order() {
        let c = bind(ret(1), |v| ret(v + 1));
        assert_eq!(run(c), 2);
    }

    #[test]
    fn sequential_runs_both_in_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let l1 = log.clone();
        let l2 = log.clone();
        let c = sequential(
            delay(move || {
                l1.lock().unwrap().push(1);
                ret(())
            }),
            delay(move || {
                l2.lock().unwrap().push(2);
                ret(())
            }),
        );
        run(c);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn try_with_catches_a_panic_raised_while_building_the_next_step() {
        let c: Computation<i32> = bind(ret(0), |_| -> Computation<i32> { panic!("boom") });
        let handled = try_with(c, |edi| {
            assert!(edi.message().contains("boom"));
            ret(-1)
        });
        assert_eq!(run(handled), -1);
    }

    #[test]
    fn catch_turns_an_exception_into_err() {
        let c: Computation<i32> = bind(ret(0), |_| -> Computation<i32> { panic!("boom") });
        let result = run(catch(c));
        assert!(result.is_err());
        assert!(result.unwrap_err().is_user());
    }

    #[test]
    fn catch_passes_success_through_as_ok() {
        assert_eq!(run(catch(ret(9))), Ok(9));
    }

    #[test]
    fn map_transforms_the_result() {
        assert_eq!(run(map(ret(2), |v| v * 10)), 20);
    }

    #[test]
    fn zip_pairs_both_results() {
        assert_eq!(run(zip(ret(1), ret("a"))), (1, "a"));
    }

    #[test]
    fn retry_recovers_after_failing_attempts() {
        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let a = attempts.clone();
        let c = retry(
            move || {
                let n = a.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n < 2 {
                    bind(ret(0), |_| -> Computation<i32> { panic!("not yet") })
                } else {
                    ret(7)
                }
            },
            5,
            Duration::from_millis(1),
        );
        assert_eq!(run(c), 7);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_gives_up_after_exhausting_attempts() {
        let c: fn() -> Computation<i32> =
            || bind(ret(0), |_| -> Computation<i32> { panic!("always fails") });
        let wrapped = retry(c, 2, Duration::from_millis(1));
        let result = run(catch(wrapped));
        assert!(result.is_err());
    }

    #[test]
    fn while_loop_counts_down() {
        let remaining = Arc::new(std::sync::atomic::AtomicU32::new(3));
        let r1 = remaining.clone();
        let r2 = remaining.clone();
        let c = while_loop(
            move || r1.load(std::sync::atomic::Ordering::SeqCst) > 0,
            move || {
                r2.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                ret(())
            },
        );
        run(c);
        assert_eq!(remaining.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn for_loop_visits_every_item_in_order() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        let c = for_loop(vec![1, 2, 3], move |item| {
            s.lock().unwrap().push(item);
            ret(())
        });
        run(c);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn try_finally_runs_finalizer_on_success() {
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let r = ran.clone();
        let c = try_finally(ret(5), move || {
            r.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        assert_eq!(run(c), 5);
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn try_finally_runs_finalizer_on_exception() {
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let r = ran.clone();
        let c: Computation<i32> = bind(ret(0), |_| -> Computation<i32> { panic!("boom") });
        let c = try_finally(c, move || {
            r.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        let result = run(catch(c));
        assert!(result.is_err());
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    struct CountingResource(Arc<std::sync::atomic::AtomicU32>);

    impl Resource for CountingResource {
        fn dispose(&self) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn cancellation_token_reports_the_running_activations_token() {
        let source = CancellationTokenSource::new();
        let token = source.token();
        let c = cancellation_token();
        let (tx, rx) = mpsc::channel();
        let success: SuccessCont<CancellationToken> = Box::new(move |v| {
            tx.send(v).unwrap();
            Completion::done()
        });
        let aux = Arc::new(Aux {
            exception: Arc::new(|edi| panic!("unexpected exception: {edi}")),
            cancel: Arc::new(|_| panic!("unexpected cancellation")),
            token,
            holder: Arc::new(TrampolineHolder::new(300)),
        });
        c.invoke(Activation::new(success, aux));
        let observed = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(!observed.is_cancelled());
        source.cancel();
        assert!(observed.is_cancelled());
    }

    #[test]
    fn from_continuations_delivers_through_the_success_path() {
        let c = from_continuations(|k, _ek, _ck| k(3));
        assert_eq!(run(c), 3);
    }

    #[test]
    fn try_cancelled_runs_handler_and_still_propagates_cancellation() {
        use crate::cancellation::CancellationTokenSource;

        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let r = ran.clone();
        let c = try_cancelled(crate::bridges::sleep(Duration::from_secs(5)), move |_signal| {
            r.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        let source = CancellationTokenSource::new();
        let token = source.token();
        let (tx, rx) = mpsc::channel::<()>();
        let aux = Arc::new(Aux {
            exception: Arc::new(|edi| panic!("unexpected exception: {edi}")),
            cancel: Arc::new(move |_signal| {
                tx.send(()).unwrap();
                Completion::done()
            }),
            token,
            holder: Arc::new(TrampolineHolder::new(300)),
        });
        let success: SuccessCont<()> = Box::new(|_| panic!("should not succeed"));
        c.invoke(Activation::new(success, aux));
        source.cancel();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn using_disposes_exactly_once() {
        let disposed = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let resource = CountingResource(disposed.clone());
        let c = using(resource, |_r| ret(()));
        run(c);
        assert_eq!(disposed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}

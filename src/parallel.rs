//! [`parallel`]: run a fixed batch of computations concurrently and fan
//! their results back into one vector, in input order.
//!
//! First failure wins: as soon as any branch raises, every other branch's
//! linked cancellation sub-source is cancelled and the exception is
//! delivered immediately rather than waiting for the stragglers. Grounded
//! on spec.md's structured-concurrency fan-out semantics; the
//! exactly-once-delivery guard reuses `src/gate.rs`'s [`Latch`], the same
//! CAS-settle idiom `src/bridges.rs::start_child` uses for its
//! result-vs-timeout race.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::activation::{Activation, Aux, CancelCont, ExceptionCont, SuccessCont};
use crate::cancellation::LinkedSubSource;
use crate::computation::{Completion, Computation};
use crate::gate::Latch;
use crate::single_use::SingleUse;

/// Runs every computation in `computations` concurrently, succeeding with
/// their results in the same order once all have completed, or raising the
/// first exception encountered (cancelling the rest).
pub fn parallel<T: Clone + Send + 'static>(computations: Vec<Computation<T>>) -> Computation<Vec<T>> {
    Computation::new(move |activation: Activation<Vec<T>>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }

        let n = computations.len();
        if n == 0 {
            return activation
                .aux
                .holder
                .trampoline()
                .hijack_check_then_call(activation.success, Vec::new());
        }

        let sub = Arc::new(LinkedSubSource::new(&activation.aux.token));
        let settled = Arc::new(Latch::new());
        let remaining = Arc::new(AtomicUsize::new(n));
        let slots: Arc<Mutex<Vec<Option<T>>>> = Arc::new(Mutex::new((0..n).map(|_| None).collect()));

        let outer_success = Arc::new(SingleUse::new(activation.success));
        let outer_aux = activation.aux;
        let outer_exception = outer_aux.exception.clone();

        let settled_for_cancel = settled.clone();
        let sub_for_cancel = sub.clone();
        let outer_cancel = outer_aux.cancel.clone();
        let branch_cancel: CancelCont = Arc::new(move |signal| {
            if settled_for_cancel.signal() {
                sub_for_cancel.cancel();
                outer_cancel(signal)
            } else {
                Completion::done()
            }
        });

        for (idx, computation) in computations.into_iter().enumerate() {
            let slots = slots.clone();
            let remaining = remaining.clone();
            let settled_for_success = settled.clone();
            let outer_success = outer_success.clone();

            let branch_success: SuccessCont<T> = Box::new(move |v: T| {
                slots.lock().unwrap()[idx] = Some(v);
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 && settled_for_success.signal() {
                    let results: Vec<T> = slots
                        .lock()
                        .unwrap()
                        .iter_mut()
                        .map(|slot| slot.take().expect("cpsync: parallel branch slot unfilled"))
                        .collect();
                    (outer_success.take())(results)
                } else {
                    Completion::done()
                }
            });

            let settled_for_err = settled.clone();
            let outer_exception_for_branch = outer_exception.clone();
            let sub_for_err = sub.clone();
            let branch_exception: ExceptionCont = Arc::new(move |edi| {
                sub_for_err.cancel();
                if settled_for_err.signal() {
                    outer_exception_for_branch(edi)
                } else {
                    Completion::done()
                }
            });

            let branch_aux = Arc::new(Aux {
                exception: branch_exception,
                cancel: branch_cancel.clone(),
                token: sub.token(),
                holder: outer_aux.holder.clone(),
            });

            computation.invoke(Activation::new(branch_success, branch_aux));
        }

        Completion::pending()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::combinators::{bind, catch, ret};
    use crate::trampoline::TrampolineHolder;
    use std::sync::mpsc;
    use std::time::Duration;

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
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn parallel_of_empty_vec_succeeds_with_empty_vec() {
        let empty: Vec<Computation<i32>> = Vec::new();
        assert_eq!(run(parallel(empty)), Vec::<i32>::new());
    }

    #[test]
    fn parallel_preserves_input_order() {
        let branches: Vec<Computation<i32>> = (0..5).map(ret).collect();
        assert_eq!(run(parallel(branches)), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn parallel_reports_the_first_exception() {
        let ok: Computation<i32> = crate::bridges::sleep(Duration::from_millis(50));
        let ok = crate::combinators::map(ok, |_| 1);
        let failing: Computation<i32> = bind(ret(0), |_| -> Computation<i32> { panic!("boom") });
        let result = run(catch(parallel(vec![ok, failing])));
        assert!(result.is_err());
    }

    #[test]
    fn cancelling_a_parallel_of_two_invokes_the_outer_cancel_exactly_once() {
        let branches: Vec<Computation<()>> = vec![
            crate::bridges::sleep(Duration::from_secs(5)),
            crate::bridges::sleep(Duration::from_secs(5)),
        ];
        let cancel_count = Arc::new(AtomicUsize::new(0));
        let count_for_cancel = cancel_count.clone();
        let (tx, rx) = mpsc::channel::<()>();
        let source = crate::runners::start_with_continuations(
            parallel(branches),
            |_| panic!("unexpected success"),
            |edi| panic!("unexpected exception: {edi}"),
            move |_signal| {
                count_for_cancel.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            },
        );
        source.cancel();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cancel_count.load(Ordering::SeqCst), 1);
    }
}

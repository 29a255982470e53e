//! [`choice`]: races a fixed batch of computations, delivering whichever
//! settles first (success or exception) and cancelling the rest.
//!
//! Grounded on spec.md's structured-concurrency race semantics; shares the
//! [`Latch`]-guarded settle pattern with `src/parallel.rs` and
//! `src/bridges.rs::start_child`.

use std::sync::Arc;

use crate::activation::{Activation, Aux, CancelCont, ExceptionCont, SuccessCont};
use crate::cancellation::LinkedSubSource;
use crate::computation::{Completion, Computation};
use crate::error::Error;
use crate::exception_info::ExceptionDispatchInfo;
use crate::gate::Latch;
use crate::single_use::SingleUse;

/// Races every computation in `computations`; the first to settle wins and
/// the rest are cancelled. Raises [`Error::misuse`] if `computations` is
/// empty — there is nothing to race.
pub fn choice<T: Clone + Send + 'static>(computations: Vec<Computation<T>>) -> Computation<T> {
    Computation::new(move |activation: Activation<T>| {
        if let Err(c) = activation.aux.cancel_check() {
            return c;
        }

        if computations.is_empty() {
            let edi = ExceptionDispatchInfo::from_error(Error::misuse(
                "cpsync: choice() requires at least one computation",
            ));
            return activation.aux.raise(edi);
        }

        let sub = Arc::new(LinkedSubSource::new(&activation.aux.token));
        let settled = Arc::new(Latch::new());
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

        for computation in computations {
            let settled_for_win = settled.clone();
            let outer_success = outer_success.clone();
            let sub_for_win = sub.clone();
            let branch_success: SuccessCont<T> = Box::new(move |v: T| {
                if settled_for_win.signal() {
                    sub_for_win.cancel();
                    (outer_success.take())(v)
                } else {
                    Completion::done()
                }
            });

            let settled_for_err = settled.clone();
            let outer_exception_for_branch = outer_exception.clone();
            let sub_for_err = sub.clone();
            let branch_exception: ExceptionCont = Arc::new(move |edi| {
                if settled_for_err.signal() {
                    sub_for_err.cancel();
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
    use crate::combinators::{catch, map, ret};
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
    fn choice_returns_the_fastest_branch() {
        let slow = map(crate::bridges::sleep(Duration::from_millis(200)), |_| "slow");
        let fast = ret("fast");
        assert_eq!(run(choice(vec![slow, fast])), "fast");
    }

    #[test]
    fn choice_of_empty_vec_raises_misuse() {
        let empty: Vec<Computation<i32>> = Vec::new();
        let result = run(catch(choice(empty)));
        assert!(result.is_err());
        assert!(result.unwrap_err().is_user());
    }

    #[test]
    fn cancelling_a_choice_of_two_invokes_the_outer_cancel_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let branches: Vec<Computation<()>> = vec![
            crate::bridges::sleep(Duration::from_secs(5)),
            crate::bridges::sleep(Duration::from_secs(5)),
        ];
        let cancel_count = Arc::new(AtomicUsize::new(0));
        let count_for_cancel = cancel_count.clone();
        let (tx, rx) = mpsc::channel::<()>();
        let source = crate::runners::start_with_continuations(
            choice(branches),
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

//! [`ResultCell`]: a one-shot rendezvous supporting multi-waiter
//! registration, synchronous timed wait, and a lazily materialized wait
//! handle.
//!
//! The "block the current thread on a background computation, optionally
//! with a timeout" shape is grounded directly on
//! `examples/juliusl-lifec/lifec/src/operation.rs`'s `wait()` /
//! `wait_with_timeout()`.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::activation::Activation;
use crate::computation::Completion;
use crate::sync_context::{self, SyncContext};
use crate::trampoline::TrampolineHolder;

enum State<T> {
    Empty,
    Filled(T),
    Closed,
}

struct ManualResetEvent {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl ManualResetEvent {
    fn new(initially_signalled: bool) -> Self {
        ManualResetEvent {
            signalled: Mutex::new(initially_signalled),
            condvar: Condvar::new(),
        }
    }

    fn set(&self) {
        let mut g = self.signalled.lock().unwrap();
        *g = true;
        self.condvar.notify_all();
    }

    /// Waits until signalled, or until `timeout` elapses (`None` = forever).
    /// Returns `true` if signalled.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut g = self.signalled.lock().unwrap();
        match timeout {
            None => {
                while !*g {
                    g = self.condvar.wait(g).unwrap();
                }
                true
            }
            Some(d) => {
                let deadline = Instant::now() + d;
                while !*g {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return *g;
                    }
                    let (guard, result) = self.condvar.wait_timeout(g, remaining).unwrap();
                    g = guard;
                    if result.timed_out() && !*g {
                        return false;
                    }
                }
                true
            }
        }
    }
}

/// Snapshot of where a waiter was suspended: the aux block it will resume
/// with, the sync context in effect at suspension, and the thread it was
/// suspended on.
pub struct SuspendedContinuation<T> {
    activation: Activation<T>,
    captured_context: Option<Arc<dyn SyncContext>>,
    captured_thread: std::thread::ThreadId,
}

impl<T: Send + 'static> SuspendedContinuation<T> {
    pub fn capture(activation: Activation<T>) -> Self {
        SuspendedContinuation {
            activation,
            captured_context: sync_context::current(),
            captured_thread: std::thread::current().id(),
        }
    }

    /// Resumes preferring to reuse the caller's thread when it is safe to
    /// do so: both captured and current sync context are absent, or the
    /// captured context equals the current one and the current thread
    /// equals the captured thread. Otherwise falls back to post-or-queue.
    pub fn resume_immediate(self, value: T, hijack_threshold: u32) -> Completion {
        let current_context = sync_context::current();
        let same_thread = std::thread::current().id() == self.captured_thread;
        let run_sync = match (&self.captured_context, &current_context) {
            (None, None) => true,
            _ => sync_context::same_context(&self.captured_context, &current_context) && same_thread,
        };

        if run_sync {
            let success = self.activation.success;
            let aux = self.activation.aux;
            TrampolineHolder::execute_with_trampoline(hijack_threshold, move |holder| {
                aux.with_holder(holder)
                    .holder
                    .trampoline()
                    .hijack_check_then_call(success, value)
            })
        } else {
            self.resume_post_or_queue(value, hijack_threshold)
        }
    }

    pub fn resume_post_or_queue(self, value: T, hijack_threshold: u32) -> Completion {
        let ctx = self.captured_context.clone();
        let success = self.activation.success;
        let aux = self.activation.aux;
        TrampolineHolder::post_or_queue_with_trampoline(ctx, hijack_threshold, move |holder| {
            aux.with_holder(holder)
                .holder
                .trampoline()
                .hijack_check_then_call(success, value)
        });
        Completion::pending()
    }
}

/// A one-shot store with states empty / filled / closed, supporting
/// multiple waiters.
pub struct ResultCell<T: Clone + Send + 'static> {
    inner: Mutex<Inner<T>>,
    hijack_threshold: u32,
}

struct Inner<T> {
    state: State<T>,
    waiters: Vec<SuspendedContinuation<T>>,
    wait_handle: Option<Arc<ManualResetEvent>>,
}

impl<T: Clone + Send + 'static> ResultCell<T> {
    pub fn new(hijack_threshold: u32) -> Self {
        ResultCell {
            inner: Mutex::new(Inner {
                state: State::Empty,
                waiters: Vec::new(),
                wait_handle: None,
            }),
            hijack_threshold,
        }
    }

    /// Stores `value` iff the cell is still empty; a no-op otherwise.
    /// Resumes exactly one waiter immediately (reusing this thread) when
    /// `reuse_thread` is true and there is exactly one waiter; all other
    /// cases resume every waiter via post-or-queue.
    pub fn register_result(&self, value: T, reuse_thread: bool) {
        let waiters = {
            let mut g = self.inner.lock().unwrap();
            if !matches!(g.state, State::Empty) {
                return;
            }
            g.state = State::Filled(value.clone());
            if let Some(h) = &g.wait_handle {
                h.set();
            }
            std::mem::take(&mut g.waiters)
        };

        if waiters.is_empty() {
            return;
        }
        if waiters.len() == 1 && reuse_thread {
            waiters
                .into_iter()
                .next()
                .unwrap()
                .resume_immediate(value, self.hijack_threshold);
        } else {
            for w in waiters {
                w.resume_post_or_queue(value.clone(), self.hijack_threshold);
            }
        }
    }

    /// A computation that, when invoked, delivers the stored value
    /// immediately if present, otherwise registers the activation as a
    /// waiter and suspends.
    pub fn await_result(self: &Arc<Self>) -> crate::computation::Computation<T> {
        let cell = self.clone();
        crate::computation::Computation::new(move |activation: Activation<T>| {
            let mut g = cell.inner.lock().unwrap();
            match &g.state {
                State::Filled(v) => {
                    let v = v.clone();
                    drop(g);
                    activation
                        .aux
                        .holder
                        .trampoline()
                        .hijack_check_then_call(activation.success, v)
                }
                State::Empty => {
                    g.waiters.push(SuspendedContinuation::capture(activation));
                    Completion::pending()
                }
                State::Closed => Completion::pending(),
            }
        })
    }

    /// Blocks the calling thread up to `timeout` (or forever if `None`)
    /// waiting for a result. Returns `None` on timeout.
    pub fn try_wait_for_result_synchronously(&self, timeout: Option<Duration>) -> Option<T> {
        {
            let g = self.inner.lock().unwrap();
            if let State::Filled(v) = &g.state {
                return Some(v.clone());
            }
        }
        let handle = self.get_wait_handle();
        if !handle.wait(timeout) {
            return None;
        }
        let g = self.inner.lock().unwrap();
        match &g.state {
            State::Filled(v) => Some(v.clone()),
            _ => None,
        }
    }

    fn get_wait_handle(&self) -> Arc<ManualResetEvent> {
        let mut g = self.inner.lock().unwrap();
        if let Some(h) = &g.wait_handle {
            return h.clone();
        }
        let already_filled = matches!(g.state, State::Filled(_));
        let handle = Arc::new(ManualResetEvent::new(already_filled));
        g.wait_handle = Some(handle.clone());
        handle
    }

    /// Disposes the wait handle (if any) and prevents further results from
    /// being registered.
    pub fn close(&self) {
        let mut g = self.inner.lock().unwrap();
        g.wait_handle = None;
        if matches!(g.state, State::Empty) {
            g.state = State::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Aux;
    use crate::cancellation::CancellationToken;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    fn test_aux() -> Arc<Aux> {
        Arc::new(Aux {
            exception: Arc::new(|_| Completion::done()),
            cancel: Arc::new(|_| Completion::done()),
            token: CancellationToken::none(),
            holder: Arc::new(TrampolineHolder::new(300)),
        })
    }

    #[test]
    fn delivers_immediately_when_already_filled() {
        let cell: Arc<ResultCell<i32>> = Arc::new(ResultCell::new(300));
        cell.register_result(7, true);
        let (tx, rx) = mpsc::channel();
        let activation = Activation::new(Box::new(move |v| { tx.send(v).unwrap(); Completion::done() }), test_aux());
        cell.await_result().invoke(activation);
        assert_eq!(rx.recv().unwrap(), 7);
    }

    #[test]
    fn wakes_a_waiter_on_register() {
        let cell: Arc<ResultCell<i32>> = Arc::new(ResultCell::new(300));
        let (tx, rx) = mpsc::channel();
        let activation = Activation::new(Box::new(move |v| { tx.send(v).unwrap(); Completion::done() }), test_aux());
        cell.await_result().invoke(activation);
        cell.register_result(99, true);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 99);
    }

    #[test]
    fn second_register_is_a_no_op() {
        let cell: Arc<ResultCell<i32>> = Arc::new(ResultCell::new(300));
        cell.register_result(1, true);
        cell.register_result(2, true);
        assert_eq!(cell.try_wait_for_result_synchronously(None), Some(1));
    }

    #[test]
    fn synchronous_wait_times_out() {
        let cell: Arc<ResultCell<i32>> = Arc::new(ResultCell::new(300));
        let got = cell.try_wait_for_result_synchronously(Some(Duration::from_millis(20)));
        assert!(got.is_none());
    }

    #[test]
    fn multi_waiter_fan_out() {
        let cell: Arc<ResultCell<i32>> = Arc::new(ResultCell::new(300));
        let seen = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        for _ in 0..3 {
            let tx = tx.clone();
            let activation = Activation::new(Box::new(move |v| { tx.send(v).unwrap(); Completion::done() }), test_aux());
            cell.await_result().invoke(activation);
        }
        let _ = &seen;
        cell.register_result(5, true);
        for _ in 0..3 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 5);
        }
    }
}

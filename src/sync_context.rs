//! The [`SyncContext`] abstraction: a host-provided execution environment a
//! computation can be posted back onto (analogous to a UI message pump).

use std::cell::RefCell;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// Something a closure can be posted to for execution on its own terms
/// (its own thread, its own event loop, ...).
pub trait SyncContext: Send + Sync {
    fn post(&self, f: Box<dyn FnOnce() + Send>);
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<dyn SyncContext>>> = RefCell::new(None);
}

/// Returns the sync context installed on the current thread, if any.
pub fn current() -> Option<Arc<dyn SyncContext>> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Returns true if `a` and `b` refer to the same sync context instance.
pub fn same_context(a: &Option<Arc<dyn SyncContext>>, b: &Option<Arc<dyn SyncContext>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Installs `ctx` as the current thread's sync context for the duration of
/// `f`, restoring the previous value afterward. Used by a context's own
/// `post` implementation when it actually runs the posted closure.
pub fn with_current<R>(ctx: Option<Arc<dyn SyncContext>>, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT.with(|c| c.replace(ctx));
    let result = f();
    CURRENT.with(|c| *c.borrow_mut() = previous);
    result
}

/// A dedicated single-thread context: every posted closure runs, in order,
/// on one background thread. A reasonable stand-in for a host UI thread in
/// tests and the demo binary.
pub struct SingleThreadContext {
    sender: mpsc::Sender<Box<dyn FnOnce() + Send>>,
}

impl SingleThreadContext {
    pub fn spawn() -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<Box<dyn FnOnce() + Send>>();
        let ctx = Arc::new(SingleThreadContext { sender });
        let weak_self: Arc<dyn SyncContext> = ctx.clone();
        thread::Builder::new()
            .name("cpsync-single-thread-context".into())
            .spawn(move || {
                for job in receiver {
                    with_current(Some(weak_self.clone()), job);
                }
            })
            .expect("cpsync: failed to spawn single-thread context");
        ctx
    }
}

impl SyncContext for SingleThreadContext {
    fn post(&self, f: Box<dyn FnOnce() + Send>) {
        // If the receiving thread has shut down, the closure is simply
        // dropped rather than panicking the poster.
        let _ = self.sender.send(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    #[test]
    fn single_thread_context_runs_posted_work() {
        let ctx = SingleThreadContext::spawn();
        let (tx, rx) = std_mpsc::channel();
        ctx.post(Box::new(move || {
            tx.send(42).unwrap();
        }));
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(1)), Ok(42));
    }
}

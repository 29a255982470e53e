//! The process-wide default worker pool.
//!
//! Grounded on `examples/juliusl-lifec/lifec/src/operation.rs`'s use of a
//! shared `tokio::runtime::Handle` threaded through the type rather than a
//! runtime built per call; this crate generalizes that into a lazily
//! initialized singleton since the trampoline holder needs a process-wide
//! default pool, not a caller-supplied handle.

use std::sync::OnceLock;
use std::time::Duration;

use tokio::runtime::Runtime;

use crate::error::Error;
use crate::settings::Settings;

static POOL: OnceLock<Runtime> = OnceLock::new();

fn runtime() -> &'static Runtime {
    POOL.get_or_init(|| build_runtime(&Settings::from_env()))
}

fn build_runtime(settings: &Settings) -> Runtime {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(n) = settings.default_pool_threads {
        builder.worker_threads(n);
    }
    builder
        .thread_name("cpsync-worker")
        .build()
        .expect("cpsync: failed to build default worker pool")
}

/// Queues `f` onto the default pool. Fails (a [`Error::misuse`]) only if
/// the pool has been shut down, which this crate never does on its own.
pub fn queue_work_item(f: impl FnOnce() + Send + 'static) -> Result<(), Error> {
    runtime().spawn_blocking(f);
    Ok(())
}

/// Spawns `future` onto the default pool's async executor (used by bridges
/// that need `tokio::select!`/timers rather than a blocking closure).
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    runtime().spawn(future)
}

/// Blocks the current thread running `future` to completion on the default
/// pool. Mirrors `operation.rs`'s `self.handle.block_on(...)`.
pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    runtime().block_on(future)
}

pub fn sleep(duration: Duration) -> tokio::task::JoinHandle<()> {
    spawn(tokio::time::sleep(duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn queues_work() {
        let (tx, rx) = mpsc::channel();
        queue_work_item(move || tx.send(7).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(7));
    }
}

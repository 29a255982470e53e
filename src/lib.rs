//! A continuation-passing asynchronous computation core.
//!
//! A [`Computation<T>`](computation::Computation) is an opaque, reusable,
//! deferred unit of work. Running it hands it an
//! [`Activation<T>`](activation::Activation): a success continuation plus a
//! shared block of "aux" continuations (exception, cancellation) and
//! scheduling state (the cancellation token, the active
//! [`TrampolineHolder`](trampoline::TrampolineHolder)). Primitive
//! combinators in [`combinators`] compose computations the way an `async`
//! block composes futures; [`bridges`] adapts timers, raw futures, task
//! handles, and callback-based APIs into the same model; [`runners`] turns
//! a computation into something that actually executes.
//!
//! A per-thread [`Trampoline`](trampoline::Trampoline) bounds how deep a
//! chain of synchronous [`combinators::bind`] calls can recurse before
//! deferring the rest of the chain onto its own run loop, so a long
//! synchronous computation chain cannot blow the stack.

pub mod activation;
pub mod bridges;
pub mod cancellation;
pub mod choice;
pub mod combinators;
pub mod computation;
pub mod error;
pub mod exception_info;
pub mod gate;
pub mod parallel;
pub mod pool;
pub mod result_cell;
pub mod runners;
pub mod settings;
pub(crate) mod single_use;
pub mod sync_context;
pub mod trampoline;

/// Re-exports the pieces most programs need: the value types, the
/// primitive combinators, the bridges, and the runners — so that
/// `use cpsync::prelude::*;` is enough to write a computation end to end.
pub mod prelude {
    pub use crate::activation::{Activation, Cancelled};
    pub use crate::bridges::{
        as_begin_end, await_event, await_task, await_wait_handle, from_begin_end, on_cancel, sleep,
        start_child, switch_to_context, switch_to_new_thread, switch_to_thread_pool, EventSource,
        WaitHandle,
    };
    pub use crate::cancellation::{
        cancel_default_token, default_cancellation_token, CancellationToken, CancellationTokenSource,
    };
    pub use crate::choice::choice;
    pub use crate::combinators::{
        bind, cancel_check, cancellation_token, catch, combine, delay, for_loop, from_continuations,
        ignore, map, protect, raise, ret, retry, sequential, timeout, try_cancelled, try_finally,
        try_with, using, while_loop, zero, zip, Resource,
    };
    pub use crate::computation::{Completion, Computation};
    pub use crate::error::Error;
    pub use crate::exception_info::ExceptionDispatchInfo;
    pub use crate::parallel::parallel;
    pub use crate::runners::{
        run_synchronously, run_synchronously_cancellable, run_synchronously_with_timeout, start,
        start_as_task, start_immediate, start_immediate_as_task, start_immediate_with_continuations,
        start_with_continuations,
    };
    pub use crate::settings::Settings;
    pub use crate::sync_context::{SingleThreadContext, SyncContext};
}

//! Small demonstration binary: a few computations run through
//! `run_synchronously`, `parallel`, and `choice`, with `--debug` turning up
//! the log level the way the teacher's own binary entry point does.

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cpsync::prelude::*;

/// Runs a handful of toy computations through cpsync's entry points.
#[derive(Parser)]
struct Cli {
    /// Enable debug-level logging.
    #[clap(long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(
                    if cli.debug { "cpsync=debug" } else { "cpsync=info" }
                        .parse()
                        .expect("should parse"),
                )
                .from_env()
                .expect("should work"),
        )
        .compact()
        .init();

    let greeting = map(ret("hello"), |s: &str| format!("{s}, world"));
    let result = run_synchronously(greeting).expect("greeting computation should not fail");
    tracing::info!(%result, "run_synchronously");

    let branches: Vec<Computation<u32>> = (1u32..=4)
        .map(|n| map(sleep(Duration::from_millis(20 * n as u64)), move |_| n * n))
        .collect();
    let squares = run_synchronously(parallel(branches)).expect("parallel computation should not fail");
    tracing::info!(?squares, "parallel");

    let slow = map(sleep(Duration::from_millis(200)), |_| "tortoise");
    let fast = map(sleep(Duration::from_millis(5)), |_| "hare");
    let winner = run_synchronously(choice(vec![slow, fast])).expect("choice computation should not fail");
    tracing::info!(%winner, "choice");

    let flaky_attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let flaky = retry(
        move || {
            let n = flaky_attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n < 2 {
                raise(ExceptionDispatchInfo::from_message("not yet"))
            } else {
                ret(n)
            }
        },
        5,
        Duration::from_millis(10),
    );
    let settled = run_synchronously(flaky).expect("retry computation should eventually succeed");
    tracing::info!(attempt = settled, "retry");
}

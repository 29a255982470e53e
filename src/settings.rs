//! Process-wide configuration knobs.
//!
//! The teacher has no config-file crate anywhere in its dependency stack;
//! its configuration is explicit, code-level, and CLI-first. This crate
//! follows that: a small struct with sane defaults and a handful of
//! targeted env-var overrides, rather than introducing a `config`-style
//! crate the teacher never reaches for.

use std::time::Duration;

/// The default number of binds before the trampoline hijacks control onto
/// its own run loop.
pub const DEFAULT_HIJACK_THRESHOLD: u32 = 300;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Synchronous binds allowed before the trampoline defers to its run
    /// loop.
    pub hijack_threshold: u32,
    /// `None` lets the underlying `tokio` runtime pick (its own CPU-count
    /// heuristic).
    pub default_pool_threads: Option<usize>,
    /// Polling granularity used only by the synchronous
    /// `try_wait_for_result_synchronously` fallback path.
    pub wait_poll_granularity: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            hijack_threshold: DEFAULT_HIJACK_THRESHOLD,
            default_pool_threads: None,
            wait_poll_granularity: Duration::from_millis(5),
        }
    }
}

impl Settings {
    /// Reads `CPSYNC_HIJACK_THRESHOLD` and `CPSYNC_POOL_THREADS` if
    /// present, falling back to defaults otherwise. Malformed values are
    /// ignored (logged at `warn`) rather than treated as fatal.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();

        if let Ok(raw) = std::env::var("CPSYNC_HIJACK_THRESHOLD") {
            match raw.parse() {
                Ok(n) => settings.hijack_threshold = n,
                Err(_) => tracing::warn!(value = %raw, "cpsync: ignoring malformed CPSYNC_HIJACK_THRESHOLD"),
            }
        }

        if let Ok(raw) = std::env::var("CPSYNC_POOL_THREADS") {
            match raw.parse() {
                Ok(n) => settings.default_pool_threads = Some(n),
                Err(_) => tracing::warn!(value = %raw, "cpsync: ignoring malformed CPSYNC_POOL_THREADS"),
            }
        }

        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let s = Settings::default();
        assert_eq!(s.hijack_threshold, 300);
        assert_eq!(s.default_pool_threads, None);
    }
}

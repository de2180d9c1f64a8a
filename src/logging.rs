//! Process-wide log subscriber.
//!
//! Worker threads log concurrently. Every event is formatted in full and
//! written to stderr under one lock, tagged with the `cam-{id}` thread name,
//! so lines from different cameras never interleave.

use std::io;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_writer(Mutex::new(io::stderr()))
        .with_thread_names(true)
        .with_target(false)
        .try_init()
        .is_ok()
}

//! Logging macros for the schedule engine with verbosity level control.
//!
//! Events go through `tracing`; the verbosity gate keeps the hot solver loops
//! free of formatting work when disabled (verbosity=0).
//! - 0: SILENT (only errors)
//! - 1: CHANGES (recomputations, rollups, commits)
//! - 2: CHECKS (per-task constraint and edge decisions)
//! - 3: DEBUG (full forward/backward pass internals)

use tracing_subscriber::EnvFilter;

/// Verbosity level constants.
pub const VERBOSITY_SILENT: u8 = 0;
pub const VERBOSITY_CHANGES: u8 = 1;
pub const VERBOSITY_CHECKS: u8 = 2;
pub const VERBOSITY_DEBUG: u8 = 3;

/// Log at CHANGES level (verbosity >= 1).
///
/// Used for: recomputation summaries, commits, rollbacks.
#[macro_export]
macro_rules! log_changes {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHANGES {
            tracing::info!($($arg)*);
        }
    };
}

/// Log at CHECKS level (verbosity >= 2).
///
/// Used for: constraint violations, driving predecessors, skipped rows.
#[macro_export]
macro_rules! log_checks {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHECKS {
            tracing::debug!($($arg)*);
        }
    };
}

/// Log at DEBUG level (verbosity >= 3).
///
/// Used for: per-edge date bounds in the forward and backward passes.
#[macro_export]
macro_rules! log_debug {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_DEBUG {
            tracing::trace!($($arg)*);
        }
    };
}

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (e.g. `"gantt_engine=info"`).
///
/// Returns false when a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

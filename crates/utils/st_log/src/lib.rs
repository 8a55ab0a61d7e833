//! Text logging for strata crates.
//!
//! * `trace`: spammy things (per-key KV traffic)
//! * `debug`: useful when debugging (transaction boundaries, cache misses)
//! * `info`: things operators want to see (startup, recovery)
//! * `warn`: problems we recover from (orphaned chunks, WAL tail truncation)
//! * `error`: loss of functionality or data
//!
//! Library code only ever uses the macros; the process-wide sink and the
//! per-subsystem level table are configured exactly once via
//! [`setup_logging`], never consulted on hot metadata paths.

pub use log::{debug, error, info, trace, warn};
pub use log::{Level, LevelFilter};

mod setup;

pub use setup::{default_log_filter, setup_logging};

//! One-shot logging setup for binaries and tests.

/// The filter used when `STRATA_LOG` is not set.
///
/// The same directive syntax as `RUST_LOG`, so per-subsystem levels are
/// spelled `st_kv=debug,st_meta=trace`.
pub fn default_log_filter() -> String {
    std::env::var("STRATA_LOG").unwrap_or_else(|_| "info".to_owned())
}

/// Directs [`log`] calls to stderr. Safe to call more than once; only the
/// first call installs the logger.
pub fn setup_logging() {
    fn setup() {
        let filter = default_log_filter();

        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&filter);
        // `try_init` rather than `init`: tests may race another harness
        // that already installed a logger.
        builder.try_init().ok();
    }

    use std::sync::Once;
    static START: Once = Once::new();
    START.call_once(setup);
}

//! Shared tracing/logging initialization.
//!
//! Log lines always go to stderr: stdout belongs to the supervised child's
//! output when running through the `cmdpipe` binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter directive for the cmdpipe crates at `level`.
pub fn default_filter(level: &str) -> String {
    format!("cmdpipe={level},cmdpipe_core={level},cmdpipe_cli={level}")
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (see [`default_filter`]).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str, log_json: bool) -> bool {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .is_ok()
    }
}

/// Run `f` under a temporary stderr subscriber at `warn`.
///
/// For diagnostics emitted before the configured subscriber can be built,
/// such as ignored settings while loading the configuration that decides the
/// log level.
pub fn with_bootstrap_tracing<T>(f: impl FnOnce() -> T) -> T {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter("warn")),
    );
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    tracing::subscriber::with_default(subscriber, f)
}

//! Tracing subscriber setup for the `huddled` binary
//!
//! Logs go to stderr so stdout stays free for replay output. `RUST_LOG`
//! overrides the level chosen on the command line.

use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber; later calls are no-ops
pub fn init(level: &str, json: bool) {
    let _ = TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        if json {
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        } else {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stderr)
                .with_target(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    });
}

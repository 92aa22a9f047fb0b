//! Structured logging setup for the server and worker launchers.
//!
//! Matches the level-selection convention of the teacher's
//! `knhk-cli::tracing::init_tracing` (a `*_TRACE` env var mapped onto
//! `tracing`/`tracing-subscriber` filter directives), minus its
//! OpenTelemetry exporter layer: this core has no collector to export
//! spans to, so `init` wires a plain `fmt` subscriber and nothing else.

use tracing_subscriber::EnvFilter;

/// Env var selecting the log level, mirroring the teacher's `KNHK_TRACE`
/// but named for this core.
pub const TRACE_ENV_VAR: &str = "DFLOW_TRACE";

fn filter_for(level: &str) -> EnvFilter {
    match level.to_ascii_lowercase().as_str() {
        "error" => EnvFilter::new("error"),
        "warn" => EnvFilter::new("warn"),
        "info" => EnvFilter::new("info"),
        "debug" => EnvFilter::new("debug"),
        "trace" => EnvFilter::new("trace"),
        "1" | "true" | "yes" => EnvFilter::new("debug"),
        "0" | "false" | "no" => EnvFilter::new("error"),
        _ => EnvFilter::new("info"),
    }
}

/// Initialize the global `tracing` subscriber from `DFLOW_TRACE`
/// (defaulting to `info`). Safe to call once per process; a second call
/// (e.g. from a test harness that already installed a subscriber) is
/// reported rather than panicking.
pub fn init() {
    let level = std::env::var(TRACE_ENV_VAR).unwrap_or_else(|_| "info".to_string());
    let filter = filter_for(&level);
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already initialized, skipping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_levels() {
        assert_eq!(filter_for("debug").to_string(), "debug");
        assert_eq!(filter_for("nonsense").to_string(), "info");
        assert_eq!(filter_for("true").to_string(), "debug");
    }
}

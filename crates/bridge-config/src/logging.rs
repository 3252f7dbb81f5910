//! Logging initialization for the bridge.
//!
//! Thin wrapper over the observability crate that understands the level
//! names accepted on the command line.

use std::path::Path;

pub use observability::LogConfig;

/// Service name written into every JSONL log line.
pub const SERVICE_NAME: &str = "mower-mqtt-bridge";

/// Initialize logging with a command-line level name.
///
/// `RUST_LOG` still overrides the filter. With `log_file` set, structured
/// JSONL is appended there in addition to stderr.
///
/// ```ignore
/// init_logging("debug", None)?;
/// tracing::info!("Starting Mower MQTT Bridge...");
/// ```
pub fn init_logging(level: &str, log_file: Option<&Path>) -> std::io::Result<()> {
    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: filter_directive(level).into(),
        log_path: log_file.map(Path::to_path_buf),
        also_stderr: true,
    })
}

/// Map a level name to an `EnvFilter` directive; `none`/`off` silence output.
fn filter_directive(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "none" | "off" => "off",
        _ => match parse_level(level) {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        },
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" | "critical" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

//! Structured logging setup for the TURN relay
//!
//! The configured level applies to the relay's own crates; dependencies log
//! warnings and above unless `RUST_LOG` says otherwise. Client addresses,
//! usernames and relay addresses are emitted as structured fields by the
//! protocol crates.

use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Crates whose events follow the configured level
const RELAY_TARGETS: [&str; 5] = ["turn_codec", "turn_core", "turn_config", "turn_server", "turn_logging"];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable (for development)
    Console,
    /// One JSON object per line
    Json,
}

fn relay_directives(level: &str) -> String {
    let mut directives = String::from("warn");
    for target in RELAY_TARGETS {
        directives.push_str(&format!(",{}={}", target, level));
    }
    directives
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(relay_directives(default_level)))
        .unwrap_or_else(|_| EnvFilter::new(relay_directives("info")))
}

/// Initialize logging in the given format
pub fn init(service_name: &str, default_level: &str, format: LogFormat) {
    match format {
        LogFormat::Json => init_logging(service_name, default_level),
        LogFormat::Console => init_console_logging(service_name, default_level),
    }
}

/// Initialize JSON logging.
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn init_logging(service_name: &str, default_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    tracing::info!(
        service = service_name,
        version = env!("CARGO_PKG_VERSION"),
        "Logging initialized"
    );
}

/// Initialize human readable logging
pub fn init_console_logging(service_name: &str, default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        service = service_name,
        version = env!("CARGO_PKG_VERSION"),
        "Console logging initialized"
    );
}

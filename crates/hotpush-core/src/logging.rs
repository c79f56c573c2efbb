//! Tracing integration for structured logging.
//!
//! Provides logging setup for the server binary with:
//! - Configurable verbosity levels
//! - Optional file output
//! - JSON or text format

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::Result;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

/// Initialize the logging system.
///
/// `verbosity` maps 0=warn, 1=info, 2=debug, 3+=trace for the hotpush
/// crates; `RUST_LOG` overrides the whole filter when set.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>, format: LogFormat) -> Result<()> {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("hotpush_core={level},hotpush_server={level}"))
    });

    let registry = tracing_subscriber::registry().with(filter);

    let init_result = match (log_file, format) {
        (None, LogFormat::Text) => registry
            .with(fmt::layer().with_target(true).with_file(verbosity >= 3))
            .try_init(),
        (None, LogFormat::Json) => registry.with(fmt::layer().json()).try_init(),
        (Some(path), LogFormat::Text) => {
            let file = open_log_file(path)?;
            registry
                .with(fmt::layer().with_writer(file).with_ansi(false))
                .try_init()
        }
        (Some(path), LogFormat::Json) => {
            let file = open_log_file(path)?;
            registry.with(fmt::layer().json().with_writer(file)).try_init()
        }
    };

    init_result.map_err(|e| crate::Error::Io(std::io::Error::other(e.to_string())))
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(Into::into)
}

/// Initialize logging with defaults for testing.
///
/// Silently ignores errors (logging may already be initialized).
pub fn init_test_logging() {
    let _ = init_logging(1, None, LogFormat::Text);
}

//! Structured logging for hoard
//!
//! Every cache event is logged with the same structured fields so that the
//! JSON output can be filtered without parsing messages.
//!
//! # Log Format Conventions
//!
//! - `service`: The component emitting the event ("cache", "cache.jsonl", ...)
//! - `operation`: What was being done ("get", "set", "compact", ...)
//! - `status`: The outcome ("hit", "miss", "pending", "error", ...)
//! - `cache`: Sanitized cache name
//! - `sha`: Entry digest (hex)
//!
//! # Examples
//!
//! ```rust,ignore
//! use hoard::logging::{operations, services, status};
//! use tracing::debug;
//!
//! debug!(
//!     service = services::CACHE,
//!     operation = operations::GET,
//!     status = status::HIT,
//!     cache = %name,
//!     sha = %sha,
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Formatter that shows "hoard" instead of the full module path
struct HoardFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for HoardFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        // Write timestamp
        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )?;

        // Write level with hoard in parentheses and color if ansi enabled
        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m", // Red
                tracing::Level::WARN => "\x1b[33m",  // Yellow
                tracing::Level::INFO => "\x1b[32m",  // Green
                tracing::Level::DEBUG => "\x1b[34m", // Blue
                tracing::Level::TRACE => "\x1b[35m", // Magenta
            };
            write!(writer, "{}{:5}(hoard)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(hoard): ", meta.level())?;
        }

        // Write fields and message
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    Pretty,
    /// Compact format (for CI/production)
    Compact,
    /// JSON format (for log aggregation systems)
    Json,
}

impl LogFormat {
    /// Parse from environment variable (HOARD_LOG_FORMAT)
    pub fn from_env() -> Self {
        let requested = std::env::var("HOARD_LOG_FORMAT").unwrap_or_default();
        Self::parse(&requested).unwrap_or_else(|| {
            // Default: pretty for dev, compact for production/CI
            if std::env::var("CI").is_ok() {
                Self::Compact
            } else {
                Self::Pretty
            }
        })
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "debug", "info", "warn")
/// - `HOARD_LOG_FORMAT`: Set format ("pretty", "compact", "json")
/// - `CI`: If set, defaults to compact format
///
/// Cache hits and misses are logged at debug level (`RUST_LOG=hoard=debug`).
/// A second call keeps the first subscriber.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let format = LogFormat::from_env();

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(HoardFormatter { with_ansi: true })
                        .with_writer(io::stderr),
                )
                .try_init()
                .ok();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(HoardFormatter { with_ansi: false })
                        .with_writer(io::stderr),
                )
                .try_init()
                .ok();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_ansi(false)
                        .with_writer(io::stderr)
                        .json(),
                )
                .try_init()
                .ok();
        }
    }
}

/// Standard field names for consistent logging
#[allow(dead_code)]
pub mod fields {
    /// Component name (e.g., "cache", "cache.jsonl")
    pub const SERVICE: &str = "service";
    /// Operation name (e.g., "get", "set", "compact")
    pub const OPERATION: &str = "operation";
    /// Status (e.g., "hit", "miss", "error")
    pub const STATUS: &str = "status";
    /// Sanitized cache name
    pub const CACHE: &str = "cache";
    /// Entry digest (hex-encoded)
    pub const SHA: &str = "sha";
    /// Size in bytes
    pub const SIZE_BYTES: &str = "size_bytes";
    /// Number of entries (for load and compaction)
    pub const ENTRY_COUNT: &str = "entry_count";
    /// Number of skipped log lines
    pub const MALFORMED_COUNT: &str = "malformed_count";
}

/// Service names for consistent logging
pub mod services {
    pub const CACHE: &str = "cache";
    pub const REGISTRY: &str = "cache.registry";
    pub const JSONL: &str = "cache.jsonl";
    pub const DIRECTORY: &str = "cache.directory";
    pub const BLOB: &str = "blob";
}

/// Operation names for consistent logging
pub mod operations {
    pub const GET: &str = "get";
    pub const SET: &str = "set";
    pub const DELETE: &str = "delete";
    pub const GET_OR_UPDATE: &str = "get_or_update";
    pub const LOAD: &str = "load";
    pub const COMPACT: &str = "compact";
    pub const LIST: &str = "list";
    pub const OPEN: &str = "open";
    pub const CLEAR: &str = "clear";
    pub const WRITE: &str = "write";
}

/// Status values for consistent logging
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const PENDING: &str = "pending";
    pub const REJECTED: &str = "rejected";
    pub const ERROR: &str = "error";
    pub const NOT_FOUND: &str = "not_found";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_format() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("compact"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }
}

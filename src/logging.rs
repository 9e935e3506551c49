//! Logging setup on the `tracing` ecosystem
//!
//! # Environment variables
//!
//! - `RUST_LOG`: standard tracing filter, takes precedence when set
//! - `KERNELFORGE_LOG_LEVEL`: simple level (error, warn, info, debug, trace)
//! - `KERNELFORGE_LOG_FORMAT`: "human" (default) or "json"

use std::str::FromStr;

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INITIALIZED: OnceCell<()> = OnceCell::new();

const LEVEL_ENV: &str = "KERNELFORGE_LOG_LEVEL";
const FORMAT_ENV: &str = "KERNELFORGE_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("invalid log level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" | "pretty" | "console" => Ok(LogFormat::Human),
            "json" | "structured" => Ok(LogFormat::Json),
            other => Err(format!("invalid log format '{other}'")),
        }
    }
}

/// Initialize the global subscriber from the environment. Idempotent; later
/// calls are no-ops so embedders can install their own subscriber first.
pub fn init_from_env() {
    let level = std::env::var(LEVEL_ENV)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    let format = std::env::var(FORMAT_ENV)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    init_with(level, format);
}

/// Initialize with an explicit level and format. Idempotent.
pub fn init_with(level: LogLevel, format: LogFormat) {
    INITIALIZED.get_or_init(|| {
        let filter = match std::env::var("RUST_LOG") {
            Ok(directives) => EnvFilter::try_new(directives)
                .unwrap_or_else(|_| EnvFilter::new(level.as_filter_str())),
            Err(_) => EnvFilter::new(level.as_filter_str()),
        };

        let registry = tracing_subscriber::registry().with(filter);
        let result = match format {
            LogFormat::Human => registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_writer(std::io::stderr),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(false)
                        .with_file(true)
                        .with_line_number(true)
                        .with_writer(std::io::stderr),
                )
                .try_init(),
        };
        // A subscriber installed by the embedder wins.
        let _ = result;
    });
}

pub fn is_initialized() -> bool {
    INITIALIZED.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse() {
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn formats_parse() {
        assert_eq!("human".parse::<LogFormat>().unwrap(), LogFormat::Human);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn init_is_idempotent() {
        init_from_env();
        init_from_env();
        init_with(LogLevel::Debug, LogFormat::Json);
        assert!(is_initialized());
    }
}

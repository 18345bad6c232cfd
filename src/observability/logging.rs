//! Structured logging for the client and the CLI
//!
//! Output is driven by the `[logging]` section of [`ClientConfig`]:
//!
//! ```toml
//! [logging]
//! level = "debug"   # error, warn, info, debug, trace
//! format = "text"   # json (default) or text
//! spans = true      # emit span open/close events
//! ```
//!
//! Each `-v` on the command line steps one level more verbose. `RUST_LOG`,
//! when set, replaces the computed filter entirely.
//!
//! [`ClientConfig`]: crate::config::ClientConfig

use crate::config::LoggingSection;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependency targets clamped to `warn`
const QUIET_TARGETS: [&str; 2] = ["rumqttc=warn", "tokio=warn"];

/// Least to most verbose
const LEVELS: [Level; 5] = [
    Level::ERROR,
    Level::WARN,
    Level::INFO,
    Level::DEBUG,
    Level::TRACE,
];

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event, for log aggregation
    #[default]
    Json,
    /// Single-line output for a terminal
    Text,
}

/// Parse a level name such as `info` or `DEBUG`
pub fn parse_level(name: &str) -> Option<Level> {
    name.trim().parse().ok()
}

/// `configured` stepped `verbose` levels towards TRACE
pub fn effective_level(configured: Level, verbose: u8) -> Level {
    let start = LEVELS
        .iter()
        .position(|level| *level == configured)
        .unwrap_or(2);
    LEVELS[(start + usize::from(verbose)).min(LEVELS.len() - 1)]
}

/// Filter at `level` with noisy dependencies clamped
pub fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::new(level.to_string());
    for directive in QUIET_TARGETS {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Install the global subscriber
///
/// Returns `false` when a subscriber was already installed.
pub fn init_logging(settings: &LoggingSection, verbose: u8) -> bool {
    let configured = parse_level(&settings.level).unwrap_or(Level::INFO);
    let filter = match env::var("RUST_LOG") {
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => build_filter(effective_level(configured, verbose)),
    };

    let span_events = if settings.spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match settings.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_span_events(span_events))
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_span_events(span_events),
            )
            .try_init(),
    };
    installed.is_ok()
}

/// Span around a single broker operation
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_operation", $($field)*)
    };
}

/// Span around a connect or disconnect stage
#[macro_export]
macro_rules! lifecycle_span {
    ($($field:tt)*) => {
        tracing::info_span!("lifecycle_event", $($field)*)
    };
}

pub use {lifecycle_span, mqtt_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_names() {
        assert_eq!(parse_level("error"), Some(Level::ERROR));
        assert_eq!(parse_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_level(" Debug "), Some(Level::DEBUG));
        assert_eq!(parse_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_level("loud"), None);
        assert_eq!(parse_level(""), None);
    }

    #[test]
    fn test_verbosity_steps_towards_trace() {
        assert_eq!(effective_level(Level::INFO, 0), Level::INFO);
        assert_eq!(effective_level(Level::INFO, 1), Level::DEBUG);
        assert_eq!(effective_level(Level::WARN, 2), Level::DEBUG);
        assert_eq!(effective_level(Level::ERROR, 200), Level::TRACE);
    }

    #[test]
    fn test_filter_clamps_dependencies() {
        let filter = build_filter(Level::TRACE).to_string();

        assert!(filter.contains("rumqttc=warn"));
        assert!(filter.contains("tokio=warn"));
    }

    #[test]
    fn test_format_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: LogFormat,
        }

        let text: Wrapper = toml::from_str(r#"format = "text""#).unwrap();
        let json: Wrapper = toml::from_str(r#"format = "json""#).unwrap();

        assert_eq!(text.format, LogFormat::Text);
        assert_eq!(json.format, LogFormat::Json);
        assert!(toml::from_str::<Wrapper>(r#"format = "pretty""#).is_err());
        assert_eq!(LogFormat::default(), LogFormat::Json);
    }

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let settings = LoggingSection::default();
        init_logging(&settings, 0);
        assert!(!init_logging(&settings, 0));
    }
}

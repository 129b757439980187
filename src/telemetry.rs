//! Tracing subscriber setup.
//!
//! The `[log]` configuration section sets the defaults; these variables
//! override it:
//!
//! - `DEPOT_DEBUG=1` - debug level unless a level is given
//! - `DEPOT_LOG_LEVEL=trace|debug|info|warn|error`
//! - `DEPOT_LOG_FORMAT=pretty|compact|json`
//! - `DEPOT_LOG_COLOR=1|0`
//!
//! `RUST_LOG`, when set, replaces the level with a full filter directive.

use depot_config::{LogConfig, LogFormat};
use std::env;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Effective logging settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
    pub color: bool,
}

impl From<&LogConfig> for LogSettings {
    fn from(config: &LogConfig) -> Self {
        Self {
            level: config.level.to_ascii_lowercase(),
            format: config.format,
            color: config.color,
        }
    }
}

impl LogSettings {
    /// Apply `DEPOT_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| {
            lookup(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };

        if flag("DEPOT_DEBUG") == Some(true) {
            self.level = "debug".to_string();
        }
        if let Some(level) = lookup("DEPOT_LOG_LEVEL") {
            self.level = level.to_ascii_lowercase();
        }
        if let Some(format) = lookup("DEPOT_LOG_FORMAT").and_then(|f| parse_format(&f)) {
            self.format = format;
        }
        if let Some(color) = flag("DEPOT_LOG_COLOR") {
            self.color = color;
        }
        self
    }

    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

fn parse_format(raw: &str) -> Option<LogFormat> {
    match raw.to_ascii_lowercase().as_str() {
        "pretty" => Some(LogFormat::Pretty),
        "compact" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

/// Install the global subscriber
///
/// Returns `false` if a subscriber was already installed.
pub fn init(config: &LogConfig) -> bool {
    let settings = LogSettings::from(config).with_env_overrides();
    let registry = tracing_subscriber::registry().with(settings.filter());

    let installed = match settings.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_ansi(settings.color))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_ansi(settings.color))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
    };
    installed.is_ok()
}

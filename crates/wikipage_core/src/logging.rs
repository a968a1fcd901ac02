//! Tracing subscriber setup.
//!
//! Events go to stderr so command output on stdout stays machine readable.
//! `RUST_LOG` takes precedence over the configured level.

use std::io;

use anyhow::{Context, Result, bail};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" | "" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => bail!("unknown log format `{other}` (expected pretty, compact or json)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub level: String,
    pub format: LogFormat,
}

impl LoggingOptions {
    pub fn from_config(section: &LoggingSection, verbose: bool) -> Result<Self> {
        let format = match section.format.as_deref() {
            Some(value) => LogFormat::parse(value)?,
            None => LogFormat::Compact,
        };
        let level = if verbose {
            "debug".to_string()
        } else {
            section.level().to_string()
        };
        Ok(Self { level, format })
    }

    fn filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.level)
            .with_context(|| format!("invalid log level `{}`", self.level))
    }
}

/// Install the global subscriber. Calling it twice fails, which the CLI never does.
pub fn init_logging(options: &LoggingOptions) -> Result<()> {
    let registry = tracing_subscriber::registry().with(options.filter()?);
    let installed = match options.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(false).with_writer(io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init(),
    };
    installed.context("failed to install tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_formats() {
        assert_eq!(LogFormat::parse("Pretty").expect("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(" json ").expect("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("").expect("empty"), LogFormat::Compact);
        assert!(LogFormat::parse("xml").is_err());
    }

    #[test]
    fn verbose_flag_raises_level() {
        let section = LoggingSection {
            level: Some("warn".to_string()),
            format: Some("compact".to_string()),
        };
        let quiet = LoggingOptions::from_config(&section, false).expect("options");
        assert_eq!(quiet.level, "warn");
        let verbose = LoggingOptions::from_config(&section, true).expect("options");
        assert_eq!(verbose.level, "debug");
    }
}

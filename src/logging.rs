// SPDX-License-Identifier: Apache-2.0
use serde::Deserialize;
use tracing::subscriber::{set_global_default, SetGlobalDefaultError};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter, Registry};

/// Output format of the process-wide subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Bunyan-style JSON lines.
    #[default]
    Json,
    /// Human-readable console output.
    Pretty,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" | "bunyan" => Some(LogFormat::Json),
            "pretty" | "console" | "text" => Some(LogFormat::Pretty),
            _ => None,
        }
    }
}

/// `RUST_LOG` when set, else the configured filter, else `<name>=info,actix_web=info`.
fn env_filter(name: &str, configured: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives = configured
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{name}=info,actix_web=info"));
        EnvFilter::new(directives)
    })
}

/// Initialize the Bunyan (JSON) tracing subscriber for the application
pub fn init_tracing<Sink>(
    name: &str,
    filter: Option<&str>,
    sink: Sink,
) -> Result<(), SetGlobalDefaultError>
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    // Skip setting LogTracer if it's already been set
    let _ = LogTracer::init();

    let formatting_layer = BunyanFormattingLayer::new(name.into(), sink);
    let subscriber = Registry::default()
        .with(env_filter(name, filter))
        .with(JsonStorageLayer)
        .with(formatting_layer);

    set_global_default(subscriber)?;
    tracing::info!("Tracing initialized with Bunyan formatter");
    Ok(())
}

/// Initialize a more readable console logger for development
pub fn init_console_tracing(name: &str, filter: Option<&str>) -> Result<(), SetGlobalDefaultError> {
    let _ = LogTracer::init();

    let subscriber = tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(env_filter(name, filter))
        .finish();

    set_global_default(subscriber)?;
    tracing::info!("Console tracing initialized");
    Ok(())
}

/// Installs the subscriber matching `format`, writing JSON to stdout.
pub fn init(name: &str, format: LogFormat, filter: Option<&str>) -> Result<(), SetGlobalDefaultError> {
    match format {
        LogFormat::Json => init_tracing(name, filter, std::io::stdout),
        LogFormat::Pretty => init_console_tracing(name, filter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_format() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" pretty "), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }
}

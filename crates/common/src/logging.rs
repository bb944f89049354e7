//! Logging and OpenTelemetry tracing initialization.

use std::env;

use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable holding the OTLP collector URL.
pub const OTLP_URL_ENVVAR: &str = "CONCORD_OTLP_URL";

/// Environment variable holding the service label appended to the whoami string.
pub const SVC_LABEL_ENVVAR: &str = "CONCORD_SVC_LABEL";

/// Environment variable that, when `1`, annotates log lines with the source file.
pub const LOG_FILE_ENVVAR: &str = "LOG_FILE";

/// Environment variable that, when `1`, annotates log lines with the line number.
pub const LOG_LINE_NUM_ENVVAR: &str = "LOG_LINE_NUM";

/// Name of the tracer registered with the OTLP exporter.
const TRACER_NAME: &str = "concord";

/// Errors while installing the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The OTLP span exporter could not be built.
    #[error("failed to build OTLP exporter: {0}")]
    Exporter(String),

    /// A global subscriber is already installed.
    #[error("failed to install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Configuration for the logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    whoami: String,
    otel_url: Option<String>,
    with_file: bool,
    with_line_number: bool,
}

impl LoggerConfig {
    /// Creates a config that identifies the service as `whoami`, with no exporter.
    pub const fn new(whoami: String) -> Self {
        Self {
            whoami,
            otel_url: None,
            with_file: false,
            with_line_number: false,
        }
    }

    /// Builds the config from the standard environment variables.
    pub fn from_env(base: &str) -> Self {
        let label = env::var(SVC_LABEL_ENVVAR).ok();
        let flag = |name: &str| env::var(name).is_ok_and(|v| v == "1");

        Self {
            whoami: whoami_string(base, label.as_deref()),
            otel_url: env::var(OTLP_URL_ENVVAR).ok(),
            with_file: flag(LOG_FILE_ENVVAR),
            with_line_number: flag(LOG_LINE_NUM_ENVVAR),
        }
    }

    /// Exports spans to the OTLP collector at `url`.
    pub fn with_otlp_url(mut self, url: impl Into<String>) -> Self {
        self.otel_url = Some(url.into());
        self
    }

    /// Annotates log lines with source file and line number.
    pub const fn with_source_location(mut self, file: bool, line_number: bool) -> Self {
        self.with_file = file;
        self.with_line_number = line_number;
        self
    }

    /// The service identifier attached to logs and spans.
    pub fn whoami(&self) -> &str {
        &self.whoami
    }

    /// The OTLP collector URL, if exporting.
    pub fn otlp_url(&self) -> Option<&str> {
        self.otel_url.as_deref()
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::from_env("concord")
    }
}

/// Installs the global subscriber: compact stdout filtered by `RUST_LOG`, plus OTLP span export
/// when a collector URL is configured.
pub fn init(config: LoggerConfig) -> Result<(), LoggingError> {
    let stdout = tracing_subscriber::fmt::layer()
        .compact()
        .event_format(
            tracing_subscriber::fmt::format()
                .with_file(config.with_file)
                .with_line_number(config.with_line_number),
        )
        .with_filter(EnvFilter::from_default_env());

    if let Some(otel_url) = &config.otel_url {
        let resource = Resource::builder()
            .with_attribute(KeyValue::new("service.name", config.whoami.clone()))
            .build();

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(otel_url)
            .build()
            .map_err(|err| LoggingError::Exporter(err.to_string()))?;

        let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_resource(resource)
            .with_batch_exporter(exporter)
            .build();
        let otel = tracing_opentelemetry::layer().with_tracer(provider.tracer(TRACER_NAME));

        tracing_subscriber::registry()
            .with(stdout)
            .with(otel)
            .try_init()?;
    } else {
        tracing_subscriber::registry().with(stdout).try_init()?;
    }

    info!(whoami = %config.whoami, "logging started");
    Ok(())
}

/// Computes the whoami string: `base`, or `base%label` when a service label is set.
pub fn whoami_string(base: &str, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("{base}%{label}"),
        None => base.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whoami_appends_label() {
        assert_eq!(whoami_string("node", None), "node");
        assert_eq!(whoami_string("node", Some("alice")), "node%alice");
    }

    #[test]
    fn builder_sets_fields() {
        let config = LoggerConfig::new("node".to_owned())
            .with_otlp_url("http://localhost:4317")
            .with_source_location(true, false);

        assert_eq!(config.whoami(), "node");
        assert_eq!(config.otlp_url(), Some("http://localhost:4317"));
        assert!(config.with_file);
        assert!(!config.with_line_number);
    }

    #[test]
    fn second_init_fails() {
        let config = LoggerConfig::new("test".to_owned());
        // The first call may race other tests for the global slot; only the second must fail.
        let _ = init(config.clone());
        assert!(matches!(init(config), Err(LoggingError::Install(_))));
    }
}

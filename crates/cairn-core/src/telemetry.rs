//! Telemetry and observability infrastructure
//!
//! TigerStyle: Explicit telemetry configuration with bounded resource usage.
//!
//! Installs the global tracing subscriber for processes hosting actors or
//! reservations. OTLP export and the Prometheus registry require the `otel`
//! feature; without it only the local subscriber is installed.

use crate::error::{Error, Result};

/// Output format of the local subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidConfiguration {
                field: "telemetry.log_format".into(),
                reason: format!("unknown format {}", other),
            }),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to spans and metrics
    pub service_name: String,
    /// OTLP endpoint (e.g., "http://localhost:4317")
    pub otlp_endpoint: Option<String>,
    /// Whether to write events to stdout
    pub stdout_enabled: bool,
    /// Stdout format
    pub log_format: LogFormat,
    /// Log level filter, used when `RUST_LOG` is unset
    pub log_level: String,
    /// Whether to register the Prometheus exporter
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "cairn".to_string(),
            otlp_endpoint: None,
            stdout_enabled: true,
            log_format: LogFormat::Pretty,
            log_level: "info".to_string(),
            metrics_enabled: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the OTLP endpoint
    pub fn with_otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Disable stdout output
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Set the stdout format
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable the Prometheus exporter
    pub fn with_metrics(mut self) -> Self {
        self.metrics_enabled = true;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `OTEL_SERVICE_NAME`: Service name (default: "cairn")
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint
    /// - `RUST_LOG`: Log level filter (default: "info")
    /// - `CAIRN_LOG_FORMAT`: "pretty" or "json" (default: "pretty")
    /// - `METRICS_ENABLED`: Enable the Prometheus exporter (default: false)
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "cairn".to_string());

        let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let log_format = std::env::var("CAIRN_LOG_FORMAT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();

        let metrics_enabled = std::env::var("METRICS_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        Self {
            service_name,
            otlp_endpoint,
            stdout_enabled: true,
            log_format,
            log_level,
            metrics_enabled,
        }
    }
}

fn subscriber_error(e: impl std::fmt::Display) -> Error {
    Error::internal(format!("failed to initialize tracing subscriber: {}", e))
}

/// Initialize telemetry with OpenTelemetry support
///
/// ```rust,ignore
/// use cairn_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _guard = init_telemetry(TelemetryConfig::from_env())?;
/// ```
#[cfg(feature = "otel")]
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::runtime::Tokio;
    use opentelemetry_sdk::trace::Config;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (pretty_layer, json_layer) = match (config.stdout_enabled, config.log_format) {
        (false, _) => (None, None),
        (true, LogFormat::Pretty) => (Some(tracing_subscriber::fmt::layer()), None),
        (true, LogFormat::Json) => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    let otel_layer = match config.otlp_endpoint {
        Some(ref endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let trace_config =
                Config::default().with_resource(opentelemetry_sdk::Resource::new(vec![
                    opentelemetry::KeyValue::new("service.name", config.service_name.clone()),
                ]));

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(trace_config)
                .install_batch(Tokio)
                .map_err(|e| {
                    Error::internal(format!("failed to initialize OpenTelemetry: {}", e))
                })?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(pretty_layer)
        .with(json_layer)
        .with(otel_layer)
        .try_init()
        .map_err(subscriber_error)?;

    tracing::info!(
        service = %config.service_name,
        otlp_endpoint = ?config.otlp_endpoint,
        "Telemetry initialized"
    );

    let metrics_registry = init_metrics(&config)?;

    Ok(TelemetryGuard {
        metrics_registry,
    })
}

/// Guard that flushes exporters when dropped
#[cfg(feature = "otel")]
pub struct TelemetryGuard {
    metrics_registry: Option<prometheus::Registry>,
}

#[cfg(feature = "otel")]
impl TelemetryGuard {
    /// Registry to scrape, when metrics are enabled
    pub fn metrics_registry(&self) -> Option<&prometheus::Registry> {
        self.metrics_registry.as_ref()
    }
}

/// Register the Prometheus exporter as the global meter provider
#[cfg(feature = "otel")]
pub fn init_metrics(config: &TelemetryConfig) -> Result<Option<prometheus::Registry>> {
    if !config.metrics_enabled {
        return Ok(None);
    }

    use opentelemetry_sdk::metrics::MeterProviderBuilder;
    use opentelemetry_sdk::Resource;

    let registry = prometheus::Registry::new();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .map_err(|e| Error::internal(format!("failed to create Prometheus exporter: {}", e)))?;

    let resource = Resource::new(vec![opentelemetry::KeyValue::new(
        "service.name",
        config.service_name.clone(),
    )]);

    let provider = MeterProviderBuilder::default()
        .with_resource(resource)
        .with_reader(exporter)
        .build();

    opentelemetry::global::set_meter_provider(provider);

    tracing::info!(service = %config.service_name, "Metrics initialized");

    Ok(Some(registry))
}

#[cfg(feature = "otel")]
impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

/// Initialize the local subscriber only
#[cfg(not(feature = "otel"))]
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (pretty_layer, json_layer) = match (config.stdout_enabled, config.log_format) {
        (false, _) => (None, None),
        (true, LogFormat::Pretty) => (Some(tracing_subscriber::fmt::layer()), None),
        (true, LogFormat::Json) => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(pretty_layer)
        .with(json_layer)
        .try_init()
        .map_err(subscriber_error)?;

    Ok(TelemetryGuard {})
}

/// No-op guard when otel feature is not enabled
#[cfg(not(feature = "otel"))]
pub struct TelemetryGuard {}

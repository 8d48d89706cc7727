//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use maestro_observe::{TracingOptions, init_tracing, shutdown_tracing};
//!
//! init_tracing(&TracingOptions::default()).unwrap();
//! // ... run workflows ...
//! shutdown_tracing();
//! ```

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info,maestro_core=info,maestro_infra=info";

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

#[derive(Debug, Clone)]
pub struct TracingOptions {
    pub format: LogFormat,
    /// Bridge spans to OpenTelemetry (stdout exporter).
    pub enable_otel: bool,
    /// Filter directives applied when `RUST_LOG` is not set.
    pub default_filter: String,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            enable_otel: false,
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

/// `RUST_LOG` when set and valid, otherwise `fallback`.
pub fn build_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the global tracing subscriber.
///
/// Always installs a `fmt` layer (text or JSON) with span close timing. When
/// `enable_otel` is set, spans are also exported through OpenTelemetry with
/// a stdout exporter; swap the exporter for OTLP in production.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let filter = build_filter(&options.default_filter);

    let fmt_layer = match options.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    };

    let otel_layer = if options.enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("maestro");

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    tracing::debug!(format = ?options.format, otel = options.enable_otel, "tracing initialized");
    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// No-op when OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_text_without_otel() {
        let options = TracingOptions::default();
        assert_eq!(options.format, LogFormat::Text);
        assert!(!options.enable_otel);
        assert_eq!(options.default_filter, DEFAULT_FILTER);
    }

    #[test]
    fn invalid_fallback_filter_does_not_panic() {
        let filter = build_filter("maestro_core=[not a level");
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn second_init_is_an_error() {
        let options = TracingOptions {
            format: LogFormat::Json,
            ..TracingOptions::default()
        };
        let first = init_tracing(&options);
        let second = init_tracing(&options);
        // Another test binary may already own the global subscriber.
        assert!(first.is_err() || second.is_err());
        shutdown_tracing();
    }
}

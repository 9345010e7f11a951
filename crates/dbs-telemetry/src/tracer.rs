//! Tracer setup and management

use dbs_core::config::{LogFormat, ObservabilityConfig};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::TracerProvider;
use std::sync::{Arc, OnceLock};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Global tracer provider holder
static TRACER_PROVIDER: OnceLock<Arc<TracerProvider>> = OnceLock::new();

/// Initialize tracing with OpenTelemetry support.
///
/// Installs the OpenTelemetry layer next to a pretty or JSON `fmt` layer,
/// filtered by `RUST_LOG` (falling back to `config.log_filter`).
///
/// Returns false if a global subscriber was already installed.
pub fn init_telemetry(config: &ObservabilityConfig) -> bool {
    let tracer_provider = TracerProvider::builder().build();

    let service_name = config
        .service_name
        .clone()
        .unwrap_or_else(|| crate::attributes::SERVICE_NAME.to_string());
    let tracer = tracer_provider.tracer(service_name);

    let _ = TRACER_PROVIDER.set(Arc::new(tracer_provider));

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone()));

    let registry = tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()
            .is_ok(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(false)
                    .with_line_number(true),
            )
            .try_init()
            .is_ok(),
    }
}

/// Get the global tracer provider if initialized
pub fn tracer_provider() -> Option<Arc<TracerProvider>> {
    TRACER_PROVIDER.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let config = ObservabilityConfig::default();
        let first = init_telemetry(&config);
        let second = init_telemetry(&config);
        // Only one global subscriber can ever be installed per process
        assert!(!(first && second));
        assert!(tracer_provider().is_some());
    }
}

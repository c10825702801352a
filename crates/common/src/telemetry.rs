//! Telemetry and observability setup

use crate::config::{LogFormat, ObservabilityConfig};
use crate::error::Result;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{self, RandomIdGenerator, Sampler},
    Resource,
};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Initialize telemetry subsystems
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    let registry = Registry::default().with(env_filter).with(fmt_layer);

    if config.tracing_enabled {
        let tracer = init_tracer(config)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry.with(telemetry_layer).init();
    } else {
        registry.init();
    }

    Ok(())
}

/// Initialize OpenTelemetry tracer
fn init_tracer(config: &ObservabilityConfig) -> Result<opentelemetry_sdk::trace::Tracer> {
    let resource = Resource::new(vec![
        KeyValue::new("service.name", "orion-orchestrator"),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let tracer = if let Some(endpoint) = &config.otlp_endpoint {
        opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint),
            )
            .with_trace_config(
                trace::config()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_id_generator(RandomIdGenerator::default())
                    .with_max_events_per_span(64)
                    .with_max_attributes_per_span(16)
                    .with_resource(resource),
            )
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .map_err(|e| crate::error::Error::Internal(e.to_string()))?
    } else {
        // No collector configured: build a tracer backed by an in-process
        // provider with no exporter, so spans are recorded (and visible
        // to `tracing-opentelemetry`) but nothing is shipped off-box.
        use opentelemetry::trace::TracerProvider as _;
        let provider = opentelemetry_sdk::trace::TracerProvider::builder()
            .with_config(
                trace::config()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_id_generator(RandomIdGenerator::default())
                    .with_resource(resource),
            )
            .build();
        let tracer = provider.tracer("orion-orchestrator");
        global::set_tracer_provider(provider);
        tracer
    };

    Ok(tracer)
}

/// Shutdown telemetry gracefully
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

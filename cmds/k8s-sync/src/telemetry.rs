//! Log output and span export.
//!
//! Logs always go to stderr so stdout only carries the run summary. Spans are
//! exported over OTLP when an endpoint is configured through the standard
//! `OTEL_EXPORTER_OTLP_*` variables.

use std::{
	env,
	io::{self, IsTerminal},
};

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{
	SpanExporter, OTEL_EXPORTER_OTLP_ENDPOINT, OTEL_EXPORTER_OTLP_PROTOCOL,
	OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT, OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
};
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::{Level, Subscriber};
use tracing_subscriber::{
	layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

const SERVICE_NAME: &str = "k8s-sync";

/// Shuts the span exporter down when dropped, flushing batched spans.
///
/// Keep it alive in `main` until the command has finished.
pub struct TelemetryGuard {
	provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		let Some(provider) = self.provider.take() else {
			return;
		};
		if let Err(e) = provider.shutdown() {
			eprintln!("k8s-sync: flushing spans failed: {e}");
		}
	}
}

/// Level filter: `--log-level`, else `RUST_LOG`, else `info`.
pub fn filter(log_level: Option<Level>) -> EnvFilter {
	match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	}
}

fn log_layer<S>(pretty: bool) -> Box<dyn Layer<S> + Send + Sync>
where
	S: Subscriber + for<'a> LookupSpan<'a>,
{
	let layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);
	if pretty {
		layer.pretty().boxed()
	} else {
		layer.json().boxed()
	}
}

fn otlp_endpoint_set() -> bool {
	[OTEL_EXPORTER_OTLP_ENDPOINT, OTEL_EXPORTER_OTLP_TRACES_ENDPOINT]
		.iter()
		.any(|var| env::var_os(var).is_some())
}

fn span_exporter() -> Result<SpanExporter> {
	let protocol = env::var(OTEL_EXPORTER_OTLP_PROTOCOL);
	let exporter = match protocol
		.as_deref()
		.unwrap_or(OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT)
	{
		"grpc" => SpanExporter::builder().with_tonic().build(),
		_ => SpanExporter::builder().with_http().build(),
	};
	exporter.context("building OTLP span exporter")
}

fn tracer_provider() -> Result<SdkTracerProvider> {
	// The builder already reads OTEL_SERVICE_NAME and OTEL_RESOURCE_ATTRIBUTES
	let mut resource = Resource::builder();
	if env::var_os("OTEL_SERVICE_NAME").is_none() {
		resource = resource.with_service_name(SERVICE_NAME);
	}
	Ok(SdkTracerProvider::builder()
		.with_resource(resource.build())
		.with_batch_exporter(span_exporter()?)
		.build())
}

/// Install the global subscriber.
///
/// stderr gets pretty output on a terminal and JSON lines otherwise.
pub fn init(log_level: Option<Level>) -> Result<TelemetryGuard> {
	let provider = if otlp_endpoint_set() {
		Some(tracer_provider()?)
	} else {
		None
	};
	let span_layer = provider.as_ref().map(|provider| {
		opentelemetry::global::set_tracer_provider(provider.clone());
		tracing_opentelemetry::layer()
			.with_error_records_to_exceptions(true)
			.with_tracer(provider.tracer(SERVICE_NAME))
	});

	tracing_subscriber::registry()
		.with(filter(log_level))
		.with(log_layer(io::stderr().is_terminal()))
		.with(span_layer)
		.try_init()
		.context("installing tracing subscriber")?;

	Ok(TelemetryGuard { provider })
}

//! # Booking Application
//!
//! Binary that wires together all the components:
//! - Load configuration from environment
//! - Initialize the repository adapter and payment gateway
//! - Create the booking service and webhook reconciler
//! - Start the HTTP server

mod config;

use std::sync::Arc;

use opentelemetry::global;
use opentelemetry_sdk::{
    metrics::SdkMeterProvider, propagation::TraceContextPropagator, trace as sdktrace,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use booking_gateway::{Gateway, SandboxGateway, StripeGateway};
use booking_hex::{BookingService, CheckoutConfig, WebhookReconciler, inbound::HttpServer};
use booking_repo::build_repo;

fn init_tracer() -> anyhow::Result<(sdktrace::Tracer, sdktrace::SdkTracerProvider)> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    // Use gRPC exporter with batch processing (non-blocking)
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()?;

    let provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();

    global::set_tracer_provider(provider.clone());

    use opentelemetry::trace::TracerProvider as _;
    Ok((provider.tracer("booking-service"), provider))
}

/// Installs the meter provider the HTTP metrics layer reports to.
fn init_meter() -> anyhow::Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .build()?;

    let provider = SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .build();

    global::set_meter_provider(provider.clone());
    Ok(provider)
}

fn build_gateway(config: &config::Config) -> anyhow::Result<Gateway> {
    match &config.stripe_secret_key {
        Some(secret_key) => Ok(Gateway::Stripe(StripeGateway::new(
            secret_key.clone(),
            config.stripe_api_base.clone(),
            config.gateway_timeout,
        )?)),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set; using the sandbox payment gateway");
            Ok(Gateway::Sandbox(SandboxGateway::new(format!(
                "{}/sandbox-checkout",
                config.frontend_url.trim_end_matches('/')
            ))))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let (otel_tracer, otel_provider) = init_tracer()?;
    let meter_provider = init_meter()?;
    let telemetry = tracing_opentelemetry::layer().with_tracer(otel_tracer);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,booking_app=debug,booking_hex=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry)
        .init();

    let config = config::Config::from_env()?;

    tracing::info!("Starting booking server on port {}", config.port);
    tracing::info!(
        "Using database: {}",
        config.database_url.split(':').next().unwrap_or_default()
    );

    // Build repository (handles connection and migration)
    let repo = Arc::new(build_repo(&config.database_url).await?);

    let gateway = Arc::new(build_gateway(&config)?);
    tracing::info!(gateway = gateway.name(), timeout = ?config.gateway_timeout, "Payment gateway ready");

    let service = BookingService::new(
        repo.clone(),
        gateway,
        CheckoutConfig::for_frontend(&config.frontend_url, config.gateway_timeout),
    );
    let reconciler = WebhookReconciler::new(repo.clone());

    let server = HttpServer::with_rate_limit(service, reconciler, config.rate_limit_per_minute);
    let addr = format!("0.0.0.0:{}", config.port);

    server.run(&addr).await?;

    repo.close().await;
    tracing::info!("Database pool closed");

    // Ensure traces and metrics are flushed before exit
    let _ = meter_provider.shutdown();
    let _ = otel_provider.shutdown();
    Ok(())
}

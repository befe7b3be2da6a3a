//! HTTP Server configuration and startup.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{delete, get, patch, post},
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use booking_types::{BookingRepository, PaymentGateway};

use super::auth::auth_middleware;
use super::handlers::{self, AppState};
use super::rate_limit::{RateLimiterState, rate_limit_middleware};
use crate::openapi::ApiDoc;
use crate::{BookingService, WebhookReconciler};

pub const API_PREFIX: &str = "/api/v1";
pub const SWAGGER_PATH: &str = "/swagger-ui";
pub const API_DOCS_PATH: &str = "/api-docs";

/// HTTP Server for the Booking API.
pub struct HttpServer<R: BookingRepository, G: PaymentGateway> {
    state: Arc<AppState<R, G>>,
    rate_limiter: Arc<RateLimiterState>,
}

impl<R: BookingRepository, G: PaymentGateway> HttpServer<R, G> {
    /// Creates a new HTTP server allowing 100 requests per minute per key.
    pub fn new(service: BookingService<R, G>, reconciler: WebhookReconciler<R>) -> Self {
        Self {
            state: Arc::new(AppState {
                service,
                reconciler,
            }),
            rate_limiter: Arc::new(RateLimiterState::default()),
        }
    }

    /// Creates a new HTTP server with custom rate limiting.
    pub fn with_rate_limit(
        service: BookingService<R, G>,
        reconciler: WebhookReconciler<R>,
        requests_per_minute: u32,
    ) -> Self {
        Self {
            state: Arc::new(AppState {
                service,
                reconciler,
            }),
            rate_limiter: Arc::new(RateLimiterState::new(
                requests_per_minute,
                Duration::from_secs(60),
            )),
        }
    }

    fn api_routes() -> Router<Arc<AppState<R, G>>> {
        Router::new()
            .route("/health", get(handlers::health))
            .route("/bootstrap", post(handlers::bootstrap::<R, G>))
            .route(
                "/keys",
                post(handlers::create_api_key::<R, G>).get(handlers::list_api_keys::<R, G>),
            )
            .route("/keys/{id}", delete(handlers::delete_api_key::<R, G>))
            .route(
                "/booking",
                post(handlers::create_booking::<R, G>).get(handlers::list_bookings::<R, G>),
            )
            .route(
                "/booking/{id}",
                get(handlers::get_booking::<R, G>).delete(handlers::delete_booking::<R, G>),
            )
            .route(
                "/booking/{id}/status",
                patch(handlers::update_booking_status::<R, G>),
            )
            .route(
                "/booking/{id}/soft-delete",
                patch(handlers::soft_delete_booking::<R, G>),
            )
            .route(
                "/payment/webhook",
                post(handlers::payment_webhook::<R, G>),
            )
    }

    /// Builds the Axum router with all routes.
    pub fn router(&self) -> Router {
        // Build HTTP metrics layer (uses globally set MeterProvider)
        let metrics = axum_otel_metrics::HttpMetricsLayerBuilder::new().build();

        Router::new()
            .nest(API_PREFIX, Self::api_routes())
            .merge(
                SwaggerUi::new(SWAGGER_PATH).url("/api-docs/openapi.json", ApiDoc::openapi()),
            )
            .layer(metrics)
            .layer(middleware::from_fn_with_state(
                self.rate_limiter.clone(),
                rate_limit_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth_middleware::<R, G>,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Runs the server on the given address with graceful shutdown.
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}

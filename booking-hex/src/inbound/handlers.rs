//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use booking_types::{
    Actor, ApiKey, ApiKeyId, AppError, BookingId, BookingListParams, BookingRepository,
    CreateBookingRequest, GatewayEvent, PaymentGateway, Role, UpdateBookingStatusRequest,
    WebhookAck,
};

use crate::{BookingService, WebhookReconciler};

/// Application state shared across handlers.
pub struct AppState<R: BookingRepository, G: PaymentGateway> {
    pub service: BookingService<R, G>,
    pub reconciler: WebhookReconciler<R>,
}

/// Wrapper to implement IntoResponse for AppError (orphan rule workaround).
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0 {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Gateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
            "code": status.as_u16()
        });

        (status, Json(body)).into_response()
    }
}

fn parse_booking_id(id: &str) -> Result<BookingId, AppError> {
    id.parse()
        .map_err(|_| AppError::BadRequest("Invalid booking ID".into()))
}

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Bookings
// ─────────────────────────────────────────────────────────────────────────────

/// Create a booking and start checkout.
#[tracing::instrument(skip(state, req))]
pub async fn create_booking<R: BookingRepository, G: PaymentGateway>(
    State(state): State<Arc<AppState<R, G>>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let checkout = state.service.create_booking(actor, req).await?;
    Ok((StatusCode::CREATED, Json(checkout)))
}

/// List bookings visible to the caller.
#[tracing::instrument(skip(state))]
pub async fn list_bookings<R: BookingRepository, G: PaymentGateway>(
    State(state): State<Arc<AppState<R, G>>>,
    Extension(actor): Extension<Actor>,
    Query(params): Query<BookingListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.service.list_bookings(actor, &params).await?;
    Ok(Json(page))
}

#[tracing::instrument(skip(state), fields(booking_id = %id))]
pub async fn get_booking<R: BookingRepository, G: PaymentGateway>(
    State(state): State<Arc<AppState<R, G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state
        .service
        .get_booking(actor, parse_booking_id(&id)?)
        .await?;
    Ok(Json(booking))
}

#[tracing::instrument(skip(state, req), fields(booking_id = %id))]
pub async fn update_booking_status<R: BookingRepository, G: PaymentGateway>(
    State(state): State<Arc<AppState<R, G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(req): Json<UpdateBookingStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state
        .service
        .update_status(actor, parse_booking_id(&id)?, req)
        .await?;
    Ok(Json(booking))
}

#[tracing::instrument(skip(state), fields(booking_id = %id))]
pub async fn soft_delete_booking<R: BookingRepository, G: PaymentGateway>(
    State(state): State<Arc<AppState<R, G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state
        .service
        .soft_delete(actor, parse_booking_id(&id)?)
        .await?;
    Ok(Json(booking))
}

#[tracing::instrument(skip(state), fields(booking_id = %id))]
pub async fn delete_booking<R: BookingRepository, G: PaymentGateway>(
    State(state): State<Arc<AppState<R, G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.delete(actor, parse_booking_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway webhook
// ─────────────────────────────────────────────────────────────────────────────

/// Receives payment gateway events.
///
/// Every handled outcome, including duplicates and orphans, is acknowledged
/// with 200 so the gateway stops retrying.
#[tracing::instrument(skip(state, body))]
pub async fn payment_webhook<R: BookingRepository, G: PaymentGateway>(
    State(state): State<Arc<AppState<R, G>>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let event: GatewayEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {}", e)))?;
    if event.id.trim().is_empty() {
        return Err(AppError::BadRequest("Webhook event id is required".to_string()).into());
    }

    let outcome = state.reconciler.handle(&event).await?;

    Ok(Json(WebhookAck {
        message: outcome.message().to_string(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// API Key Management
// ─────────────────────────────────────────────────────────────────────────────

/// Bootstrap endpoint - creates the first API key.
///
/// This endpoint only works when there are NO existing API keys in the system.
/// The key it returns acts as SUPER_ADMIN.
#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct BootstrapRequest {
    /// Name for the API key
    #[schema(example = "ops-root")]
    pub name: String,
}

#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct ApiKeyCreatedResponse {
    /// The generated API key (shown only once)
    #[schema(example = "sk_abc123xyz...")]
    pub api_key: String,
    pub key: ApiKeyInfo,
    /// Informational message
    pub message: String,
}

/// Request to create a new API key.
#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct CreateApiKeyRequest {
    /// Name for the API key
    #[schema(example = "guide-portal")]
    pub name: String,
    pub role: Role,
    /// Guide or tourist the key acts for; required for GUIDE and TOURIST keys
    #[serde(default)]
    pub principal_id: Option<uuid::Uuid>,
}

/// API key metadata (the hash is never exposed).
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ApiKeyInfo {
    pub id: ApiKeyId,
    pub name: String,
    pub role: Role,
    pub principal_id: Option<uuid::Uuid>,
    pub is_active: bool,
    /// When the key was created (ISO 8601)
    #[schema(value_type = String, example = "2025-01-01T00:00:00Z")]
    pub created_at: String,
    /// When the key was last used (ISO 8601)
    #[schema(value_type = Option<String>)]
    pub last_used_at: Option<String>,
}

impl From<ApiKey> for ApiKeyInfo {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            role: key.role,
            principal_id: key.principal_id,
            is_active: key.is_active,
            created_at: key.created_at.to_rfc3339(),
            last_used_at: key.last_used_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

#[tracing::instrument(skip(state), fields(key_name = %req.name))]
pub async fn bootstrap<R: BookingRepository, G: PaymentGateway>(
    State(state): State<Arc<AppState<R, G>>>,
    Json(req): Json<BootstrapRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (api_key, raw_key) = state.service.bootstrap(&req.name).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiKeyCreatedResponse {
            api_key: raw_key,
            key: api_key.into(),
            message: "First API key created. Save this key securely - it won't be shown again!"
                .into(),
        }),
    ))
}

/// Create a new API key (admins only).
#[tracing::instrument(skip(state), fields(key_name = %req.name, role = %req.role))]
pub async fn create_api_key<R: BookingRepository, G: PaymentGateway>(
    State(state): State<Arc<AppState<R, G>>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (api_key, raw_key) = state
        .service
        .create_api_key(actor, &req.name, req.role, req.principal_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiKeyCreatedResponse {
            api_key: raw_key,
            key: api_key.into(),
            message: "API key created. Save this key securely - it won't be shown again!".into(),
        }),
    ))
}

#[tracing::instrument(skip(state))]
pub async fn list_api_keys<R: BookingRepository, G: PaymentGateway>(
    State(state): State<Arc<AppState<R, G>>>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    let keys = state.service.list_api_keys(actor).await?;
    let response: Vec<ApiKeyInfo> = keys.into_iter().map(ApiKeyInfo::from).collect();
    Ok(Json(response))
}

/// Delete (deactivate) an API key.
#[tracing::instrument(skip(state), fields(key_id = %id))]
pub async fn delete_api_key<R: BookingRepository, G: PaymentGateway>(
    State(state): State<Arc<AppState<R, G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key_id: ApiKeyId = id
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid API key ID".into()))?;

    state.service.delete_api_key(actor, key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

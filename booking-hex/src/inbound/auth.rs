//! Authentication middleware for API key validation.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use booking_types::{BookingRepository, PaymentGateway};

use super::handlers::AppState;
use super::server::{API_DOCS_PATH, API_PREFIX, SWAGGER_PATH};

/// Extracts the API key from the Authorization header.
/// Expected format: "Bearer <api_key>" or just "<api_key>"
fn extract_api_key(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?;
    Some(header.strip_prefix("Bearer ").unwrap_or(header))
}

/// Routes reachable without an API key.
fn is_public(method: &Method, path: &str) -> bool {
    let Some(api_path) = path.strip_prefix(API_PREFIX) else {
        return path.starts_with(SWAGGER_PATH) || path.starts_with(API_DOCS_PATH);
    };

    match api_path {
        "/health" => true,
        // The webhook is authenticated by the gateway, not by an API key.
        "/bootstrap" | "/payment/webhook" => *method == Method::POST,
        _ => false,
    }
}

/// Authentication middleware that validates API keys.
///
/// This middleware:
/// 1. Extracts the API key from the Authorization header
/// 2. Hashes it using SHA-256
/// 3. Verifies the hash against the database
/// 4. Resolves the key's role into an [`booking_types::Actor`] request extension
///
/// Returns 401 when the key is missing, unknown, deactivated, or bound to an
/// unusable role.
pub async fn auth_middleware<R: BookingRepository, G: PaymentGateway>(
    State(state): State<Arc<AppState<R, G>>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if is_public(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok());

    let api_key = match extract_api_key(auth_header) {
        Some(key) if !key.is_empty() => key,
        _ => {
            return unauthorized_response("Missing or invalid Authorization header");
        }
    };

    let key_hash = booking_repo::security::hash_api_key(api_key);

    match state.service.repo().verify_api_key_hash(&key_hash).await {
        Ok(Some(api_key)) => match api_key.actor() {
            Ok(actor) => {
                request.extensions_mut().insert(actor);
                next.run(request).await
            }
            Err(e) => {
                tracing::warn!(key_id = %api_key.id, error = %e, "API key has no usable role");
                unauthorized_response("Invalid API key")
            }
        },
        Ok(None) => unauthorized_response("Invalid API key"),
        Err(e) => {
            tracing::error!("API key verification failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "Internal server error",
                    "code": 500
                })),
            )
                .into_response()
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": message,
            "code": 401
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_api_key_bearer() {
        assert_eq!(
            extract_api_key(Some("Bearer sk_test_123")),
            Some("sk_test_123")
        );
    }

    #[test]
    fn test_extract_api_key_raw() {
        assert_eq!(extract_api_key(Some("sk_test_123")), Some("sk_test_123"));
    }

    #[test]
    fn test_extract_api_key_none() {
        assert_eq!(extract_api_key(None), None);
    }

    #[test]
    fn test_public_routes() {
        assert!(is_public(&Method::GET, "/api/v1/health"));
        assert!(is_public(&Method::POST, "/api/v1/payment/webhook"));
        assert!(is_public(&Method::POST, "/api/v1/bootstrap"));
        assert!(is_public(&Method::GET, "/swagger-ui/index.html"));
        assert!(is_public(&Method::GET, "/api-docs/openapi.json"));
    }

    #[test]
    fn test_protected_routes() {
        assert!(!is_public(&Method::GET, "/api/v1/booking"));
        assert!(!is_public(&Method::GET, "/api/v1/bootstrap"));
        assert!(!is_public(&Method::GET, "/api/v1/payment/webhook"));
        assert!(!is_public(&Method::POST, "/api/v1/keys"));
    }
}

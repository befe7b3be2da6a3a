//! Stripe Checkout adapter.

use std::time::Duration;

use async_trait::async_trait;
use booking_types::{CheckoutSession, CheckoutSessionRequest, GatewayError, PaymentGateway};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{info, instrument, warn};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Creates hosted checkout sessions through `POST /v1/checkout/sessions`.
pub struct StripeGateway {
    http: Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    /// Builds a client whose requests give up after `timeout`.
    pub fn new(
        secret_key: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn sessions_url(&self) -> String {
        format!("{}/v1/checkout/sessions", self.api_base)
    }
}

/// Encodes the session request in Stripe's bracketed form notation.
pub fn form_params(req: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let mut params = vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        (
            "line_items[0][price_data][currency]".to_string(),
            req.amount.currency().gateway_code().to_string(),
        ),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            req.amount.amount().to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            req.description.clone(),
        ),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        ("success_url".to_string(), req.success_url.clone()),
        ("cancel_url".to_string(), req.cancel_url.clone()),
    ];

    for (key, value) in req.metadata.to_pairs() {
        params.push((format!("metadata[{}]", key), value));
    }

    if let Some(email) = &req.customer_email {
        params.push(("customer_email".to_string(), email.clone()));
    }

    params
}

fn classify(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| format!("HTTP {}", status));

    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        GatewayError::Rejected(message)
    } else {
        GatewayError::Unavailable(message)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, req), fields(idempotency_key = %req.idempotency_key))]
    async fn create_checkout_session(
        &self,
        req: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let response = self
            .http
            .post(self.sessions_url())
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &req.idempotency_key)
            .form(&form_params(req))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout
            } else {
                GatewayError::Unavailable(e.to_string())
            }
        })?;

        if !status.is_success() {
            let err = classify(status, &body);
            warn!(%status, error = %err, "Checkout session creation failed");
            return Err(err);
        }

        let session: SessionResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Unavailable(format!("Malformed gateway response: {}", e)))?;
        let url = session
            .url
            .ok_or_else(|| GatewayError::Rejected("Checkout session has no URL".to_string()))?;

        info!(session_id = %session.id, "Checkout session created");

        Ok(CheckoutSession {
            session_id: session.id,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Form;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use booking_types::{BookingId, CheckoutMetadata, Currency, Money, PaymentId};
    use std::collections::HashMap;

    fn request(amount: i64) -> CheckoutSessionRequest {
        CheckoutSessionRequest {
            amount: Money::new(amount, Currency::BDT).unwrap(),
            description: "Guide Booking: G1".to_string(),
            customer_email: Some("t1@example.com".to_string()),
            metadata: CheckoutMetadata {
                booking_id: BookingId::new(),
                payment_id: PaymentId::new(),
            },
            success_url: "http://localhost:3000/payment/success".to_string(),
            cancel_url: "http://localhost:3000/dashboard/my-bookings".to_string(),
            idempotency_key: "txn-1".to_string(),
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_form_params() {
        let req = request(500);
        let params: HashMap<_, _> = form_params(&req).into_iter().collect();

        assert_eq!(params["mode"], "payment");
        assert_eq!(params["line_items[0][price_data][currency]"], "bdt");
        assert_eq!(params["line_items[0][price_data][unit_amount]"], "500");
        assert_eq!(
            params["line_items[0][price_data][product_data][name]"],
            "Guide Booking: G1"
        );
        assert_eq!(
            params["metadata[bookingId]"],
            req.metadata.booking_id.to_string()
        );
        assert_eq!(
            params["metadata[paymentId]"],
            req.metadata.payment_id.to_string()
        );
        assert_eq!(params["customer_email"], "t1@example.com");
    }

    #[test]
    fn test_classify_errors() {
        let body = r#"{"error":{"message":"Invalid currency: xyz"}}"#;
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, body),
            GatewayError::Rejected(m) if m == "Invalid currency: xyz"
        ));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, ""),
            GatewayError::Unavailable(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, "<html>"),
            GatewayError::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_creates_session() {
        let router = Router::new().route(
            "/v1/checkout/sessions",
            post(
                |headers: HeaderMap, Form(form): Form<HashMap<String, String>>| async move {
                    assert_eq!(headers["idempotency-key"], "txn-1");
                    assert_eq!(headers["authorization"], "Bearer sk_test_123");
                    assert_eq!(form["line_items[0][quantity]"], "1");
                    Json(serde_json::json!({
                        "id": "cs_test_abc",
                        "url": "https://checkout.stripe.com/c/pay/cs_test_abc"
                    }))
                },
            ),
        );
        let base = serve(router).await;

        let gateway = StripeGateway::new("sk_test_123", base, Duration::from_secs(5)).unwrap();
        let session = gateway.create_checkout_session(&request(500)).await.unwrap();

        assert_eq!(session.session_id, "cs_test_abc");
        assert!(session.url.ends_with("cs_test_abc"));
    }

    #[tokio::test]
    async fn test_rejected_request() {
        let router = Router::new().route(
            "/v1/checkout/sessions",
            post(|| async {
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": { "message": "Amount too small" } })),
                )
            }),
        );
        let base = serve(router).await;

        let gateway = StripeGateway::new("sk_test_123", base, Duration::from_secs(5)).unwrap();
        let err = gateway
            .create_checkout_session(&request(1))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Rejected(m) if m == "Amount too small"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let router = Router::new().route(
            "/v1/checkout/sessions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(serde_json::json!({ "id": "late", "url": "late" }))
            }),
        );
        let base = serve(router).await;

        let gateway = StripeGateway::new("sk_test_123", base, Duration::from_millis(100)).unwrap();
        let err = gateway
            .create_checkout_session(&request(500))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Timeout));
    }
}

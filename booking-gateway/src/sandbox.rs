//! In-memory gateway for local development and tests.

use async_trait::async_trait;
use booking_types::{
    CheckoutSession, CheckoutSessionRequest, GatewayError, GatewayEvent, PaymentGateway,
};
use dashmap::DashMap;
use tracing::info;

#[derive(Debug, Clone)]
struct SandboxSession {
    session: CheckoutSession,
    request: CheckoutSessionRequest,
}

/// Issues checkout sessions without contacting a real provider.
///
/// Sessions are keyed by idempotency key, so a retried creation returns the
/// session created first.
pub struct SandboxGateway {
    checkout_base: String,
    sessions: DashMap<String, SandboxSession>,
}

impl SandboxGateway {
    pub fn new(checkout_base: impl Into<String>) -> Self {
        Self {
            checkout_base: checkout_base.into().trim_end_matches('/').to_string(),
            sessions: DashMap::new(),
        }
    }

    /// Number of distinct sessions issued.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Looks up the session issued for an idempotency key.
    pub fn session_for(&self, idempotency_key: &str) -> Option<CheckoutSession> {
        self.sessions
            .get(idempotency_key)
            .map(|entry| entry.session.clone())
    }

    /// Builds the `checkout.session.completed` event the provider would send
    /// once the customer finished paying.
    pub fn completion_event(
        &self,
        session_id: &str,
        event_id: &str,
        payment_status: &str,
    ) -> Option<GatewayEvent> {
        let entry = self
            .sessions
            .iter()
            .find(|entry| entry.session.session_id == session_id)?;

        let metadata: serde_json::Map<String, serde_json::Value> = entry
            .request
            .metadata
            .to_pairs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
            .collect();

        let event = serde_json::json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": entry.session.session_id,
                    "object": "checkout.session",
                    "amount_total": entry.request.amount.amount(),
                    "currency": entry.request.amount.currency().gateway_code(),
                    "payment_status": payment_status,
                    "metadata": metadata,
                }
            }
        });

        serde_json::from_value(event).ok()
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_checkout_session(
        &self,
        req: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        if !req.amount.is_chargeable() {
            return Err(GatewayError::Rejected(format!(
                "Amount must be positive, got {}",
                req.amount
            )));
        }

        let entry = self
            .sessions
            .entry(req.idempotency_key.clone())
            .or_insert_with(|| {
                let session_id = format!("cs_test_{}", uuid::Uuid::new_v4().simple());
                SandboxSession {
                    session: CheckoutSession {
                        url: format!("{}/pay/{}", self.checkout_base, session_id),
                        session_id,
                    },
                    request: req.clone(),
                }
            });

        info!(session_id = %entry.session.session_id, "Sandbox checkout session issued");
        Ok(entry.session.clone())
    }
}

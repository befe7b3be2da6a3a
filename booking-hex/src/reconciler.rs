//! Webhook reconciliation.
//!
//! Applies payment gateway events to bookings and payments. Every event id
//! that reaches a decision is written to the idempotency ledger, so
//! redeliveries and concurrent deliveries resolve to
//! [`WebhookOutcome::AlreadyProcessed`] instead of being applied twice.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use booking_types::{
    AppError, BookingRepository, CheckoutCompletion, CheckoutSessionObject,
    GatewayEvent, GatewayEventKind, LedgerEntry, LedgerWrite, RepoError, WebhookOutcome,
};

pub struct WebhookReconciler<R: BookingRepository> {
    repo: Arc<R>,
}

impl<R: BookingRepository> WebhookReconciler<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Handles one delivery.
    ///
    /// Data-shape problems and unknown bookings are successful outcomes; only
    /// storage failures are errors.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle(&self, event: &GatewayEvent) -> Result<WebhookOutcome, AppError> {
        if self.repo.find_ledger_entry(&event.id).await?.is_some() {
            info!("Event already processed");
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let outcome = match event.kind() {
            GatewayEventKind::CheckoutSessionCompleted => self.complete_checkout(event).await?,
            GatewayEventKind::CheckoutSessionExpired => {
                info!("Checkout session expired");
                self.record(event, WebhookOutcome::Acknowledged).await?
            }
            GatewayEventKind::PaymentIntentFailed => {
                warn!("Payment failed");
                self.record(event, WebhookOutcome::Acknowledged).await?
            }
            GatewayEventKind::Other => {
                debug!("Unhandled event type");
                self.record(event, WebhookOutcome::Ignored).await?
            }
        };

        Ok(outcome)
    }

    async fn complete_checkout(&self, event: &GatewayEvent) -> Result<WebhookOutcome, RepoError> {
        let session = CheckoutSessionObject::from_event(event);

        let Some(metadata) = session.metadata_ids() else {
            warn!(session_id = ?session.id, "Checkout session carries no booking metadata");
            return self.record(event, WebhookOutcome::MissingMetadata).await;
        };

        let completion = CheckoutCompletion {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            metadata,
            status: session.resolved_status(),
            payload: event.data.object.clone(),
        };

        let outcome = self.repo.apply_checkout_completion(&completion).await?;
        match outcome {
            WebhookOutcome::Applied { booking_id, status } => {
                info!(%booking_id, %status, "Payment status applied");
            }
            WebhookOutcome::BookingNotFound | WebhookOutcome::PaymentNotFound => {
                warn!(
                    booking_id = %metadata.booking_id,
                    payment_id = %metadata.payment_id,
                    outcome = outcome.code(),
                    "Completion for unknown booking recorded as orphan"
                );
            }
            WebhookOutcome::AlreadySettled => {
                warn!(booking_id = %metadata.booking_id, status = %completion.status, "Stale completion ignored, payment already settled");
            }
            _ => info!(outcome = outcome.code(), "Completion not applied"),
        }

        Ok(outcome)
    }

    async fn record(
        &self,
        event: &GatewayEvent,
        outcome: WebhookOutcome,
    ) -> Result<WebhookOutcome, RepoError> {
        let entry = LedgerEntry::new(event, outcome, None);
        match self.repo.record_ledger_entry(&entry).await? {
            LedgerWrite::Inserted => Ok(outcome),
            LedgerWrite::AlreadyExists => Ok(WebhookOutcome::AlreadyProcessed),
        }
    }
}

//! Booking Application Service
//!
//! Orchestrates checkout, reads and administrative changes through the
//! repository and payment gateway ports.
//! Contains NO infrastructure logic - pure business orchestration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use booking_types::{
    Actor, ApiKey, ApiKeyId, AppError, Booking, BookingDetails, BookingId, BookingListParams,
    BookingQuery, BookingRepository, BookingScope, CheckoutMetadata, CheckoutResponse,
    CheckoutSessionRequest, CreateBookingRequest, GatewayError, GuideId, ListingId, NewBooking,
    Page, PaymentGateway, Role, UpdateBookingStatusRequest, domain::parse_booking_date,
};

/// Where the gateway sends the customer after checkout, and how long to wait for it.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub success_url: String,
    pub cancel_url: String,
    pub gateway_timeout: Duration,
}

impl CheckoutConfig {
    pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

    /// Derives the redirect URLs from the frontend origin.
    pub fn for_frontend(frontend_url: &str, gateway_timeout: Duration) -> Self {
        let base = frontend_url.trim_end_matches('/');
        Self {
            success_url: format!("{}/payment/success", base),
            cancel_url: format!("{}/dashboard/my-bookings", base),
            gateway_timeout,
        }
    }
}

/// Application service for bookings.
///
/// Generic over `R: BookingRepository` and `G: PaymentGateway` - the adapters
/// are injected at compile time.
pub struct BookingService<R: BookingRepository, G: PaymentGateway> {
    repo: Arc<R>,
    gateway: Arc<G>,
    checkout: CheckoutConfig,
}

impl<R: BookingRepository, G: PaymentGateway> BookingService<R, G> {
    pub fn new(repo: Arc<R>, gateway: Arc<G>, checkout: CheckoutConfig) -> Self {
        Self {
            repo,
            gateway,
            checkout,
        }
    }

    /// Returns a reference to the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Checkout
    // ─────────────────────────────────────────────────────────────────────────────

    /// Creates a booking and returns the URL of its hosted checkout page.
    ///
    /// The checkout session is requested before anything is written. Rows are
    /// inserted in one transaction only once the gateway has answered, so a
    /// gateway failure or timeout leaves no trace in the store.
    #[instrument(skip(self, req), fields(guide_id = %req.guide_id))]
    pub async fn create_booking(
        &self,
        actor: Actor,
        req: CreateBookingRequest,
    ) -> Result<CheckoutResponse, AppError> {
        let Actor::Tourist(tourist_id) = actor else {
            return Err(AppError::Forbidden("Only tourists can create bookings".into()));
        };

        let guide_id: GuideId = req
            .guide_id
            .parse()
            .map_err(|_| AppError::BadRequest("Invalid guide ID".into()))?;
        let listing_id: Option<ListingId> = req
            .listing_id
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|_| AppError::BadRequest("Invalid listing ID".into()))?;
        let booking_date = parse_booking_date(&req.booking_date)?;

        let tourist = self
            .repo
            .get_tourist(tourist_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Tourist not found".into()))?;
        let guide = self
            .repo
            .get_guide(guide_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Guide not found".into()))?;
        let listing = match listing_id {
            Some(id) => Some(
                self.repo
                    .get_listing(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Listing not found".into()))?,
            ),
            None => None,
        };

        let draft = NewBooking::prepare(&tourist, &guide, listing.as_ref(), booking_date)?;

        let session_request = CheckoutSessionRequest {
            amount: draft.amount,
            description: draft.description.clone(),
            customer_email: Some(tourist.email.clone()),
            metadata: CheckoutMetadata {
                booking_id: draft.booking_id,
                payment_id: draft.payment_id,
            },
            success_url: self.checkout.success_url.clone(),
            cancel_url: self.checkout.cancel_url.clone(),
            idempotency_key: draft.transaction_id.clone(),
        };

        let session = tokio::time::timeout(
            self.checkout.gateway_timeout,
            self.gateway.create_checkout_session(&session_request),
        )
        .await
        .map_err(|_| {
            warn!(timeout = ?self.checkout.gateway_timeout, "Checkout session request timed out");
            GatewayError::Timeout
        })??;

        let draft = draft.with_checkout_session(session.session_id.clone());
        let (booking, payment) = self.repo.create_booking(&draft).await.map_err(|e| {
            warn!(
                session_id = %session.session_id,
                booking_id = %draft.booking_id,
                error = %e,
                "Booking not persisted; checkout session is orphaned and will expire"
            );
            e
        })?;

        info!(
            booking_id = %booking.id,
            payment_id = %payment.id,
            amount = %payment.amount,
            "Booking created, awaiting payment"
        );

        Ok(CheckoutResponse {
            payment_url: session.url,
            booking_id: booking.id,
            payment_id: payment.id,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────────

    /// Gets a booking the caller is allowed to see.
    ///
    /// Bookings outside the caller's scope read as absent.
    pub async fn get_booking(&self, actor: Actor, id: BookingId) -> Result<BookingDetails, AppError> {
        self.repo
            .get_booking(id)
            .await?
            .filter(|details| BookingScope::for_actor(actor).includes(&details.booking))
            .ok_or_else(|| AppError::NotFound(format!("Booking {}", id)))
    }

    /// Lists the caller's bookings, newest first.
    pub async fn list_bookings(
        &self,
        actor: Actor,
        params: &BookingListParams,
    ) -> Result<Page<BookingDetails>, AppError> {
        let query = BookingQuery::new(BookingScope::for_actor(actor), params);
        self.repo.list_bookings(&query).await.map_err(Into::into)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Administrative changes
    // ─────────────────────────────────────────────────────────────────────────────

    /// Changes a booking's status and/or payment status.
    ///
    /// Admins may update any booking, guides only their own.
    #[instrument(skip(self, update))]
    pub async fn update_status(
        &self,
        actor: Actor,
        id: BookingId,
        update: UpdateBookingStatusRequest,
    ) -> Result<Booking, AppError> {
        if update.is_empty() {
            return Err(AppError::BadRequest(
                "At least one of status or paymentStatus is required".into(),
            ));
        }

        match actor {
            Actor::SuperAdmin | Actor::Admin => {}
            Actor::Guide(_) => {
                // Answers 404 for bookings of other guides.
                self.get_booking(actor, id).await?;
            }
            Actor::Tourist(_) => {
                return Err(AppError::Forbidden(
                    "Tourists cannot change booking status".into(),
                ));
            }
        }

        let booking = self
            .repo
            .update_booking_status(id, &update)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Booking {}", id)))?;

        info!(status = %booking.status, payment_status = %booking.payment_status, "Booking status updated");
        Ok(booking)
    }

    /// Hides a booking from every read path.
    #[instrument(skip(self))]
    pub async fn soft_delete(&self, actor: Actor, id: BookingId) -> Result<Booking, AppError> {
        require_admin(actor)?;
        self.repo
            .soft_delete_booking(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Booking {}", id)))
    }

    /// Removes a booking and its payment.
    #[instrument(skip(self))]
    pub async fn delete(&self, actor: Actor, id: BookingId) -> Result<(), AppError> {
        require_admin(actor)?;
        if self.repo.delete_booking(id).await? {
            info!("Booking deleted");
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Booking {}", id)))
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // API Keys
    // ─────────────────────────────────────────────────────────────────────────────

    /// Issues the first SUPER_ADMIN key. Refused once any key exists.
    pub async fn bootstrap(&self, name: &str) -> Result<(ApiKey, String), AppError> {
        if self.repo.count_api_keys().await? > 0 {
            return Err(AppError::BadRequest(
                "Bootstrap not allowed: API keys already exist. Use an existing key to create new ones.".into(),
            ));
        }
        self.repo
            .create_api_key(name, Role::SuperAdmin, None)
            .await
            .map_err(Into::into)
    }

    /// Issues a key that authenticates as `role`, bound to `principal_id` for
    /// guide and tourist keys.
    #[instrument(skip(self))]
    pub async fn create_api_key(
        &self,
        actor: Actor,
        name: &str,
        role: Role,
        principal_id: Option<uuid::Uuid>,
    ) -> Result<(ApiKey, String), AppError> {
        require_admin(actor)?;
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("API key name cannot be empty".into()));
        }
        if role == Role::SuperAdmin && actor != Actor::SuperAdmin {
            return Err(AppError::Forbidden(
                "Only a super admin can issue super admin keys".into(),
            ));
        }

        match Actor::resolve(role, principal_id)? {
            Actor::Guide(id) => {
                self.repo
                    .get_guide(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Guide not found".into()))?;
            }
            Actor::Tourist(id) => {
                self.repo
                    .get_tourist(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Tourist not found".into()))?;
            }
            Actor::SuperAdmin | Actor::Admin => {}
        }

        let principal_id = match role {
            Role::Guide | Role::Tourist => principal_id,
            Role::SuperAdmin | Role::Admin => None,
        };

        self.repo
            .create_api_key(name, role, principal_id)
            .await
            .map_err(Into::into)
    }

    pub async fn list_api_keys(&self, actor: Actor) -> Result<Vec<ApiKey>, AppError> {
        require_admin(actor)?;
        self.repo.list_api_keys().await.map_err(Into::into)
    }

    pub async fn delete_api_key(&self, actor: Actor, id: ApiKeyId) -> Result<(), AppError> {
        require_admin(actor)?;
        if self.repo.delete_api_key(id).await? {
            Ok(())
        } else {
            Err(AppError::NotFound("API key not found".into()))
        }
    }
}

fn require_admin(actor: Actor) -> Result<(), AppError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{} keys cannot perform this operation",
            actor.role()
        )))
    }
}

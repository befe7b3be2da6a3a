//! Repository port trait.
//!
//! This is the primary port in our hexagonal architecture.
//! Adapters (Postgres, SQLite, in-memory mocks) implement this trait.

use crate::domain::{
    ApiKey, ApiKeyId, Booking, BookingDetails, BookingId, CheckoutMetadata, Guide, GuideId,
    LedgerEntry, Listing, ListingId, NewBooking, Payment, PaymentStatus, Role, Tourist, TouristId,
    WebhookOutcome,
};
use crate::dto::{BookingQuery, Page, UpdateBookingStatusRequest};
use crate::error::RepoError;

/// A `checkout.session.completed` event ready to be applied.
#[derive(Debug, Clone)]
pub struct CheckoutCompletion {
    pub event_id: String,
    pub event_type: String,
    pub metadata: CheckoutMetadata,
    pub status: PaymentStatus,
    /// Raw session object, stored as the payment's gateway snapshot
    pub payload: serde_json::Value,
}

/// Result of inserting into the idempotency ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerWrite {
    Inserted,
    /// Another delivery of the same event got there first.
    AlreadyExists,
}

/// The main repository port for booking and payment operations.
///
/// Every operation that touches more than one row MUST be atomic.
#[async_trait::async_trait]
pub trait BookingRepository: Send + Sync + 'static {
    // ─────────────────────────────────────────────────────────────────────────────
    // Catalog (written by the catalog owner, read at booking time)
    // ─────────────────────────────────────────────────────────────────────────────

    /// Inserts or replaces a tourist.
    async fn save_tourist(&self, tourist: &Tourist) -> Result<(), RepoError>;

    /// Inserts or replaces a guide.
    async fn save_guide(&self, guide: &Guide) -> Result<(), RepoError>;

    /// Inserts or replaces a listing.
    async fn save_listing(&self, listing: &Listing) -> Result<(), RepoError>;

    /// Gets an active (not soft-deleted) tourist.
    async fn get_tourist(&self, id: TouristId) -> Result<Option<Tourist>, RepoError>;

    /// Gets an active guide.
    async fn get_guide(&self, id: GuideId) -> Result<Option<Guide>, RepoError>;

    /// Gets an active listing.
    async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Bookings (MUST be atomic)
    // ─────────────────────────────────────────────────────────────────────────────

    /// Persists a booking and its payment in one transaction.
    async fn create_booking(&self, draft: &NewBooking) -> Result<(Booking, Payment), RepoError>;

    /// Gets a booking projection; soft-deleted bookings are not returned.
    async fn get_booking(&self, id: BookingId) -> Result<Option<BookingDetails>, RepoError>;

    /// Gets the payment of a booking, regardless of soft deletion.
    async fn get_payment_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<Payment>, RepoError>;

    /// Lists non-deleted bookings visible in the query's scope, newest first.
    async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<BookingDetails>, RepoError>;

    /// Applies an administrative status change.
    ///
    /// A supplied `payment_status` is mirrored onto the payment row. Returns
    /// `RepoError::Domain(PaymentStatusRegression)` when it would move a PAID
    /// booking backwards, `Ok(None)` when the booking is absent or soft-deleted.
    async fn update_booking_status(
        &self,
        id: BookingId,
        update: &UpdateBookingStatusRequest,
    ) -> Result<Option<Booking>, RepoError>;

    /// Marks a booking deleted. `Ok(None)` if absent or already deleted.
    async fn soft_delete_booking(&self, id: BookingId) -> Result<Option<Booking>, RepoError>;

    /// Physically removes a booking and its payment. Returns false if absent.
    async fn delete_booking(&self, id: BookingId) -> Result<bool, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Idempotency ledger
    // ─────────────────────────────────────────────────────────────────────────────

    /// Looks up a processed gateway event.
    async fn find_ledger_entry(&self, event_id: &str) -> Result<Option<LedgerEntry>, RepoError>;

    /// Records an event that causes no booking/payment change.
    async fn record_ledger_entry(&self, entry: &LedgerEntry) -> Result<LedgerWrite, RepoError>;

    /// Records the event and applies a checkout completion in one transaction.
    ///
    /// Returns `WebhookOutcome::AlreadyProcessed` when the ledger or the
    /// payment's `stripe_event_id` already holds this event id.
    async fn apply_checkout_completion(
        &self,
        completion: &CheckoutCompletion,
    ) -> Result<WebhookOutcome, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // API keys
    // ─────────────────────────────────────────────────────────────────────────────

    /// Looks up an active key by hash and stamps `last_used_at`.
    async fn verify_api_key_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, RepoError>;

    /// Creates a key and returns it with the raw secret (shown once).
    async fn create_api_key(
        &self,
        name: &str,
        role: Role,
        principal_id: Option<uuid::Uuid>,
    ) -> Result<(ApiKey, String), RepoError>;

    async fn count_api_keys(&self) -> Result<i64, RepoError>;

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, RepoError>;

    /// Deactivates a key. Returns false if it did not exist.
    async fn delete_api_key(&self, id: ApiKeyId) -> Result<bool, RepoError>;
}

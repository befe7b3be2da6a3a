//! BookingService and WebhookReconciler unit tests.

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    use booking_types::{
        Actor, ApiKey, ApiKeyId, AppError, Booking, BookingDetails, BookingId, BookingListParams,
        BookingQuery, BookingRepository, BookingScope, BookingSortField, BookingStatus,
        CheckoutCompletion,
        CheckoutSession, CheckoutSessionRequest, CreateBookingRequest, Currency, GatewayError,
        GatewayEvent, Guide, GuideId, GuideSummary, LedgerEntry, LedgerWrite, Listing, ListingId,
        ListingSummary, Money, NewBooking, Page, PageMeta, Payment, PaymentGateway, PaymentStatus,
        PaymentSummary, RepoError, Role, SortOrder, Tourist, TouristId, TouristSummary,
        UpdateBookingStatusRequest, WebhookOutcome,
    };

    use crate::{BookingService, CheckoutConfig, WebhookReconciler};

    // ─────────────────────────────────────────────────────────────────────────
    // In-memory adapters
    // ─────────────────────────────────────────────────────────────────────────

    /// Simple in-memory repository for testing the service layer.
    #[derive(Default)]
    pub struct MockRepo {
        tourists: Mutex<HashMap<TouristId, Tourist>>,
        guides: Mutex<HashMap<GuideId, Guide>>,
        listings: Mutex<HashMap<ListingId, Listing>>,
        bookings: Mutex<HashMap<BookingId, Booking>>,
        payments: Mutex<HashMap<BookingId, Payment>>,
        ledger: Mutex<HashMap<String, LedgerEntry>>,
        api_keys: Mutex<Vec<ApiKey>>,
    }

    impl MockRepo {
        fn booking_count(&self) -> usize {
            self.bookings.lock().unwrap().len()
        }

        fn payment_count(&self) -> usize {
            self.payments.lock().unwrap().len()
        }

        fn payment(&self, booking_id: BookingId) -> Option<Payment> {
            self.payments.lock().unwrap().get(&booking_id).cloned()
        }

        fn details(&self, booking: Booking) -> BookingDetails {
            let tourists = self.tourists.lock().unwrap();
            let guides = self.guides.lock().unwrap();
            let listings = self.listings.lock().unwrap();
            let payments = self.payments.lock().unwrap();

            let tourist = &tourists[&booking.tourist_id];
            let guide = &guides[&booking.guide_id];
            BookingDetails {
                tourist: TouristSummary {
                    id: tourist.id,
                    name: tourist.name.clone(),
                },
                guide: GuideSummary {
                    id: guide.id,
                    name: guide.name.clone(),
                },
                listing: booking
                    .listing_id
                    .and_then(|id| listings.get(&id))
                    .map(|l| ListingSummary {
                        id: l.id,
                        title: l.title.clone(),
                        price: l.price,
                    }),
                payment: payments.get(&booking.id).map(|p| PaymentSummary {
                    id: p.id,
                    amount: p.amount,
                    status: p.status,
                }),
                booking,
            }
        }
    }

    #[async_trait]
    impl BookingRepository for MockRepo {
        async fn save_tourist(&self, tourist: &Tourist) -> Result<(), RepoError> {
            self.tourists
                .lock()
                .unwrap()
                .insert(tourist.id, tourist.clone());
            Ok(())
        }

        async fn save_guide(&self, guide: &Guide) -> Result<(), RepoError> {
            self.guides.lock().unwrap().insert(guide.id, guide.clone());
            Ok(())
        }

        async fn save_listing(&self, listing: &Listing) -> Result<(), RepoError> {
            self.listings
                .lock()
                .unwrap()
                .insert(listing.id, listing.clone());
            Ok(())
        }

        async fn get_tourist(&self, id: TouristId) -> Result<Option<Tourist>, RepoError> {
            Ok(self
                .tourists
                .lock()
                .unwrap()
                .get(&id)
                .filter(|t| !t.is_deleted)
                .cloned())
        }

        async fn get_guide(&self, id: GuideId) -> Result<Option<Guide>, RepoError> {
            Ok(self
                .guides
                .lock()
                .unwrap()
                .get(&id)
                .filter(|g| !g.is_deleted)
                .cloned())
        }

        async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>, RepoError> {
            Ok(self
                .listings
                .lock()
                .unwrap()
                .get(&id)
                .filter(|l| !l.is_deleted)
                .cloned())
        }

        async fn create_booking(
            &self,
            draft: &NewBooking,
        ) -> Result<(Booking, Payment), RepoError> {
            let mut bookings = self.bookings.lock().unwrap();
            let mut payments = self.payments.lock().unwrap();
            if payments
                .values()
                .any(|p| p.transaction_id == draft.transaction_id)
            {
                return Err(RepoError::Conflict("duplicate transaction_id".into()));
            }

            let now = Utc::now();
            let booking = Booking {
                id: draft.booking_id,
                tourist_id: draft.tourist_id,
                guide_id: draft.guide_id,
                listing_id: draft.listing_id,
                booking_date: draft.booking_date,
                status: BookingStatus::Pending,
                payment_status: PaymentStatus::Pending,
                is_deleted: false,
                created_at: now,
                updated_at: now,
            };
            let payment = Payment {
                id: draft.payment_id,
                booking_id: draft.booking_id,
                amount: draft.amount,
                transaction_id: draft.transaction_id.clone(),
                status: PaymentStatus::Pending,
                stripe_event_id: None,
                checkout_session_id: draft.checkout_session_id.clone(),
                payment_gateway_data: None,
                created_at: now,
                updated_at: now,
            };
            bookings.insert(booking.id, booking.clone());
            payments.insert(booking.id, payment.clone());
            Ok((booking, payment))
        }

        async fn get_booking(&self, id: BookingId) -> Result<Option<BookingDetails>, RepoError> {
            let booking = self
                .bookings
                .lock()
                .unwrap()
                .get(&id)
                .filter(|b| !b.is_deleted)
                .cloned();
            Ok(booking.map(|b| self.details(b)))
        }

        async fn get_payment_for_booking(
            &self,
            booking_id: BookingId,
        ) -> Result<Option<Payment>, RepoError> {
            Ok(self.payment(booking_id))
        }

        async fn list_bookings(
            &self,
            query: &BookingQuery,
        ) -> Result<Page<BookingDetails>, RepoError> {
            let mut matching: Vec<Booking> = self
                .bookings
                .lock()
                .unwrap()
                .values()
                .filter(|b| !b.is_deleted && query.scope.includes(b))
                .filter(|b| query.status.is_none_or(|s| b.status == s))
                .filter(|b| query.payment_status.is_none_or(|s| b.payment_status == s))
                .cloned()
                .collect();
            matching.sort_by(|a, b| {
                let ordering = match query.sort_by {
                    BookingSortField::CreatedAt => a.created_at.cmp(&b.created_at),
                    BookingSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                    BookingSortField::BookingDate => a.booking_date.cmp(&b.booking_date),
                };
                match query.sort_order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });

            let total = matching.len() as i64;
            let data = matching
                .into_iter()
                .skip(query.offset() as usize)
                .take(query.limit as usize)
                .map(|b| self.details(b))
                .collect();

            Ok(Page {
                meta: PageMeta {
                    total,
                    page: query.page,
                    limit: query.limit,
                },
                data,
            })
        }

        async fn update_booking_status(
            &self,
            id: BookingId,
            update: &UpdateBookingStatusRequest,
        ) -> Result<Option<Booking>, RepoError> {
            let mut bookings = self.bookings.lock().unwrap();
            let mut payments = self.payments.lock().unwrap();
            let Some(booking) = bookings.get_mut(&id).filter(|b| !b.is_deleted) else {
                return Ok(None);
            };

            if let Some(next) = update.payment_status {
                booking.payment_status.ensure_transition(next)?;
                booking.payment_status = next;
                if let Some(payment) = payments.get_mut(&id) {
                    payment.status = next;
                }
            }
            if let Some(status) = update.status {
                booking.status = status;
            }
            booking.updated_at = Utc::now();
            Ok(Some(booking.clone()))
        }

        async fn soft_delete_booking(&self, id: BookingId) -> Result<Option<Booking>, RepoError> {
            let mut bookings = self.bookings.lock().unwrap();
            Ok(bookings
                .get_mut(&id)
                .filter(|b| !b.is_deleted)
                .map(|b| {
                    b.is_deleted = true;
                    b.clone()
                }))
        }

        async fn delete_booking(&self, id: BookingId) -> Result<bool, RepoError> {
            self.payments.lock().unwrap().remove(&id);
            Ok(self.bookings.lock().unwrap().remove(&id).is_some())
        }

        async fn find_ledger_entry(
            &self,
            event_id: &str,
        ) -> Result<Option<LedgerEntry>, RepoError> {
            Ok(self.ledger.lock().unwrap().get(event_id).cloned())
        }

        async fn record_ledger_entry(&self, entry: &LedgerEntry) -> Result<LedgerWrite, RepoError> {
            let mut ledger = self.ledger.lock().unwrap();
            if ledger.contains_key(&entry.event_id) {
                return Ok(LedgerWrite::AlreadyExists);
            }
            ledger.insert(entry.event_id.clone(), entry.clone());
            Ok(LedgerWrite::Inserted)
        }

        async fn apply_checkout_completion(
            &self,
            completion: &CheckoutCompletion,
        ) -> Result<WebhookOutcome, RepoError> {
            let mut ledger = self.ledger.lock().unwrap();
            if ledger.contains_key(&completion.event_id) {
                return Ok(WebhookOutcome::AlreadyProcessed);
            }

            let mut bookings = self.bookings.lock().unwrap();
            let mut payments = self.payments.lock().unwrap();
            let booking_id = completion.metadata.booking_id;

            let outcome = match (
                bookings.get_mut(&booking_id),
                payments
                    .get_mut(&booking_id)
                    .filter(|p| p.id == completion.metadata.payment_id),
            ) {
                (None, _) => WebhookOutcome::BookingNotFound,
                (Some(_), None) => WebhookOutcome::PaymentNotFound,
                (Some(booking), Some(_))
                    if !booking.payment_status.can_transition_to(completion.status) =>
                {
                    WebhookOutcome::AlreadySettled
                }
                (Some(booking), Some(payment)) => {
                    booking.payment_status = completion.status;
                    payment.status = completion.status;
                    payment.stripe_event_id = Some(completion.event_id.clone());
                    payment.payment_gateway_data = Some(completion.payload.clone());
                    WebhookOutcome::Applied {
                        booking_id,
                        status: completion.status,
                    }
                }
            };

            ledger.insert(
                completion.event_id.clone(),
                LedgerEntry {
                    event_id: completion.event_id.clone(),
                    event_type: completion.event_type.clone(),
                    outcome: outcome.code().to_string(),
                    booking_id: Some(booking_id),
                    received_at: Utc::now(),
                },
            );
            Ok(outcome)
        }

        async fn verify_api_key_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, RepoError> {
            Ok(self
                .api_keys
                .lock()
                .unwrap()
                .iter()
                .find(|k| k.is_active && k.key_hash == key_hash)
                .cloned())
        }

        async fn create_api_key(
            &self,
            name: &str,
            role: Role,
            principal_id: Option<uuid::Uuid>,
        ) -> Result<(ApiKey, String), RepoError> {
            let raw_key = booking_repo::security::generate_api_key();
            let key = ApiKey::new(
                name.to_string(),
                booking_repo::security::hash_api_key(&raw_key),
                role,
                principal_id,
            );
            self.api_keys.lock().unwrap().push(key.clone());
            Ok((key, raw_key))
        }

        async fn count_api_keys(&self) -> Result<i64, RepoError> {
            Ok(self
                .api_keys
                .lock()
                .unwrap()
                .iter()
                .filter(|k| k.is_active)
                .count() as i64)
        }

        async fn list_api_keys(&self) -> Result<Vec<ApiKey>, RepoError> {
            Ok(self.api_keys.lock().unwrap().clone())
        }

        async fn delete_api_key(&self, id: ApiKeyId) -> Result<bool, RepoError> {
            let mut keys = self.api_keys.lock().unwrap();
            match keys.iter_mut().find(|k| k.id == id && k.is_active) {
                Some(key) => {
                    key.is_active = false;
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    enum GatewayBehavior {
        Succeed,
        Fail,
        Stall(Duration),
    }

    /// Gateway double that records every request it receives.
    pub struct MockGateway {
        behavior: GatewayBehavior,
        requests: Mutex<Vec<CheckoutSessionRequest>>,
    }

    impl MockGateway {
        fn new(behavior: GatewayBehavior) -> Self {
            Self {
                behavior,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last_request(&self) -> Option<CheckoutSessionRequest> {
            self.requests.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_checkout_session(
            &self,
            req: &CheckoutSessionRequest,
        ) -> Result<CheckoutSession, GatewayError> {
            self.requests.lock().unwrap().push(req.clone());
            match &self.behavior {
                GatewayBehavior::Succeed => Ok(CheckoutSession {
                    session_id: format!("cs_test_{}", req.idempotency_key),
                    url: format!("https://checkout.test/pay/{}", req.idempotency_key),
                }),
                GatewayBehavior::Fail => {
                    Err(GatewayError::Unavailable("connection refused".into()))
                }
                GatewayBehavior::Stall(delay) => {
                    tokio::time::sleep(*delay).await;
                    Err(GatewayError::Unavailable("stalled".into()))
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fixtures
    // ─────────────────────────────────────────────────────────────────────────

    struct Fixture {
        repo: Arc<MockRepo>,
        gateway: Arc<MockGateway>,
        service: BookingService<MockRepo, MockGateway>,
        reconciler: WebhookReconciler<MockRepo>,
        tourist: Tourist,
        guide: Guide,
        listing: Listing,
    }

    async fn fixture(behavior: GatewayBehavior) -> Fixture {
        let repo = Arc::new(MockRepo::default());
        let gateway = Arc::new(MockGateway::new(behavior));

        let tourist = Tourist::new("T1", "t1@example.com").unwrap();
        let guide = Guide::new("G1", Money::new(500, Currency::BDT).unwrap()).unwrap();
        let listing = Listing::new(
            guide.id,
            "Old Dhaka walk",
            Money::new(1200, Currency::BDT).unwrap(),
        )
        .unwrap();
        repo.save_tourist(&tourist).await.unwrap();
        repo.save_guide(&guide).await.unwrap();
        repo.save_listing(&listing).await.unwrap();

        let config = CheckoutConfig {
            gateway_timeout: Duration::from_millis(50),
            ..CheckoutConfig::for_frontend("http://localhost:3000/", Duration::from_secs(10))
        };

        Fixture {
            service: BookingService::new(repo.clone(), gateway.clone(), config),
            reconciler: WebhookReconciler::new(repo.clone()),
            repo,
            gateway,
            tourist,
            guide,
            listing,
        }
    }

    fn booking_request(guide_id: GuideId, listing_id: Option<ListingId>) -> CreateBookingRequest {
        CreateBookingRequest {
            guide_id: guide_id.to_string(),
            listing_id: listing_id.map(|id| id.to_string()),
            booking_date: "2025-06-01T10:00:00Z".to_string(),
        }
    }

    fn completion_event(
        event_id: &str,
        booking_id: BookingId,
        payment_id: booking_types::PaymentId,
        payment_status: &str,
    ) -> GatewayEvent {
        serde_json::from_value(json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "payment_status": payment_status,
                "metadata": {
                    "bookingId": booking_id.to_string(),
                    "paymentId": payment_id.to_string()
                }
            }}
        }))
        .unwrap()
    }

    fn event(event_id: &str, event_type: &str) -> GatewayEvent {
        serde_json::from_value(json!({
            "id": event_id,
            "type": event_type,
            "data": { "object": {} }
        }))
        .unwrap()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Checkout
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_checkout_config_urls() {
        let config = CheckoutConfig::for_frontend("https://app.example.com/", Duration::from_secs(3));
        assert_eq!(config.success_url, "https://app.example.com/payment/success");
        assert_eq!(config.cancel_url, "https://app.example.com/dashboard/my-bookings");
    }

    #[tokio::test]
    async fn test_create_booking_persists_after_checkout() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let actor = Actor::Tourist(fx.tourist.id);

        let checkout = fx
            .service
            .create_booking(actor, booking_request(fx.guide.id, None))
            .await
            .unwrap();

        let payment = fx.repo.payment(checkout.booking_id).unwrap();
        assert_eq!(payment.id, checkout.payment_id);
        assert_eq!(payment.amount, fx.guide.fee);
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(
            checkout.payment_url,
            format!("https://checkout.test/pay/{}", payment.transaction_id)
        );
        assert_eq!(
            payment.checkout_session_id.as_deref(),
            Some(format!("cs_test_{}", payment.transaction_id).as_str())
        );

        let sent = fx.gateway.last_request().unwrap();
        assert_eq!(sent.idempotency_key, payment.transaction_id);
        assert_eq!(sent.metadata.booking_id, checkout.booking_id);
        assert_eq!(sent.metadata.payment_id, checkout.payment_id);
        assert_eq!(sent.customer_email.as_deref(), Some("t1@example.com"));
        assert_eq!(sent.success_url, "http://localhost:3000/payment/success");
        assert_eq!(sent.description, "Guide Booking: G1");

        let details = fx.service.get_booking(actor, checkout.booking_id).await.unwrap();
        assert_eq!(details.booking.status, BookingStatus::Pending);
        assert_eq!(details.booking.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_listing_price_is_snapshotted() {
        let fx = fixture(GatewayBehavior::Succeed).await;

        let checkout = fx
            .service
            .create_booking(
                Actor::Tourist(fx.tourist.id),
                booking_request(fx.guide.id, Some(fx.listing.id)),
            )
            .await
            .unwrap();

        // Repricing the listing afterwards must not touch the payment.
        let mut repriced = fx.listing.clone();
        repriced.price = Money::new(9999, Currency::BDT).unwrap();
        fx.repo.save_listing(&repriced).await.unwrap();

        let payment = fx.repo.payment(checkout.booking_id).unwrap();
        assert_eq!(payment.amount.amount(), 1200);
        assert_eq!(
            fx.gateway.last_request().unwrap().description,
            "Tour Booking: Old Dhaka walk"
        );
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_no_rows() {
        let fx = fixture(GatewayBehavior::Fail).await;

        let err = fx
            .service
            .create_booking(
                Actor::Tourist(fx.tourist.id),
                booking_request(fx.guide.id, None),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Gateway(_)));
        assert_eq!(fx.gateway.calls(), 1);
        assert_eq!(fx.repo.booking_count(), 0);
        assert_eq!(fx.repo.payment_count(), 0);
    }

    #[tokio::test]
    async fn test_gateway_timeout_leaves_no_rows() {
        let fx = fixture(GatewayBehavior::Stall(Duration::from_secs(5))).await;

        let err = fx
            .service
            .create_booking(
                Actor::Tourist(fx.tourist.id),
                booking_request(fx.guide.id, None),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Gateway(msg) if msg.contains("timed out")));
        assert_eq!(fx.repo.booking_count(), 0);
        assert_eq!(fx.repo.payment_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_guide_is_not_found_and_skips_gateway() {
        let fx = fixture(GatewayBehavior::Succeed).await;

        let err = fx
            .service
            .create_booking(
                Actor::Tourist(fx.tourist.id),
                booking_request(GuideId::new(), None),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(msg) if msg == "Guide not found"));
        assert_eq!(fx.gateway.calls(), 0);
        assert_eq!(fx.repo.booking_count(), 0);
    }

    #[tokio::test]
    async fn test_deleted_guide_is_not_found() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let mut guide = fx.guide.clone();
        guide.is_deleted = true;
        fx.repo.save_guide(&guide).await.unwrap();

        let err = fx
            .service
            .create_booking(
                Actor::Tourist(fx.tourist.id),
                booking_request(fx.guide.id, None),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_tourist_is_not_found() {
        let fx = fixture(GatewayBehavior::Succeed).await;

        let err = fx
            .service
            .create_booking(
                Actor::Tourist(TouristId::new()),
                booking_request(fx.guide.id, None),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(msg) if msg == "Tourist not found"));
    }

    #[tokio::test]
    async fn test_listing_of_another_guide_is_rejected() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let other = Guide::new("G2", Money::new(700, Currency::BDT).unwrap()).unwrap();
        fx.repo.save_guide(&other).await.unwrap();

        let err = fx
            .service
            .create_booking(
                Actor::Tourist(fx.tourist.id),
                booking_request(other.id, Some(fx.listing.id)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(fx.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_input_is_bad_request() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let actor = Actor::Tourist(fx.tourist.id);

        let mut bad_date = booking_request(fx.guide.id, None);
        bad_date.booking_date = "next tuesday".into();
        assert!(matches!(
            fx.service.create_booking(actor, bad_date).await,
            Err(AppError::BadRequest(_))
        ));

        let mut bad_guide = booking_request(fx.guide.id, None);
        bad_guide.guide_id = "not-a-uuid".into();
        assert!(matches!(
            fx.service.create_booking(actor, bad_guide).await,
            Err(AppError::BadRequest(msg)) if msg == "Invalid guide ID"
        ));
        assert_eq!(fx.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_only_tourists_create_bookings() {
        let fx = fixture(GatewayBehavior::Succeed).await;

        for actor in [Actor::Admin, Actor::SuperAdmin, Actor::Guide(fx.guide.id)] {
            let err = fx
                .service
                .create_booking(actor, booking_request(fx.guide.id, None))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)));
        }
        assert_eq!(fx.gateway.calls(), 0);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads and administration
    // ─────────────────────────────────────────────────────────────────────────

    async fn book(fx: &Fixture) -> BookingId {
        fx.service
            .create_booking(
                Actor::Tourist(fx.tourist.id),
                booking_request(fx.guide.id, None),
            )
            .await
            .unwrap()
            .booking_id
    }

    #[tokio::test]
    async fn test_booking_hidden_outside_scope() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let id = book(&fx).await;

        let stranger = Actor::Tourist(TouristId::new());
        assert!(matches!(
            fx.service.get_booking(stranger, id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(fx.service.get_booking(Actor::Guide(fx.guide.id), id).await.is_ok());
        assert!(fx.service.get_booking(Actor::Admin, id).await.is_ok());

        let page = fx
            .service
            .list_bookings(stranger, &BookingListParams::default())
            .await
            .unwrap();
        assert_eq!(page.meta.total, 0);
    }

    #[tokio::test]
    async fn test_list_scoped_to_tourist() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        book(&fx).await;
        book(&fx).await;

        let other = Tourist::new("T2", "t2@example.com").unwrap();
        fx.repo.save_tourist(&other).await.unwrap();
        fx.service
            .create_booking(Actor::Tourist(other.id), booking_request(fx.guide.id, None))
            .await
            .unwrap();

        let mine = fx
            .service
            .list_bookings(Actor::Tourist(fx.tourist.id), &BookingListParams::default())
            .await
            .unwrap();
        assert_eq!(mine.meta.total, 2);
        assert!(mine.data.iter().all(|d| d.tourist.id == fx.tourist.id));

        let all = fx
            .service
            .list_bookings(Actor::Admin, &BookingListParams::default())
            .await
            .unwrap();
        assert_eq!(all.meta.total, 3);
        assert_eq!(
            BookingScope::for_actor(Actor::Guide(fx.guide.id)),
            BookingScope::Guide(fx.guide.id)
        );
    }

    #[tokio::test]
    async fn test_update_requires_a_field() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let id = book(&fx).await;

        let err = fx
            .service
            .update_status(Actor::Admin, id, UpdateBookingStatusRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_update_permissions() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let id = book(&fx).await;
        let confirm = UpdateBookingStatusRequest {
            status: Some(BookingStatus::Confirmed),
            payment_status: None,
        };

        assert!(matches!(
            fx.service
                .update_status(Actor::Tourist(fx.tourist.id), id, confirm.clone())
                .await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            fx.service
                .update_status(Actor::Guide(GuideId::new()), id, confirm.clone())
                .await,
            Err(AppError::NotFound(_))
        ));

        let updated = fx
            .service
            .update_status(Actor::Guide(fx.guide.id), id, confirm)
            .await
            .unwrap();
        assert_eq!(updated.status, BookingStatus::Confirmed);
        assert_eq!(updated.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_mirrors_payment_and_rejects_regression() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let id = book(&fx).await;

        let paid = UpdateBookingStatusRequest {
            status: None,
            payment_status: Some(PaymentStatus::Paid),
        };
        fx.service.update_status(Actor::Admin, id, paid).await.unwrap();
        assert_eq!(fx.repo.payment(id).unwrap().status, PaymentStatus::Paid);

        let regress = UpdateBookingStatusRequest {
            status: None,
            payment_status: Some(PaymentStatus::Unpaid),
        };
        let err = fx
            .service
            .update_status(Actor::Admin, id, regress)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(fx.repo.payment(id).unwrap().status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_soft_and_hard_delete_are_admin_only() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let first = book(&fx).await;
        let second = book(&fx).await;
        let guide = Actor::Guide(fx.guide.id);

        assert!(matches!(
            fx.service.soft_delete(guide, first).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            fx.service.delete(guide, first).await,
            Err(AppError::Forbidden(_))
        ));

        let hidden = fx.service.soft_delete(Actor::Admin, first).await.unwrap();
        assert!(hidden.is_deleted);
        assert!(matches!(
            fx.service.get_booking(Actor::Admin, first).await,
            Err(AppError::NotFound(_))
        ));

        fx.service.delete(Actor::SuperAdmin, second).await.unwrap();
        assert!(fx.repo.payment(second).is_none());
        assert!(matches!(
            fx.service.delete(Actor::SuperAdmin, second).await,
            Err(AppError::NotFound(_))
        ));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // API keys
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_bootstrap_only_once() {
        let fx = fixture(GatewayBehavior::Succeed).await;

        let (key, raw) = fx.service.bootstrap("root").await.unwrap();
        assert_eq!(key.role, Role::SuperAdmin);
        assert!(raw.starts_with("sk_"));

        assert!(matches!(
            fx.service.bootstrap("again").await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_create_api_key_rules() {
        let fx = fixture(GatewayBehavior::Succeed).await;

        assert!(matches!(
            fx.service
                .create_api_key(Actor::Admin, "t", Role::Tourist, None)
                .await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            fx.service
                .create_api_key(Actor::Admin, "root2", Role::SuperAdmin, None)
                .await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            fx.service
                .create_api_key(Actor::Guide(fx.guide.id), "g", Role::Guide, Some(*fx.guide.id.as_uuid()))
                .await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            fx.service
                .create_api_key(Actor::Admin, "ghost", Role::Guide, Some(uuid::Uuid::new_v4()))
                .await,
            Err(AppError::NotFound(_))
        ));

        let (key, _) = fx
            .service
            .create_api_key(
                Actor::Admin,
                "t1-app",
                Role::Tourist,
                Some(*fx.tourist.id.as_uuid()),
            )
            .await
            .unwrap();
        assert_eq!(key.actor().unwrap(), Actor::Tourist(fx.tourist.id));

        fx.service.delete_api_key(Actor::Admin, key.id).await.unwrap();
        assert!(matches!(
            fx.service.delete_api_key(Actor::Admin, key.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Webhook reconciliation
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_completion_applied_once() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let id = book(&fx).await;
        let payment_id = fx.repo.payment(id).unwrap().id;
        let event = completion_event("evt_1", id, payment_id, "paid");

        let first = fx.reconciler.handle(&event).await.unwrap();
        assert_eq!(
            first,
            WebhookOutcome::Applied {
                booking_id: id,
                status: PaymentStatus::Paid
            }
        );
        let payment = fx.repo.payment(id).unwrap();
        assert_eq!(payment.status, PaymentStatus::Paid);
        assert_eq!(payment.stripe_event_id.as_deref(), Some("evt_1"));

        let second = fx.reconciler.handle(&event).await.unwrap();
        assert_eq!(second, WebhookOutcome::AlreadyProcessed);
        assert_eq!(second.message(), "Event already processed");
    }

    #[tokio::test]
    async fn test_stale_unpaid_after_paid_is_ignored() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let id = book(&fx).await;
        let payment_id = fx.repo.payment(id).unwrap().id;

        fx.reconciler
            .handle(&completion_event("evt_paid", id, payment_id, "paid"))
            .await
            .unwrap();
        let late = fx
            .reconciler
            .handle(&completion_event("evt_late", id, payment_id, "unpaid"))
            .await
            .unwrap();

        assert_eq!(late, WebhookOutcome::AlreadySettled);
        assert_eq!(fx.repo.payment(id).unwrap().status, PaymentStatus::Paid);
        assert!(fx.repo.find_ledger_entry("evt_late").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_metadata_is_recorded() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let event = event("evt_nometa", "checkout.session.completed");

        let outcome = fx.reconciler.handle(&event).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::MissingMetadata);
        assert_eq!(outcome.message(), "Missing metadata");

        let entry = fx.repo.find_ledger_entry("evt_nometa").await.unwrap().unwrap();
        assert_eq!(entry.outcome, "MISSING_METADATA");
        assert_eq!(
            fx.reconciler.handle(&event).await.unwrap(),
            WebhookOutcome::AlreadyProcessed
        );
    }

    #[tokio::test]
    async fn test_orphan_completion_is_acknowledged() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let event = completion_event(
            "evt_orphan",
            BookingId::new(),
            booking_types::PaymentId::new(),
            "paid",
        );

        let outcome = fx.reconciler.handle(&event).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::BookingNotFound);
        assert_eq!(outcome.message(), "Booking not found");
        assert_eq!(
            fx.reconciler.handle(&event).await.unwrap(),
            WebhookOutcome::AlreadyProcessed
        );
    }

    #[tokio::test]
    async fn test_informational_events_do_not_mutate() {
        let fx = fixture(GatewayBehavior::Succeed).await;
        let id = book(&fx).await;

        for (event_id, event_type, expected) in [
            ("evt_exp", "checkout.session.expired", WebhookOutcome::Acknowledged),
            ("evt_fail", "payment_intent.payment_failed", WebhookOutcome::Acknowledged),
            ("evt_other", "customer.created", WebhookOutcome::Ignored),
        ] {
            let outcome = fx.reconciler.handle(&event(event_id, event_type)).await.unwrap();
            assert_eq!(outcome, expected);
            assert_eq!(outcome.message(), "Webhook processed successfully");
        }

        assert_eq!(fx.repo.payment(id).unwrap().status, PaymentStatus::Pending);
        assert!(fx.repo.find_ledger_entry("evt_other").await.unwrap().is_some());
    }
}

//! PostgreSQL repository adapter.
#![allow(clippy::collapsible_if)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use booking_types::{
    ApiKey, ApiKeyId, Booking, BookingDetails, BookingId, BookingQuery, BookingRepository,
    BookingScope, BookingStatus, CheckoutCompletion, Guide, GuideId, LedgerEntry, LedgerWrite,
    Listing, ListingId, NewBooking, Page, PageMeta, Payment, PaymentStatus, RepoError, Role,
    Tourist, TouristId, UpdateBookingStatusRequest, WebhookOutcome,
};

use crate::types::{
    ApiKeyColumns, BookingColumns, DetailColumns, LEDGER_PROCESSING, PaymentColumns,
    is_unique_violation, parse_money, parse_payment_status,
};

const BOOKING_COLUMNS: &str = "id, tourist_id, guide_id, listing_id, booking_date, status, \
     payment_status, is_deleted, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, booking_id, amount, currency, transaction_id, status, \
     stripe_event_id, checkout_session_id, payment_gateway_data, created_at, updated_at";

const DETAILS_SELECT: &str = r#"
    SELECT b.id, b.tourist_id, b.guide_id, b.listing_id, b.booking_date, b.status,
           b.payment_status, b.is_deleted, b.created_at, b.updated_at,
           t.name AS tourist_name, g.name AS guide_name,
           l.title AS listing_title, l.price AS listing_price, l.currency AS listing_currency,
           p.id AS payment_id, p.amount AS payment_amount, p.currency AS payment_currency,
           p.status AS payment_row_status
    FROM bookings b
    JOIN tourists t ON t.id = b.tourist_id
    JOIN guides g ON g.id = b.guide_id
    LEFT JOIN listings l ON l.id = b.listing_id
    LEFT JOIN payments p ON p.booking_id = b.id
"#;

const LIST_FILTER: &str = r#"
    WHERE b.is_deleted = FALSE
      AND ($1::uuid IS NULL OR b.tourist_id = $1)
      AND ($2::uuid IS NULL OR b.guide_id = $2)
      AND ($3::text IS NULL OR b.status = $3)
      AND ($4::text IS NULL OR b.payment_status = $4)
"#;

// ─────────────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────────────

#[derive(FromRow)]
struct DbTourist {
    id: Uuid,
    name: String,
    email: String,
    is_deleted: bool,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct DbGuide {
    id: Uuid,
    name: String,
    fee: i64,
    currency: String,
    is_deleted: bool,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct DbListing {
    id: Uuid,
    guide_id: Uuid,
    title: String,
    price: i64,
    currency: String,
    is_deleted: bool,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct DbBooking {
    id: Uuid,
    tourist_id: Uuid,
    guide_id: Uuid,
    listing_id: Option<Uuid>,
    booking_date: DateTime<Utc>,
    status: String,
    payment_status: String,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DbBooking {
    fn into_columns(self) -> BookingColumns {
        BookingColumns {
            id: self.id,
            tourist_id: self.tourist_id,
            guide_id: self.guide_id,
            listing_id: self.listing_id,
            booking_date: self.booking_date,
            status: self.status,
            payment_status: self.payment_status,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn into_domain(self) -> Result<Booking, RepoError> {
        self.into_columns().into_domain()
    }
}

#[derive(FromRow)]
struct DbBookingDetails {
    #[sqlx(flatten)]
    booking: DbBooking,
    tourist_name: String,
    guide_name: String,
    listing_title: Option<String>,
    listing_price: Option<i64>,
    listing_currency: Option<String>,
    payment_id: Option<Uuid>,
    payment_amount: Option<i64>,
    payment_currency: Option<String>,
    payment_row_status: Option<String>,
}

impl DbBookingDetails {
    fn into_domain(self) -> Result<BookingDetails, RepoError> {
        DetailColumns {
            booking: self.booking.into_columns(),
            tourist_name: self.tourist_name,
            guide_name: self.guide_name,
            listing_title: self.listing_title,
            listing_price: self.listing_price,
            listing_currency: self.listing_currency,
            payment_id: self.payment_id,
            payment_amount: self.payment_amount,
            payment_currency: self.payment_currency,
            payment_row_status: self.payment_row_status,
        }
        .into_domain()
    }
}

#[derive(FromRow)]
struct DbPayment {
    id: Uuid,
    booking_id: Uuid,
    amount: i64,
    currency: String,
    transaction_id: String,
    status: String,
    stripe_event_id: Option<String>,
    checkout_session_id: Option<String>,
    payment_gateway_data: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DbPayment {
    fn into_domain(self) -> Result<Payment, RepoError> {
        PaymentColumns {
            id: self.id,
            booking_id: self.booking_id,
            amount: self.amount,
            currency: self.currency,
            transaction_id: self.transaction_id,
            status: self.status,
            stripe_event_id: self.stripe_event_id,
            checkout_session_id: self.checkout_session_id,
            payment_gateway_data: self.payment_gateway_data,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_domain()
    }
}

#[derive(FromRow)]
struct DbLedgerEntry {
    event_id: String,
    event_type: String,
    outcome: String,
    booking_id: Option<Uuid>,
    received_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct DbPaymentState {
    status: String,
    stripe_event_id: Option<String>,
}

#[derive(FromRow)]
struct DbApiKey {
    id: Uuid,
    name: String,
    key_hash: String,
    role: String,
    principal_id: Option<Uuid>,
    is_active: bool,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl DbApiKey {
    fn into_domain(self) -> Result<ApiKey, RepoError> {
        ApiKeyColumns {
            id: self.id,
            name: self.name,
            key_hash: self.key_hash,
            role: self.role,
            principal_id: self.principal_id,
            is_active: self.is_active,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
        .into_domain()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PostgreSQL Repository
// ─────────────────────────────────────────────────────────────────────────────

/// PostgreSQL repository with row-level locking.
pub struct PostgresRepo {
    pool: PgPool,
}

/// Executes SQL statements from a migration file, splitting by semicolons.
async fn execute_migration(pool: &PgPool, sql: &str, name: &str) -> Result<(), anyhow::Error> {
    for statement in sql.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .map_err(|e| anyhow::anyhow!("Migration {} failed: {}", name, e))?;
        }
    }
    Ok(())
}

/// Runs all database migrations.
async fn run_migrations(pool: &PgPool) -> Result<(), anyhow::Error> {
    let migrations = [
        ("0001", include_str!("../migrations/0001_create_catalog_pg.sql")),
        ("0002", include_str!("../migrations/0002_create_bookings_pg.sql")),
        ("0003", include_str!("../migrations/0003_create_webhook_events_pg.sql")),
        ("0004", include_str!("../migrations/0004_create_api_keys_pg.sql")),
    ];

    for (name, sql) in migrations {
        execute_migration(pool, sql, name).await?;
    }

    Ok(())
}

impl PostgresRepo {
    /// Creates a new PostgreSQL repository with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the database schema (for testing with existing pool).
    pub async fn create_schema(&self) -> Result<(), RepoError> {
        run_migrations(&self.pool)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))
    }

    async fn fetch_booking(&self, id: Uuid) -> Result<Option<Booking>, RepoError> {
        let row: Option<DbBooking> =
            sqlx::query_as(&format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RepoError::Database(e.to_string()))?;

        row.map(DbBooking::into_domain).transpose()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Repository implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl BookingRepository for PostgresRepo {
    async fn save_tourist(&self, tourist: &Tourist) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO tourists (id, name, email, is_deleted, created_at) VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (id) DO UPDATE SET
                   name = EXCLUDED.name, email = EXCLUDED.email, is_deleted = EXCLUDED.is_deleted"#,
        )
        .bind(tourist.id.into_uuid())
        .bind(&tourist.name)
        .bind(&tourist.email)
        .bind(tourist.is_deleted)
        .bind(tourist.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(())
    }

    async fn save_guide(&self, guide: &Guide) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO guides (id, name, fee, currency, is_deleted, created_at) VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (id) DO UPDATE SET
                   name = EXCLUDED.name, fee = EXCLUDED.fee, currency = EXCLUDED.currency,
                   is_deleted = EXCLUDED.is_deleted"#,
        )
        .bind(guide.id.into_uuid())
        .bind(&guide.name)
        .bind(guide.fee.amount())
        .bind(guide.fee.currency().to_string())
        .bind(guide.is_deleted)
        .bind(guide.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(())
    }

    async fn save_listing(&self, listing: &Listing) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO listings (id, guide_id, title, price, currency, is_deleted, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT (id) DO UPDATE SET
                   guide_id = EXCLUDED.guide_id, title = EXCLUDED.title, price = EXCLUDED.price,
                   currency = EXCLUDED.currency, is_deleted = EXCLUDED.is_deleted"#,
        )
        .bind(listing.id.into_uuid())
        .bind(listing.guide_id.into_uuid())
        .bind(&listing.title)
        .bind(listing.price.amount())
        .bind(listing.price.currency().to_string())
        .bind(listing.is_deleted)
        .bind(listing.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(())
    }

    async fn get_tourist(&self, id: TouristId) -> Result<Option<Tourist>, RepoError> {
        let row: Option<DbTourist> = sqlx::query_as(
            r#"SELECT id, name, email, is_deleted, created_at FROM tourists WHERE id = $1 AND is_deleted = FALSE"#,
        )
        .bind(id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(row.map(|r| Tourist {
            id: TouristId::from_uuid(r.id),
            name: r.name,
            email: r.email,
            is_deleted: r.is_deleted,
            created_at: r.created_at,
        }))
    }

    async fn get_guide(&self, id: GuideId) -> Result<Option<Guide>, RepoError> {
        let row: Option<DbGuide> = sqlx::query_as(
            r#"SELECT id, name, fee, currency, is_deleted, created_at FROM guides WHERE id = $1 AND is_deleted = FALSE"#,
        )
        .bind(id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        row.map(|r| {
            Ok(Guide {
                id: GuideId::from_uuid(r.id),
                name: r.name,
                fee: parse_money(r.fee, &r.currency)?,
                is_deleted: r.is_deleted,
                created_at: r.created_at,
            })
        })
        .transpose()
    }

    async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>, RepoError> {
        let row: Option<DbListing> = sqlx::query_as(
            r#"SELECT id, guide_id, title, price, currency, is_deleted, created_at
               FROM listings WHERE id = $1 AND is_deleted = FALSE"#,
        )
        .bind(id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        row.map(|r| {
            Ok(Listing {
                id: ListingId::from_uuid(r.id),
                guide_id: GuideId::from_uuid(r.guide_id),
                title: r.title,
                price: parse_money(r.price, &r.currency)?,
                is_deleted: r.is_deleted,
                created_at: r.created_at,
            })
        })
        .transpose()
    }

    async fn create_booking(&self, draft: &NewBooking) -> Result<(Booking, Payment), RepoError> {
        let now = Utc::now();

        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO bookings (id, tourist_id, guide_id, listing_id, booking_date, status, payment_status, is_deleted, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, 'PENDING', 'PENDING', FALSE, $6, $6)"#,
        )
        .bind(draft.booking_id.into_uuid())
        .bind(draft.tourist_id.into_uuid())
        .bind(draft.guide_id.into_uuid())
        .bind(draft.listing_id.map(ListingId::into_uuid))
        .bind(draft.booking_date)
        .bind(now)
        .execute(&mut *db_tx)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO payments (id, booking_id, amount, currency, transaction_id, status, checkout_session_id, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, 'PENDING', $6, $7, $7)"#,
        )
        .bind(draft.payment_id.into_uuid())
        .bind(draft.booking_id.into_uuid())
        .bind(draft.amount.amount())
        .bind(draft.amount.currency().to_string())
        .bind(&draft.transaction_id)
        .bind(&draft.checkout_session_id)
        .bind(now)
        .execute(&mut *db_tx)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        db_tx
            .commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

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

        Ok((booking, payment))
    }

    async fn get_booking(&self, id: BookingId) -> Result<Option<BookingDetails>, RepoError> {
        let row: Option<DbBookingDetails> = sqlx::query_as(&format!(
            "{} WHERE b.id = $1 AND b.is_deleted = FALSE",
            DETAILS_SELECT
        ))
        .bind(id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        row.map(DbBookingDetails::into_domain).transpose()
    }

    async fn get_payment_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<Payment>, RepoError> {
        let row: Option<DbPayment> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE booking_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(booking_id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        row.map(DbPayment::into_domain).transpose()
    }

    async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<BookingDetails>, RepoError> {
        let (tourist_id, guide_id) = match query.scope {
            BookingScope::All => (None, None),
            BookingScope::Tourist(id) => (Some(id.into_uuid()), None),
            BookingScope::Guide(id) => (None, Some(id.into_uuid())),
        };
        let status = query.status.map(|s| s.to_string());
        let payment_status = query.payment_status.map(|s| s.to_string());

        let total: (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM bookings b {}",
            LIST_FILTER
        ))
        .bind(tourist_id)
        .bind(guide_id)
        .bind(&status)
        .bind(&payment_status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        let rows: Vec<DbBookingDetails> = sqlx::query_as(&format!(
            "{} {} {} LIMIT $5 OFFSET $6",
            DETAILS_SELECT,
            LIST_FILTER,
            query.order_by()
        ))
        .bind(tourist_id)
        .bind(guide_id)
        .bind(&status)
        .bind(&payment_status)
        .bind(i64::from(query.limit))
        .bind(query.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        let data = rows
            .into_iter()
            .map(DbBookingDetails::into_domain)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            meta: PageMeta {
                total: total.0,
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
        let now = Utc::now();

        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        // Lock the booking so a concurrent webhook cannot interleave
        let current: Option<(String,)> = sqlx::query_as(
            r#"SELECT payment_status FROM bookings WHERE id = $1 AND is_deleted = FALSE FOR UPDATE"#,
        )
        .bind(id.into_uuid())
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        let Some((current,)) = current else {
            return Ok(None);
        };

        if let Some(next) = update.payment_status {
            parse_payment_status(&current)?.ensure_transition(next)?;
        }

        let row: DbBooking = sqlx::query_as(&format!(
            r#"UPDATE bookings
               SET status = COALESCE($1, status), payment_status = COALESCE($2, payment_status), updated_at = $3
               WHERE id = $4
               RETURNING {}"#,
            BOOKING_COLUMNS
        ))
        .bind(update.status.map(|s| s.to_string()))
        .bind(update.payment_status.map(|s| s.to_string()))
        .bind(now)
        .bind(id.into_uuid())
        .fetch_one(&mut *db_tx)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        if let Some(next) = update.payment_status {
            sqlx::query(r#"UPDATE payments SET status = $1, updated_at = $2 WHERE booking_id = $3"#)
                .bind(next.to_string())
                .bind(now)
                .bind(id.into_uuid())
                .execute(&mut *db_tx)
                .await
                .map_err(|e| RepoError::Database(e.to_string()))?;
        }

        db_tx
            .commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        row.into_domain().map(Some)
    }

    async fn soft_delete_booking(&self, id: BookingId) -> Result<Option<Booking>, RepoError> {
        let result = sqlx::query(
            r#"UPDATE bookings SET is_deleted = TRUE, updated_at = $1 WHERE id = $2 AND is_deleted = FALSE"#,
        )
        .bind(Utc::now())
        .bind(id.into_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch_booking(id.into_uuid()).await
    }

    async fn delete_booking(&self, id: BookingId) -> Result<bool, RepoError> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        sqlx::query(r#"DELETE FROM payments WHERE booking_id = $1"#)
            .bind(id.into_uuid())
            .execute(&mut *db_tx)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        let result = sqlx::query(r#"DELETE FROM bookings WHERE id = $1"#)
            .bind(id.into_uuid())
            .execute(&mut *db_tx)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        db_tx
            .commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_ledger_entry(&self, event_id: &str) -> Result<Option<LedgerEntry>, RepoError> {
        let row: Option<DbLedgerEntry> = sqlx::query_as(
            r#"SELECT event_id, event_type, outcome, booking_id, received_at
               FROM webhook_events WHERE event_id = $1"#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(row.map(|r| LedgerEntry {
            event_id: r.event_id,
            event_type: r.event_type,
            outcome: r.outcome,
            booking_id: r.booking_id.map(BookingId::from_uuid),
            received_at: r.received_at,
        }))
    }

    async fn record_ledger_entry(&self, entry: &LedgerEntry) -> Result<LedgerWrite, RepoError> {
        let result = sqlx::query(
            r#"INSERT INTO webhook_events (event_id, event_type, outcome, booking_id, received_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&entry.event_id)
        .bind(&entry.event_type)
        .bind(&entry.outcome)
        .bind(entry.booking_id.map(BookingId::into_uuid))
        .bind(entry.received_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(LedgerWrite::Inserted),
            Err(e) if is_unique_violation(&e) => Ok(LedgerWrite::AlreadyExists),
            Err(e) => Err(RepoError::Database(e.to_string())),
        }
    }

    async fn apply_checkout_completion(
        &self,
        completion: &CheckoutCompletion,
    ) -> Result<WebhookOutcome, RepoError> {
        let booking_id = completion.metadata.booking_id.into_uuid();
        let payment_id = completion.metadata.payment_id.into_uuid();
        let now = Utc::now();

        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        // Claim the event id first; a concurrent delivery blocks here until we commit.
        let claimed = sqlx::query(
            r#"INSERT INTO webhook_events (event_id, event_type, outcome, booking_id, received_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&completion.event_id)
        .bind(&completion.event_type)
        .bind(LEDGER_PROCESSING)
        .bind(booking_id)
        .bind(now)
        .execute(&mut *db_tx)
        .await;

        match claimed {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(WebhookOutcome::AlreadyProcessed),
            Err(e) => return Err(RepoError::Database(e.to_string())),
        }

        let booking: Option<(String,)> =
            sqlx::query_as(r#"SELECT payment_status FROM bookings WHERE id = $1 FOR UPDATE"#)
                .bind(booking_id)
                .fetch_optional(&mut *db_tx)
                .await
                .map_err(|e| RepoError::Database(e.to_string()))?;

        let payment: Option<DbPaymentState> = if booking.is_some() {
            sqlx::query_as(
                r#"SELECT status, stripe_event_id FROM payments WHERE id = $1 AND booking_id = $2 FOR UPDATE"#,
            )
            .bind(payment_id)
            .bind(booking_id)
            .fetch_optional(&mut *db_tx)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?
        } else {
            None
        };

        let outcome = match (booking, payment) {
            (None, _) => WebhookOutcome::BookingNotFound,
            (Some(_), None) => WebhookOutcome::PaymentNotFound,
            (Some(_), Some(payment)) => {
                if payment.stripe_event_id.as_deref() == Some(completion.event_id.as_str()) {
                    return Ok(WebhookOutcome::AlreadyProcessed);
                }

                if !parse_payment_status(&payment.status)?.can_transition_to(completion.status) {
                    WebhookOutcome::AlreadySettled
                } else {
                    sqlx::query(
                        r#"UPDATE bookings SET payment_status = $1, updated_at = $2 WHERE id = $3"#,
                    )
                    .bind(completion.status.to_string())
                    .bind(now)
                    .bind(booking_id)
                    .execute(&mut *db_tx)
                    .await
                    .map_err(|e| RepoError::Database(e.to_string()))?;

                    let updated = sqlx::query(
                        r#"UPDATE payments
                           SET status = $1, payment_gateway_data = $2, stripe_event_id = $3, updated_at = $4
                           WHERE id = $5"#,
                    )
                    .bind(completion.status.to_string())
                    .bind(&completion.payload)
                    .bind(&completion.event_id)
                    .bind(now)
                    .bind(payment_id)
                    .execute(&mut *db_tx)
                    .await;

                    match updated {
                        Ok(_) => {}
                        Err(e) if is_unique_violation(&e) => {
                            return Ok(WebhookOutcome::AlreadyProcessed);
                        }
                        Err(e) => return Err(RepoError::Database(e.to_string())),
                    }

                    WebhookOutcome::Applied {
                        booking_id: completion.metadata.booking_id,
                        status: completion.status,
                    }
                }
            }
        };

        sqlx::query(r#"UPDATE webhook_events SET outcome = $1 WHERE event_id = $2"#)
            .bind(outcome.code())
            .bind(&completion.event_id)
            .execute(&mut *db_tx)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        db_tx
            .commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        Ok(outcome)
    }

    async fn verify_api_key_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, RepoError> {
        let row: Option<DbApiKey> = sqlx::query_as(
            r#"
            UPDATE api_keys SET last_used_at = NOW()
            WHERE key_hash = $1 AND is_active = TRUE
            RETURNING id, name, key_hash, role, principal_id, is_active, created_at, last_used_at
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        row.map(DbApiKey::into_domain).transpose()
    }

    async fn create_api_key(
        &self,
        name: &str,
        role: Role,
        principal_id: Option<Uuid>,
    ) -> Result<(ApiKey, String), RepoError> {
        let raw_key = crate::security::generate_api_key();
        let key_hash = crate::security::hash_api_key(&raw_key);
        let api_key = ApiKey::new(name.to_string(), key_hash, role, principal_id);

        sqlx::query(
            r#"
            INSERT INTO api_keys (id, name, key_hash, role, principal_id, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, TRUE, $6)
            "#,
        )
        .bind(api_key.id.into_uuid())
        .bind(&api_key.name)
        .bind(&api_key.key_hash)
        .bind(api_key.role.to_string())
        .bind(principal_id)
        .bind(api_key.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok((api_key, raw_key))
    }

    async fn count_api_keys(&self) -> Result<i64, RepoError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM api_keys WHERE is_active = TRUE")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(row.0)
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, RepoError> {
        let rows: Vec<DbApiKey> = sqlx::query_as(
            r#"SELECT id, name, key_hash, role, principal_id, is_active, created_at, last_used_at
               FROM api_keys ORDER BY created_at DESC"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        rows.into_iter().map(DbApiKey::into_domain).collect()
    }

    async fn delete_api_key(&self, id: ApiKeyId) -> Result<bool, RepoError> {
        let result =
            sqlx::query(r#"UPDATE api_keys SET is_active = FALSE WHERE id = $1 AND is_active = TRUE"#)
                .bind(id.into_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

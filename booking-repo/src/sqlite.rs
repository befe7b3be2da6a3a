//! SQLite repository adapter.
#![allow(clippy::collapsible_if)]

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use booking_types::{
    ApiKey, ApiKeyId, Booking, BookingDetails, BookingId, BookingQuery, BookingRepository,
    BookingScope, CheckoutCompletion, Guide, GuideId, LedgerEntry, LedgerWrite, Listing,
    ListingId, NewBooking, Page, PageMeta, Payment, PaymentStatus, RepoError, Role, Tourist,
    TouristId, UpdateBookingStatusRequest, WebhookOutcome,
};

use crate::types::{
    ApiKeyColumns, BookingColumns, DetailColumns, LEDGER_PROCESSING, PaymentColumns, db_error,
    is_unique_violation, parse_money,
};

const MIGRATIONS: [&str; 4] = [
    include_str!("../migrations/0001_create_catalog.sql"),
    include_str!("../migrations/0002_create_bookings.sql"),
    include_str!("../migrations/0003_create_webhook_events.sql"),
    include_str!("../migrations/0004_create_api_keys.sql"),
];

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
    WHERE b.is_deleted = 0
      AND (?1 IS NULL OR b.tourist_id = ?1)
      AND (?2 IS NULL OR b.guide_id = ?2)
      AND (?3 IS NULL OR b.status = ?3)
      AND (?4 IS NULL OR b.payment_status = ?4)
"#;

// ─────────────────────────────────────────────────────────────────────────────
// Column encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, RepoError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(db_error)
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, RepoError> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid, RepoError> {
    Uuid::parse_str(s).map_err(db_error)
}

fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, RepoError> {
    s.as_deref().map(parse_uuid).transpose()
}

// ─────────────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────────────

#[derive(FromRow)]
struct DbTourist {
    id: String,
    name: String,
    email: String,
    is_deleted: i64,
    created_at: String,
}

impl DbTourist {
    fn into_domain(self) -> Result<Tourist, RepoError> {
        Ok(Tourist {
            id: TouristId::from_uuid(parse_uuid(&self.id)?),
            name: self.name,
            email: self.email,
            is_deleted: self.is_deleted != 0,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(FromRow)]
struct DbGuide {
    id: String,
    name: String,
    fee: i64,
    currency: String,
    is_deleted: i64,
    created_at: String,
}

impl DbGuide {
    fn into_domain(self) -> Result<Guide, RepoError> {
        Ok(Guide {
            id: GuideId::from_uuid(parse_uuid(&self.id)?),
            name: self.name,
            fee: parse_money(self.fee, &self.currency)?,
            is_deleted: self.is_deleted != 0,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(FromRow)]
struct DbListing {
    id: String,
    guide_id: String,
    title: String,
    price: i64,
    currency: String,
    is_deleted: i64,
    created_at: String,
}

impl DbListing {
    fn into_domain(self) -> Result<Listing, RepoError> {
        Ok(Listing {
            id: ListingId::from_uuid(parse_uuid(&self.id)?),
            guide_id: GuideId::from_uuid(parse_uuid(&self.guide_id)?),
            title: self.title,
            price: parse_money(self.price, &self.currency)?,
            is_deleted: self.is_deleted != 0,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(FromRow)]
struct DbBooking {
    id: String,
    tourist_id: String,
    guide_id: String,
    listing_id: Option<String>,
    booking_date: String,
    status: String,
    payment_status: String,
    is_deleted: i64,
    created_at: String,
    updated_at: String,
}

impl DbBooking {
    fn into_columns(self) -> Result<BookingColumns, RepoError> {
        Ok(BookingColumns {
            id: parse_uuid(&self.id)?,
            tourist_id: parse_uuid(&self.tourist_id)?,
            guide_id: parse_uuid(&self.guide_id)?,
            listing_id: parse_opt_uuid(self.listing_id)?,
            booking_date: parse_ts(&self.booking_date)?,
            status: self.status,
            payment_status: self.payment_status,
            is_deleted: self.is_deleted != 0,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }

    fn into_domain(self) -> Result<Booking, RepoError> {
        self.into_columns()?.into_domain()
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
    payment_id: Option<String>,
    payment_amount: Option<i64>,
    payment_currency: Option<String>,
    payment_row_status: Option<String>,
}

impl DbBookingDetails {
    fn into_domain(self) -> Result<BookingDetails, RepoError> {
        DetailColumns {
            booking: self.booking.into_columns()?,
            tourist_name: self.tourist_name,
            guide_name: self.guide_name,
            listing_title: self.listing_title,
            listing_price: self.listing_price,
            listing_currency: self.listing_currency,
            payment_id: parse_opt_uuid(self.payment_id)?,
            payment_amount: self.payment_amount,
            payment_currency: self.payment_currency,
            payment_row_status: self.payment_row_status,
        }
        .into_domain()
    }
}

#[derive(FromRow)]
struct DbPayment {
    id: String,
    booking_id: String,
    amount: i64,
    currency: String,
    transaction_id: String,
    status: String,
    stripe_event_id: Option<String>,
    checkout_session_id: Option<String>,
    payment_gateway_data: Option<String>,
    created_at: String,
    updated_at: String,
}

impl DbPayment {
    fn into_domain(self) -> Result<Payment, RepoError> {
        let payment_gateway_data = self
            .payment_gateway_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(db_error)?;

        PaymentColumns {
            id: parse_uuid(&self.id)?,
            booking_id: parse_uuid(&self.booking_id)?,
            amount: self.amount,
            currency: self.currency,
            transaction_id: self.transaction_id,
            status: self.status,
            stripe_event_id: self.stripe_event_id,
            checkout_session_id: self.checkout_session_id,
            payment_gateway_data,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        }
        .into_domain()
    }
}

#[derive(FromRow)]
struct DbLedgerEntry {
    event_id: String,
    event_type: String,
    outcome: String,
    booking_id: Option<String>,
    received_at: String,
}

impl DbLedgerEntry {
    fn into_domain(self) -> Result<LedgerEntry, RepoError> {
        Ok(LedgerEntry {
            event_id: self.event_id,
            event_type: self.event_type,
            outcome: self.outcome,
            booking_id: parse_opt_uuid(self.booking_id)?.map(BookingId::from_uuid),
            received_at: parse_ts(&self.received_at)?,
        })
    }
}

#[derive(FromRow)]
struct DbPaymentState {
    status: String,
    stripe_event_id: Option<String>,
}

#[derive(FromRow)]
struct DbApiKey {
    id: String,
    name: String,
    key_hash: String,
    role: String,
    principal_id: Option<String>,
    is_active: i64,
    created_at: String,
    last_used_at: Option<String>,
}

impl DbApiKey {
    fn into_domain(self) -> Result<ApiKey, RepoError> {
        ApiKeyColumns {
            id: parse_uuid(&self.id)?,
            name: self.name,
            key_hash: self.key_hash,
            role: self.role,
            principal_id: parse_opt_uuid(self.principal_id)?,
            is_active: self.is_active != 0,
            created_at: parse_ts(&self.created_at)?,
            last_used_at: parse_opt_ts(self.last_used_at)?,
        }
        .into_domain()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Repository
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite repository implementation.
pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    /// Creates a new SQLite repository with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure on-disk SQLite target directory exists (no-op for in-memory).
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.split('?').next().unwrap_or(path);
            if path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // An in-memory database lives only as long as its connection.
        let pool = if database_url.contains(":memory:") || database_url.contains("mode=memory") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePool::connect_with(options).await?
        };

        let repo = Self { pool };
        repo.create_schema().await?;
        Ok(repo)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the database schema (for testing with existing pool).
    pub async fn create_schema(&self) -> Result<(), RepoError> {
        for ddl in MIGRATIONS {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| RepoError::Database(e.to_string()))?;
        }
        Ok(())
    }

    async fn fetch_booking(&self, id: &str) -> Result<Option<Booking>, RepoError> {
        let row: Option<DbBooking> =
            sqlx::query_as(&format!("SELECT {} FROM bookings WHERE id = ?", BOOKING_COLUMNS))
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
impl BookingRepository for SqliteRepo {
    async fn save_tourist(&self, tourist: &Tourist) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO tourists (id, name, email, is_deleted, created_at) VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name, email = excluded.email, is_deleted = excluded.is_deleted"#,
        )
        .bind(tourist.id.to_string())
        .bind(&tourist.name)
        .bind(&tourist.email)
        .bind(tourist.is_deleted)
        .bind(ts(&tourist.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(())
    }

    async fn save_guide(&self, guide: &Guide) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO guides (id, name, fee, currency, is_deleted, created_at) VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name, fee = excluded.fee, currency = excluded.currency,
                   is_deleted = excluded.is_deleted"#,
        )
        .bind(guide.id.to_string())
        .bind(&guide.name)
        .bind(guide.fee.amount())
        .bind(guide.fee.currency().to_string())
        .bind(guide.is_deleted)
        .bind(ts(&guide.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(())
    }

    async fn save_listing(&self, listing: &Listing) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO listings (id, guide_id, title, price, currency, is_deleted, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   guide_id = excluded.guide_id, title = excluded.title, price = excluded.price,
                   currency = excluded.currency, is_deleted = excluded.is_deleted"#,
        )
        .bind(listing.id.to_string())
        .bind(listing.guide_id.to_string())
        .bind(&listing.title)
        .bind(listing.price.amount())
        .bind(listing.price.currency().to_string())
        .bind(listing.is_deleted)
        .bind(ts(&listing.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(())
    }

    async fn get_tourist(&self, id: TouristId) -> Result<Option<Tourist>, RepoError> {
        let row: Option<DbTourist> = sqlx::query_as(
            r#"SELECT id, name, email, is_deleted, created_at FROM tourists WHERE id = ? AND is_deleted = 0"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        row.map(DbTourist::into_domain).transpose()
    }

    async fn get_guide(&self, id: GuideId) -> Result<Option<Guide>, RepoError> {
        let row: Option<DbGuide> = sqlx::query_as(
            r#"SELECT id, name, fee, currency, is_deleted, created_at FROM guides WHERE id = ? AND is_deleted = 0"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        row.map(DbGuide::into_domain).transpose()
    }

    async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>, RepoError> {
        let row: Option<DbListing> = sqlx::query_as(
            r#"SELECT id, guide_id, title, price, currency, is_deleted, created_at
               FROM listings WHERE id = ? AND is_deleted = 0"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        row.map(DbListing::into_domain).transpose()
    }

    async fn create_booking(&self, draft: &NewBooking) -> Result<(Booking, Payment), RepoError> {
        let now = Utc::now();
        let now_str = ts(&now);
        let booking_id = draft.booking_id.to_string();

        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO bookings (id, tourist_id, guide_id, listing_id, booking_date, status, payment_status, is_deleted, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, 'PENDING', 'PENDING', 0, ?, ?)"#,
        )
        .bind(&booking_id)
        .bind(draft.tourist_id.to_string())
        .bind(draft.guide_id.to_string())
        .bind(draft.listing_id.map(|id| id.to_string()))
        .bind(ts(&draft.booking_date))
        .bind(&now_str)
        .bind(&now_str)
        .execute(&mut *db_tx)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO payments (id, booking_id, amount, currency, transaction_id, status, checkout_session_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?, ?)"#,
        )
        .bind(draft.payment_id.to_string())
        .bind(&booking_id)
        .bind(draft.amount.amount())
        .bind(draft.amount.currency().to_string())
        .bind(&draft.transaction_id)
        .bind(&draft.checkout_session_id)
        .bind(&now_str)
        .bind(&now_str)
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
            status: booking_types::BookingStatus::Pending,
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
            "{} WHERE b.id = ? AND b.is_deleted = 0",
            DETAILS_SELECT
        ))
        .bind(id.to_string())
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
            "SELECT {} FROM payments WHERE booking_id = ?",
            PAYMENT_COLUMNS
        ))
        .bind(booking_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        row.map(DbPayment::into_domain).transpose()
    }

    async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<BookingDetails>, RepoError> {
        let (tourist_id, guide_id) = match query.scope {
            BookingScope::All => (None, None),
            BookingScope::Tourist(id) => (Some(id.to_string()), None),
            BookingScope::Guide(id) => (None, Some(id.to_string())),
        };
        let status = query.status.map(|s| s.to_string());
        let payment_status = query.payment_status.map(|s| s.to_string());

        let total: (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM bookings b {}",
            LIST_FILTER
        ))
        .bind(&tourist_id)
        .bind(&guide_id)
        .bind(&status)
        .bind(&payment_status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        let rows: Vec<DbBookingDetails> = sqlx::query_as(&format!(
            "{} {} {} LIMIT ?5 OFFSET ?6",
            DETAILS_SELECT,
            LIST_FILTER,
            query.order_by()
        ))
        .bind(&tourist_id)
        .bind(&guide_id)
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
        let id_str = id.to_string();
        let now = ts(&Utc::now());

        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        // Write first: a deferred read-then-write upgrade gets SQLITE_BUSY
        // instead of waiting on a concurrent webhook apply.
        let updated = sqlx::query(
            r#"UPDATE bookings
               SET status = COALESCE(?1, status), payment_status = COALESCE(?2, payment_status), updated_at = ?3
               WHERE id = ?4 AND is_deleted = 0
                 AND NOT (payment_status = 'PAID' AND ?2 IS NOT NULL AND ?2 <> 'PAID')"#,
        )
        .bind(update.status.map(|s| s.to_string()))
        .bind(update.payment_status.map(|s| s.to_string()))
        .bind(&now)
        .bind(&id_str)
        .execute(&mut *db_tx)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        if updated.rows_affected() == 0 {
            let current: Option<(String,)> = sqlx::query_as(
                r#"SELECT payment_status FROM bookings WHERE id = ? AND is_deleted = 0"#,
            )
            .bind(&id_str)
            .fetch_optional(&mut *db_tx)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

            if let (Some((current,)), Some(next)) = (current, update.payment_status) {
                crate::types::parse_payment_status(&current)?.ensure_transition(next)?;
            }
            return Ok(None);
        }

        if let Some(next) = update.payment_status {
            sqlx::query(r#"UPDATE payments SET status = ?, updated_at = ? WHERE booking_id = ?"#)
                .bind(next.to_string())
                .bind(&now)
                .bind(&id_str)
                .execute(&mut *db_tx)
                .await
                .map_err(|e| RepoError::Database(e.to_string()))?;
        }

        let row: DbBooking =
            sqlx::query_as(&format!("SELECT {} FROM bookings WHERE id = ?", BOOKING_COLUMNS))
                .bind(&id_str)
                .fetch_one(&mut *db_tx)
                .await
                .map_err(|e| RepoError::Database(e.to_string()))?;

        db_tx
            .commit()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        row.into_domain().map(Some)
    }

    async fn soft_delete_booking(&self, id: BookingId) -> Result<Option<Booking>, RepoError> {
        let id_str = id.to_string();

        let result = sqlx::query(
            r#"UPDATE bookings SET is_deleted = 1, updated_at = ? WHERE id = ? AND is_deleted = 0"#,
        )
        .bind(ts(&Utc::now()))
        .bind(&id_str)
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch_booking(&id_str).await
    }

    async fn delete_booking(&self, id: BookingId) -> Result<bool, RepoError> {
        let id_str = id.to_string();

        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        sqlx::query(r#"DELETE FROM payments WHERE booking_id = ?"#)
            .bind(&id_str)
            .execute(&mut *db_tx)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        let result = sqlx::query(r#"DELETE FROM bookings WHERE id = ?"#)
            .bind(&id_str)
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
               FROM webhook_events WHERE event_id = ?"#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        row.map(DbLedgerEntry::into_domain).transpose()
    }

    async fn record_ledger_entry(&self, entry: &LedgerEntry) -> Result<LedgerWrite, RepoError> {
        let result = sqlx::query(
            r#"INSERT INTO webhook_events (event_id, event_type, outcome, booking_id, received_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&entry.event_id)
        .bind(&entry.event_type)
        .bind(&entry.outcome)
        .bind(entry.booking_id.map(|id| id.to_string()))
        .bind(ts(&entry.received_at))
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
        let booking_id = completion.metadata.booking_id.to_string();
        let payment_id = completion.metadata.payment_id.to_string();
        let now = ts(&Utc::now());

        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        // Claim the event id first; a concurrent delivery blocks here until we commit.
        let claimed = sqlx::query(
            r#"INSERT INTO webhook_events (event_id, event_type, outcome, booking_id, received_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&completion.event_id)
        .bind(&completion.event_type)
        .bind(LEDGER_PROCESSING)
        .bind(&booking_id)
        .bind(&now)
        .execute(&mut *db_tx)
        .await;

        match claimed {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(WebhookOutcome::AlreadyProcessed),
            Err(e) => return Err(RepoError::Database(e.to_string())),
        }

        let booking: Option<(String,)> =
            sqlx::query_as(r#"SELECT payment_status FROM bookings WHERE id = ?"#)
                .bind(&booking_id)
                .fetch_optional(&mut *db_tx)
                .await
                .map_err(|e| RepoError::Database(e.to_string()))?;

        let payment: Option<DbPaymentState> = if booking.is_some() {
            sqlx::query_as(
                r#"SELECT status, stripe_event_id FROM payments WHERE id = ? AND booking_id = ?"#,
            )
            .bind(&payment_id)
            .bind(&booking_id)
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

                let current = crate::types::parse_payment_status(&payment.status)?;
                if !current.can_transition_to(completion.status) {
                    WebhookOutcome::AlreadySettled
                } else {
                    sqlx::query(
                        r#"UPDATE bookings SET payment_status = ?, updated_at = ? WHERE id = ?"#,
                    )
                    .bind(completion.status.to_string())
                    .bind(&now)
                    .bind(&booking_id)
                    .execute(&mut *db_tx)
                    .await
                    .map_err(|e| RepoError::Database(e.to_string()))?;

                    let updated = sqlx::query(
                        r#"UPDATE payments
                           SET status = ?, payment_gateway_data = ?, stripe_event_id = ?, updated_at = ?
                           WHERE id = ?"#,
                    )
                    .bind(completion.status.to_string())
                    .bind(completion.payload.to_string())
                    .bind(&completion.event_id)
                    .bind(&now)
                    .bind(&payment_id)
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

        sqlx::query(r#"UPDATE webhook_events SET outcome = ? WHERE event_id = ?"#)
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
            r#"SELECT id, name, key_hash, role, principal_id, is_active, created_at, last_used_at
               FROM api_keys WHERE key_hash = ? AND is_active = 1"#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let now = Utc::now();
        sqlx::query(r#"UPDATE api_keys SET last_used_at = ? WHERE id = ?"#)
            .bind(ts(&now))
            .bind(&row.id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        let mut key = row.into_domain()?;
        key.last_used_at = Some(now);
        Ok(Some(key))
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
            r#"INSERT INTO api_keys (id, name, key_hash, role, principal_id, is_active, created_at)
               VALUES (?, ?, ?, ?, ?, 1, ?)"#,
        )
        .bind(api_key.id.to_string())
        .bind(&api_key.name)
        .bind(&api_key.key_hash)
        .bind(api_key.role.to_string())
        .bind(principal_id.map(|id| id.to_string()))
        .bind(ts(&api_key.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok((api_key, raw_key))
    }

    async fn count_api_keys(&self) -> Result<i64, RepoError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM api_keys WHERE is_active = 1")
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
        let result = sqlx::query(r#"UPDATE api_keys SET is_active = 0 WHERE id = ? AND is_active = 1"#)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| RepoError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

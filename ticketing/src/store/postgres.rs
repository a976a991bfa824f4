//! `PostgreSQL` payment store.
//!
//! # Example
//!
//! ```no_run
//! use ticketing::store::PostgresPaymentStore;
//! use sqlx::PgPool;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPool::connect("postgres://localhost/ticketing").await?;
//! let store = PostgresPaymentStore::new(pool);
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

use super::{CheckoutAttachment, LockedPayment, PaymentLookup, PaymentMutation, PaymentStore, StoreError};
use crate::types::{
    Money, NewPayment, PaymentId, PaymentMethod, PaymentRecord, Reference, Registration,
    RegistrationId, RegistrationPaymentStatus, TicketCode,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

/// How many ticket codes to try before giving up on a registration insert.
const TICKET_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    registration_id: Uuid,
    reference: String,
    provider_id: Option<String>,
    checkout_url: Option<String>,
    status: String,
    method: Option<String>,
    transaction_id: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    amount_minor: i64,
    currency: String,
    raw_provider_payload: Option<Value>,
    last_webhook_request_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: PaymentId::from_uuid(row.id),
            registration_id: RegistrationId::from_uuid(row.registration_id),
            reference: Reference::parse(&row.reference)?,
            provider_id: row.provider_id,
            checkout_url: row.checkout_url,
            status: row.status.parse()?,
            method: row.method.as_deref().map(str::parse::<PaymentMethod>).transpose()?,
            transaction_id: row.transaction_id,
            paid_at: row.paid_at,
            amount: Money::from_minor(
                u64::try_from(row.amount_minor)
                    .map_err(|_| StoreError::Corrupt(format!("negative amount on payment {}", row.id)))?,
            ),
            currency: row.currency,
            raw_provider_payload: row.raw_provider_payload,
            last_webhook_request_id: row.last_webhook_request_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct LockedRow {
    #[sqlx(flatten)]
    payment: PaymentRow,
    registration_payment_status: String,
}

#[derive(Debug, FromRow)]
struct RegistrationRow {
    id: Uuid,
    ticket_code: String,
    full_name: String,
    email: String,
    status: String,
    payment_status: String,
    event_title: String,
    price_minor: Option<i64>,
}

impl TryFrom<RegistrationRow> for Registration {
    type Error = StoreError;

    fn try_from(row: RegistrationRow) -> Result<Self, Self::Error> {
        let event_price = row
            .price_minor
            .map(|minor| {
                u64::try_from(minor)
                    .map(Money::from_minor)
                    .map_err(|_| StoreError::Corrupt(format!("negative price for registration {}", row.id)))
            })
            .transpose()?;
        Ok(Self {
            id: RegistrationId::from_uuid(row.id),
            ticket_code: TicketCode::new(row.ticket_code),
            full_name: row.full_name,
            email: row.email,
            event_title: row.event_title,
            event_price,
            status: row.status.parse()?,
            payment_status: row.payment_status.parse()?,
        })
    }
}

fn amount_to_db(amount: Money) -> Result<i64, StoreError> {
    i64::try_from(amount.minor()).map_err(|_| StoreError::Conflict(format!("amount {amount} out of range")))
}

fn unique_violation(error: &sqlx::Error) -> Option<String> {
    match error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Some(db.constraint().unwrap_or("unique").to_string())
        }
        _ => None,
    }
}

/// `PostgreSQL` payment store.
#[derive(Clone, Debug)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns error if migrations fail.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))
    }

    /// Insert an event. Used by seeding and tests; the catalog is managed elsewhere.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create_event(&self, title: &str, price: Option<Money>) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let price_minor = price.map(amount_to_db).transpose()?;
        sqlx::query("INSERT INTO events (id, title, price_minor) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(title)
            .bind(price_minor)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    /// Insert an active, unpaid registration with a freshly generated ticket code.
    ///
    /// Retries on ticket code collisions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the email is already registered for
    /// the event or no free ticket code was found.
    pub async fn create_registration(
        &self,
        event_id: Uuid,
        full_name: &str,
        email: &str,
    ) -> Result<Registration, StoreError> {
        let id = RegistrationId::new();
        for _ in 0..TICKET_CODE_ATTEMPTS {
            let ticket_code = TicketCode::generate(&mut rand::thread_rng());
            let inserted = sqlx::query(
                "INSERT INTO registrations (id, event_id, ticket_code, full_name, email)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(id.as_uuid())
            .bind(event_id)
            .bind(ticket_code.as_str())
            .bind(full_name)
            .bind(email)
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(_) => {
                    return self
                        .registration(id)
                        .await?
                        .ok_or_else(|| StoreError::Corrupt(format!("registration {id} vanished")));
                }
                Err(e) => match unique_violation(&e) {
                    Some(constraint) if constraint == "registrations_ticket_code_key" => {
                        tracing::debug!(%ticket_code, "Ticket code collision, retrying");
                    }
                    Some(_) => {
                        return Err(StoreError::Conflict(format!(
                            "{email} is already registered for this event"
                        )));
                    }
                    None => return Err(e.into()),
                },
            }
        }
        Err(StoreError::Conflict("no free ticket code".to_string()))
    }

    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        lookup: &PaymentLookup,
    ) -> Result<Option<LockedRow>, StoreError> {
        if let Some(reference) = &lookup.reference {
            let row = sqlx::query_as::<_, LockedRow>(
                "SELECT p.id, p.registration_id, p.reference, p.provider_id, p.checkout_url,
                        p.status, p.method, p.transaction_id, p.paid_at, p.amount_minor,
                        p.currency, p.raw_provider_payload, p.last_webhook_request_id,
                        p.created_at, p.updated_at,
                        r.payment_status AS registration_payment_status
                 FROM payments p
                 JOIN registrations r ON r.id = p.registration_id
                 WHERE p.reference = $1
                 FOR UPDATE OF p, r",
            )
            .bind(reference.as_str())
            .fetch_optional(&mut **tx)
            .await?;
            if row.is_some() {
                return Ok(row);
            }
        }

        if let Some(provider_id) = &lookup.provider_id {
            let row = sqlx::query_as::<_, LockedRow>(
                "SELECT p.id, p.registration_id, p.reference, p.provider_id, p.checkout_url,
                        p.status, p.method, p.transaction_id, p.paid_at, p.amount_minor,
                        p.currency, p.raw_provider_payload, p.last_webhook_request_id,
                        p.created_at, p.updated_at,
                        r.payment_status AS registration_payment_status
                 FROM payments p
                 JOIN registrations r ON r.id = p.registration_id
                 WHERE p.provider_id = $1
                 ORDER BY p.created_at DESC
                 LIMIT 1
                 FOR UPDATE OF p, r",
            )
            .bind(provider_id)
            .fetch_optional(&mut **tx)
            .await?;
            return Ok(row);
        }

        Ok(None)
    }
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn registration(&self, id: RegistrationId) -> Result<Option<Registration>, StoreError> {
        sqlx::query_as::<_, RegistrationRow>(
            "SELECT r.id, r.ticket_code, r.full_name, r.email, r.status, r.payment_status,
                    e.title AS event_title, e.price_minor
             FROM registrations r
             JOIN events e ON e.id = r.event_id
             WHERE r.id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Registration::try_from)
        .transpose()
    }

    async fn registration_by_ticket_code(
        &self,
        ticket_code: &TicketCode,
    ) -> Result<Option<Registration>, StoreError> {
        sqlx::query_as::<_, RegistrationRow>(
            "SELECT r.id, r.ticket_code, r.full_name, r.email, r.status, r.payment_status,
                    e.title AS event_title, e.price_minor
             FROM registrations r
             JOIN events e ON e.id = r.event_id
             WHERE r.ticket_code = $1",
        )
        .bind(ticket_code.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(Registration::try_from)
        .transpose()
    }

    async fn set_registration_payment_status(
        &self,
        id: RegistrationId,
        status: RegistrationPaymentStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE registrations SET payment_status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_or_create_payment(&self, new: NewPayment) -> Result<(PaymentRecord, bool), StoreError> {
        let inserted = sqlx::query_as::<_, PaymentRow>(
            "INSERT INTO payments (id, registration_id, reference, status, method, amount_minor, currency)
             VALUES ($1, $2, $3, 'PENDING', $4, $5, $6)
             ON CONFLICT (registration_id) DO NOTHING
             RETURNING id, registration_id, reference, provider_id, checkout_url, status, method,
                       transaction_id, paid_at, amount_minor, currency, raw_provider_payload,
                       last_webhook_request_id, created_at, updated_at",
        )
        .bind(PaymentId::new().as_uuid())
        .bind(new.registration_id.as_uuid())
        .bind(new.reference.as_str())
        .bind(new.method.as_ref().map(PaymentMethod::as_str))
        .bind(amount_to_db(new.amount)?)
        .bind(&new.currency)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => StoreError::Conflict(format!(
                "reference {} belongs to another registration",
                new.reference
            )),
            None => StoreError::Database(e),
        })?;

        if let Some(row) = inserted {
            return Ok((row.try_into()?, true));
        }

        let existing = sqlx::query_as::<_, PaymentRow>(
            "SELECT id, registration_id, reference, provider_id, checkout_url, status, method,
                    transaction_id, paid_at, amount_minor, currency, raw_provider_payload,
                    last_webhook_request_id, created_at, updated_at
             FROM payments
             WHERE registration_id = $1",
        )
        .bind(new.registration_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok((existing.try_into()?, false))
    }

    async fn attach_checkout(
        &self,
        id: PaymentId,
        checkout: CheckoutAttachment,
    ) -> Result<PaymentRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        // PAID and REFUNDED rows are left as they are
        let updated = sqlx::query_as::<_, PaymentRow>(
            "UPDATE payments
             SET provider_id = $2,
                 checkout_url = $3,
                 raw_provider_payload = $4,
                 method = COALESCE($5, method),
                 status = 'PENDING',
                 updated_at = NOW()
             WHERE id = $1 AND status IN ('PENDING', 'FAILED')
             RETURNING id, registration_id, reference, provider_id, checkout_url, status, method,
                       transaction_id, paid_at, amount_minor, currency, raw_provider_payload,
                       last_webhook_request_id, created_at, updated_at",
        )
        .bind(id.as_uuid())
        .bind(&checkout.provider_id)
        .bind(&checkout.checkout_url)
        .bind(&checkout.raw)
        .bind(checkout.method.as_ref().map(PaymentMethod::as_str))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            let current = sqlx::query_as::<_, PaymentRow>(
                "SELECT id, registration_id, reference, provider_id, checkout_url, status, method,
                        transaction_id, paid_at, amount_minor, currency, raw_provider_payload,
                        last_webhook_request_id, created_at, updated_at
                 FROM payments
                 WHERE id = $1",
            )
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("payment {id} disappeared")))?;
            tx.commit().await?;
            return current.try_into();
        };

        sqlx::query(
            "UPDATE registrations SET payment_status = 'PENDING'
             WHERE id = $1 AND payment_status IN ('UNPAID', 'FAILED')",
        )
        .bind(row.registration_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn payment_by_reference(&self, reference: &Reference) -> Result<Option<PaymentRecord>, StoreError> {
        sqlx::query_as::<_, PaymentRow>(
            "SELECT id, registration_id, reference, provider_id, checkout_url, status, method,
                    transaction_id, paid_at, amount_minor, currency, raw_provider_payload,
                    last_webhook_request_id, created_at, updated_at
             FROM payments
             WHERE reference = $1",
        )
        .bind(reference.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(PaymentRecord::try_from)
        .transpose()
    }

    async fn with_locked_payment<'a>(
        &'a self,
        lookup: &'a PaymentLookup,
        mutation: PaymentMutation<'a>,
    ) -> Result<Option<LockedPayment>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = Self::lock_row(&mut tx, lookup).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        let original = LockedPayment {
            registration_payment_status: row.registration_payment_status.parse()?,
            record: row.payment.try_into()?,
        };
        let mut locked = original.clone();
        mutation(&mut locked);

        if locked.record != original.record {
            let record = &locked.record;
            let updated_at: DateTime<Utc> = sqlx::query_scalar(
                "UPDATE payments
                 SET status = $2,
                     method = $3,
                     transaction_id = $4,
                     paid_at = $5,
                     raw_provider_payload = $6,
                     last_webhook_request_id = $7,
                     updated_at = NOW()
                 WHERE id = $1
                 RETURNING updated_at",
            )
            .bind(record.id.as_uuid())
            .bind(record.status.as_str())
            .bind(record.method.as_ref().map(PaymentMethod::as_str))
            .bind(record.transaction_id.as_deref())
            .bind(record.paid_at)
            .bind(record.raw_provider_payload.as_ref())
            .bind(record.last_webhook_request_id.as_deref())
            .fetch_one(&mut *tx)
            .await?;
            locked.record.updated_at = updated_at;
        }

        if locked.registration_payment_status != original.registration_payment_status {
            sqlx::query("UPDATE registrations SET payment_status = $2 WHERE id = $1")
                .bind(locked.record.registration_id.as_uuid())
                .bind(locked.registration_payment_status.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(Some(locked))
    }
}

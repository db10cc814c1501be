use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::domain::core::{
    BookingId, Currency, InsertOutcome, Money, PaymentRecord, PaymentRecordId, PaymentRecords,
    PaymentStatus,
};
use crate::domain::{DataAccessError, Entity};

/// Append-only payment audit table. Idempotency is enforced by the unique
/// index on `transaction_id` together with `ON CONFLICT DO NOTHING`, so the
/// duplicate check and the insert are one atomic statement.
#[derive(Clone)]
pub struct PgPaymentRecords {
    pool: PgPool,
}

impl PgPaymentRecords {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentRecords for PgPaymentRecords {
    async fn insert(&self, record: PaymentRecord) -> Result<InsertOutcome, DataAccessError> {
        let result = sqlx::query(
            "INSERT INTO payment_records \
             (id, transaction_id, amount, currency, status, booking_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (transaction_id) DO NOTHING",
        )
        .bind(*record.id() as i64)
        .bind(record.transaction_id())
        .bind(record.amount().amount())
        .bind(record.amount().currency().as_str())
        .bind(record.status().as_str())
        .bind(*record.booking_id() as i64)
        .bind(record.created_at())
        .execute(&self.pool)
        .await?;
        match result.rows_affected() {
            0 => Ok(InsertOutcome::AlreadyRecorded),
            _ => Ok(InsertOutcome::Inserted),
        }
    }

    async fn find_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentRecord>, DataAccessError> {
        let row: Option<PaymentRecordRow> = sqlx::query_as(
            "SELECT id, transaction_id, amount, currency, status, booking_id, created_at \
             FROM payment_records WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentRecordRow::into_record).transpose()
    }
}

#[derive(FromRow)]
struct PaymentRecordRow {
    id: i64,
    transaction_id: String,
    amount: i64,
    currency: String,
    status: String,
    booking_id: i64,
    created_at: DateTime<Utc>,
}

impl PaymentRecordRow {
    fn into_record(self) -> Result<PaymentRecord, DataAccessError> {
        let currency = self
            .currency
            .parse::<Currency>()
            .map_err(|e| DataAccessError::ReadError(Box::new(e)))?;
        let status = self
            .status
            .parse::<PaymentStatus>()
            .map_err(|e| DataAccessError::ReadError(Box::new(e)))?;
        Ok(PaymentRecord::restore(
            PaymentRecordId::from(self.id as u64),
            self.transaction_id,
            Money::new(self.amount, currency),
            status,
            BookingId::from(self.booking_id as u64),
            self.created_at,
        ))
    }
}

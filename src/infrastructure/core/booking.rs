use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::domain::core::{
    AddonId, AddonLine, AddonLineId, Booking, BookingCustomer, BookingId, BookingKind,
    BookingLedger, BookingStatus, ClientId, Currency, FeeSplit, LedgerError, Money, PaymentStatus,
    ProviderId, ServiceId,
};
use crate::domain::{DataAccessError, Entity};

/// Postgres-backed booking ledger. Slot admission is serialized by the
/// database itself: the guard locks every conflicting row with `FOR UPDATE`
/// inside the same transaction as the insert, so a second concurrent writer
/// blocks until the first commits or rolls back and then re-evaluates the
/// overlap predicate. No external distributed lock is involved.
#[derive(Clone)]
pub struct PgBookingLedger {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgBookingLedger {
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self {
            pool,
            lock_timeout_ms,
        }
    }

    /// Admission gate. Runs inside the booking's own transaction.
    ///
    /// The advisory lock serializes writers that hash to the same
    /// provider+start key, including the first-insert race where no booking
    /// row exists yet to lock; a hash collision between unrelated slots only
    /// costs a wait, never a false conflict. The wait is bounded by the same
    /// `lock_timeout` as the row scan. The per-row `FOR UPDATE` scan below is
    /// the overlap authority: conflicting rows are located and locked one at
    /// a time and the cardinality is tested afterwards, because row locks
    /// cannot be combined with aggregate functions in one statement.
    async fn guard(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        booking: &Booking,
    ) -> Result<(), LedgerError> {
        let key = advisory_key(booking.provider_id(), booking.slot().start);
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut **tx)
            .await
            .map_err(lock_error)?;

        let conflicting: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM bookings \
             WHERE provider_id = $1 AND status <> 'cancelled' \
               AND starts_at < $2 AND ends_at > $3 \
             FOR UPDATE",
        )
        .bind(*booking.provider_id() as i64)
        .bind(booking.slot().end)
        .bind(booking.slot().start)
        .fetch_all(&mut **tx)
        .await
        .map_err(lock_error)?;
        if !conflicting.is_empty() {
            return Err(LedgerError::SlotConflict);
        }
        Ok(())
    }

    /// Re-derives the stored add-on subtotal by summing the current line
    /// rows from scratch, then keeps the internal-kind price and payout in
    /// step with it. Never an incremental adjustment.
    async fn aggregate(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: BookingId,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "UPDATE bookings \
             SET addon_subtotal = (SELECT COALESCE(SUM(price), 0) FROM addon_lines WHERE booking_id = $1), \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(*id as i64)
        .execute(&mut **tx)
        .await
        .map_err(DataAccessError::from)?;
        sqlx::query(
            "UPDATE bookings \
             SET price = service_price + addon_subtotal, \
                 provider_payout = service_price + addon_subtotal \
             WHERE id = $1 AND kind = 'internal'",
        )
        .bind(*id as i64)
        .execute(&mut **tx)
        .await
        .map_err(DataAccessError::from)?;
        Ok(())
    }

    async fn fetch(&self, id: BookingId) -> Result<Option<Booking>, DataAccessError> {
        let row: Option<BookingRow> = sqlx::query_as("SELECT * FROM bookings WHERE id = $1")
            .bind(*id as i64)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn hydrate(&self, row: BookingRow) -> Result<Booking, DataAccessError> {
        let lines: Vec<AddonLineRow> =
            sqlx::query_as("SELECT id, addon_id, price FROM addon_lines WHERE booking_id = $1")
                .bind(row.id)
                .fetch_all(&self.pool)
                .await?;
        row.into_booking(lines)
    }

    async fn fetch_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: BookingId,
    ) -> Result<Booking, LedgerError> {
        let row: Option<BookingRow> =
            sqlx::query_as("SELECT * FROM bookings WHERE id = $1 FOR UPDATE")
                .bind(*id as i64)
                .fetch_optional(&mut **tx)
                .await
                .map_err(lock_error)?;
        let row = row.ok_or(LedgerError::NotFound(*id))?;
        let lines: Vec<AddonLineRow> =
            sqlx::query_as("SELECT id, addon_id, price FROM addon_lines WHERE booking_id = $1")
                .bind(row.id)
                .fetch_all(&mut **tx)
                .await
                .map_err(DataAccessError::from)?;
        Ok(row.into_booking(lines)?)
    }
}

#[async_trait]
impl BookingLedger for PgBookingLedger {
    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, DataAccessError> {
        self.fetch(id).await
    }

    async fn find_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Booking>, DataAccessError> {
        let row: Option<BookingRow> =
            sqlx::query_as("SELECT * FROM bookings WHERE transaction_id = $1")
                .bind(transaction_id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn create(&self, booking: Booking) -> Result<Booking, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(DataAccessError::from)?;
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout_ms
        ))
        .execute(&mut *tx)
        .await
        .map_err(DataAccessError::from)?;

        self.guard(&mut tx, &booking).await?;

        let (client_id, guest_name, guest_email, guest_phone) = match booking.customer() {
            BookingCustomer::Registered { id } => (Some(**id as i64), None, None, None),
            BookingCustomer::Guest { name, email, phone } => (
                None,
                Some(name.clone()),
                Some(email.clone()),
                phone.clone(),
            ),
        };
        sqlx::query(
            "INSERT INTO bookings \
             (id, provider_id, service_id, kind, status, payment_status, \
              starts_at, ends_at, client_id, guest_name, guest_email, guest_phone, \
              currency, service_price, addon_subtotal, platform_fee, provider_payout, price, \
              transaction_id, notes, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
                     $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)",
        )
        .bind(*booking.id() as i64)
        .bind(*booking.provider_id() as i64)
        .bind(*booking.service_id() as i64)
        .bind(booking.kind().as_str())
        .bind(booking.status().as_str())
        .bind(booking.payment_status().as_str())
        .bind(booking.slot().start)
        .bind(booking.slot().end)
        .bind(client_id)
        .bind(guest_name)
        .bind(guest_email)
        .bind(guest_phone)
        .bind(booking.price().currency().as_str())
        .bind(booking.service_price().amount())
        .bind(booking.addon_subtotal().amount())
        .bind(booking.platform_fee().amount())
        .bind(booking.provider_payout().amount())
        .bind(booking.price().amount())
        .bind(booking.transaction_id())
        .bind(booking.notes())
        .bind(booking.created_at())
        .bind(booking.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(DataAccessError::from)?;

        for line in booking.lines() {
            sqlx::query(
                "INSERT INTO addon_lines (id, booking_id, addon_id, price) VALUES ($1, $2, $3, $4)",
            )
            .bind(*line.id() as i64)
            .bind(*booking.id() as i64)
            .bind(*line.addon_id() as i64)
            .bind(line.price().amount())
            .execute(&mut *tx)
            .await
            .map_err(DataAccessError::from)?;
        }
        self.aggregate(&mut tx, booking.id()).await?;

        tx.commit().await.map_err(DataAccessError::from)?;
        self.fetch(booking.id())
            .await?
            .ok_or(LedgerError::NotFound(*booking.id()))
    }

    async fn transition(
        &self,
        id: BookingId,
        status: BookingStatus,
    ) -> Result<Booking, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(DataAccessError::from)?;
        let mut booking = self.fetch_for_update(&mut tx, id).await?;
        booking.transition(status)?;
        sqlx::query("UPDATE bookings SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(*id as i64)
            .bind(booking.status().as_str())
            .bind(booking.updated_at())
            .execute(&mut *tx)
            .await
            .map_err(DataAccessError::from)?;
        tx.commit().await.map_err(DataAccessError::from)?;
        Ok(booking)
    }

    async fn set_payment_status(
        &self,
        id: BookingId,
        status: PaymentStatus,
    ) -> Result<Booking, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(DataAccessError::from)?;
        let mut booking = self.fetch_for_update(&mut tx, id).await?;
        booking.set_payment_status(status);
        sqlx::query("UPDATE bookings SET payment_status = $2, updated_at = $3 WHERE id = $1")
            .bind(*id as i64)
            .bind(booking.payment_status().as_str())
            .bind(booking.updated_at())
            .execute(&mut *tx)
            .await
            .map_err(DataAccessError::from)?;
        tx.commit().await.map_err(DataAccessError::from)?;
        Ok(booking)
    }

    async fn set_addon_lines(
        &self,
        id: BookingId,
        lines: Vec<AddonLine>,
    ) -> Result<Booking, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(DataAccessError::from)?;
        let mut booking = self.fetch_for_update(&mut tx, id).await?;
        booking.set_lines(lines)?;

        sqlx::query("DELETE FROM addon_lines WHERE booking_id = $1")
            .bind(*id as i64)
            .execute(&mut *tx)
            .await
            .map_err(DataAccessError::from)?;
        for line in booking.lines() {
            sqlx::query(
                "INSERT INTO addon_lines (id, booking_id, addon_id, price) VALUES ($1, $2, $3, $4)",
            )
            .bind(*line.id() as i64)
            .bind(*id as i64)
            .bind(*line.addon_id() as i64)
            .bind(line.price().amount())
            .execute(&mut *tx)
            .await
            .map_err(DataAccessError::from)?;
        }
        self.aggregate(&mut tx, id).await?;
        tx.commit().await.map_err(DataAccessError::from)?;
        self.fetch(id).await?.ok_or(LedgerError::NotFound(*id))
    }
}

/// Maps a lock wait timeout (Postgres 55P03) to a distinguishable error so
/// callers never mistake a timeout for a real slot conflict.
fn lock_error(e: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("55P03") {
            return LedgerError::LockTimeout;
        }
    }
    LedgerError::DataAccess(e.into())
}

/// FNV-1a over provider id and slot start, for the transaction-scoped
/// advisory lock key.
fn advisory_key(provider: ProviderId, start: DateTime<Utc>) -> i64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in (*provider)
        .to_be_bytes()
        .into_iter()
        .chain(start.timestamp().to_be_bytes())
    {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash as i64
}

#[derive(FromRow)]
struct BookingRow {
    id: i64,
    provider_id: i64,
    service_id: i64,
    kind: String,
    status: String,
    payment_status: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    client_id: Option<i64>,
    guest_name: Option<String>,
    guest_email: Option<String>,
    guest_phone: Option<String>,
    currency: String,
    service_price: i64,
    addon_subtotal: i64,
    platform_fee: i64,
    provider_payout: i64,
    price: i64,
    transaction_id: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct AddonLineRow {
    id: i64,
    addon_id: i64,
    price: i64,
}

impl BookingRow {
    fn into_booking(self, lines: Vec<AddonLineRow>) -> Result<Booking, DataAccessError> {
        let currency = self
            .currency
            .parse::<Currency>()
            .map_err(|e| DataAccessError::ReadError(Box::new(e)))?;
        let status = self
            .status
            .parse::<BookingStatus>()
            .map_err(|e| DataAccessError::ReadError(Box::new(e)))?;
        let payment_status = self
            .payment_status
            .parse::<PaymentStatus>()
            .map_err(|e| DataAccessError::ReadError(Box::new(e)))?;
        let kind = match self.kind.as_str() {
            "paid" => BookingKind::Paid {
                fee_charged: Money::new(self.price, currency),
                split: FeeSplit::from_parts(
                    Money::new(self.provider_payout, currency),
                    Money::new(self.platform_fee, currency),
                ),
            },
            "internal" => BookingKind::Internal,
            "manual" => BookingKind::Manual {
                price: Money::new(self.price, currency),
                platform_fee: Money::new(self.platform_fee, currency),
                provider_payout: Money::new(self.provider_payout, currency),
            },
            other => {
                return Err(DataAccessError::ReadError(
                    format!("unknown booking kind: {other}").into(),
                ))
            }
        };
        let customer = match self.client_id {
            Some(id) => BookingCustomer::Registered {
                id: ClientId::from(id as u64),
            },
            None => BookingCustomer::Guest {
                name: self.guest_name.unwrap_or_default(),
                email: self.guest_email.unwrap_or_default(),
                phone: self.guest_phone,
            },
        };
        let lines = lines
            .into_iter()
            .map(|l| {
                AddonLine::restore(
                    AddonLineId::from(l.id as u64),
                    AddonId::from(l.addon_id as u64),
                    Money::new(l.price, currency),
                )
            })
            .collect();
        Booking::restore(
            BookingId::from(self.id as u64),
            ProviderId::from(self.provider_id as u64),
            ServiceId::from(self.service_id as u64),
            kind,
            status,
            payment_status,
            self.starts_at..self.ends_at,
            customer,
            Money::new(self.service_price, currency),
            Money::new(self.addon_subtotal, currency),
            Money::new(self.platform_fee, currency),
            Money::new(self.provider_payout, currency),
            Money::new(self.price, currency),
            self.transaction_id,
            self.notes,
            lines,
            self.created_at,
            self.updated_at,
        )
        .map_err(|e| DataAccessError::ReadError(Box::new(e)))
    }
}

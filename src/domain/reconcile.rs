use thiserror::Error;
use tracing::{info, warn};

use crate::domain::core::{
    verify_signature, AddonLine, AddonLineId, AddonRepository, Booking, BookingId, BookingKind,
    BookingLedger, BookingStatus, FeeConfig, FeeSplit, GatewayEvent, GatewayEventKind, LedgerError,
    PaymentError, PaymentRecord, PaymentRecordId, PaymentRecords, PaymentStatus,
    ProviderRepository, ServiceRepository,
};
use crate::domain::{DataAccessError, Entity, ID_GENERATOR};

/// Turns at-least-once webhook deliveries from the payment gateway into
/// exactly-once booking state. Duplicate deliveries are successful no-ops;
/// out-of-order deliveries resolve to last-write-wins on status without ever
/// repeating the creation side effect.
pub struct PaymentReconciler<L, P, C> {
    ledger: L,
    payments: P,
    catalog: C,
    fees: FeeConfig,
    secret: String,
}

#[derive(Debug)]
pub enum ReconcileOutcome {
    /// First delivery of a settlement: the booking was created.
    Created(Booking),
    /// Redelivery of an already-processed settlement. Indistinguishable in
    /// effect from the first successful call.
    Duplicate(Booking),
    /// An existing booking changed status (failure, expiry, refund).
    Updated(Booking),
    /// Nothing to do for this event.
    Ignored,
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    DataAccess(#[from] DataAccessError),
}

impl<L, P, C> PaymentReconciler<L, P, C>
where
    L: BookingLedger + Send + Sync,
    P: PaymentRecords + Send + Sync,
    C: ProviderRepository + ServiceRepository + AddonRepository + Send + Sync,
{
    pub fn new(ledger: L, payments: P, catalog: C, fees: FeeConfig, secret: String) -> Self {
        Self {
            ledger,
            payments,
            catalog,
            fees,
            secret,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn payments(&self) -> &P {
        &self.payments
    }

    /// Entry point for one webhook delivery: verify authenticity, parse,
    /// dispatch. Unverifiable events are rejected before anything is read
    /// out of them.
    pub async fn handle(
        &self,
        body: &[u8],
        signature: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if let Err(e) = verify_signature(&self.secret, body, signature) {
            warn!("rejected webhook with unverifiable signature");
            return Err(e.into());
        }
        let event = GatewayEvent::parse(body)?;
        match event.kind {
            GatewayEventKind::SettlementSucceeded => self.on_settlement_succeeded(event).await,
            GatewayEventKind::SettlementFailed | GatewayEventKind::CheckoutExpired => {
                self.on_settlement_abandoned(event).await
            }
            GatewayEventKind::RefundIssued => self.on_refund_issued(event).await,
            GatewayEventKind::AccountStatusChanged => {
                info!(
                    transaction_id = %event.transaction_id,
                    "connected account status changed; no ledger effect"
                );
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    async fn on_settlement_succeeded(
        &self,
        event: GatewayEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if let Some(existing) = self.ledger.find_by_transaction(&event.transaction_id).await? {
            // Duplicate delivery. Commercial fields were computed on the
            // first pass and stay untouched; only status may advance.
            let booking = if existing.status() == BookingStatus::Pending {
                self.ledger
                    .transition(existing.id(), BookingStatus::Confirmed)
                    .await?
            } else {
                existing
            };
            let booking = if booking.payment_status() == PaymentStatus::Pending {
                self.ledger
                    .set_payment_status(booking.id(), PaymentStatus::Succeeded)
                    .await?
            } else {
                booking
            };
            self.record_settlement(&event, &booking).await?;
            info!(transaction_id = %event.transaction_id, "duplicate settlement delivery");
            return Ok(ReconcileOutcome::Duplicate(booking));
        }

        let meta = crate::domain::core::SettlementMetadata::from_event(&event)?;
        let provider = ProviderRepository::find_by_id(&self.catalog, meta.provider_id)
            .await?
            .ok_or(LedgerError::Referential {
                entity: crate::domain::core::Provider::ENTITY_NAME,
                id: *meta.provider_id,
            })?;
        let service = ServiceRepository::find_by_id(&self.catalog, meta.service_id)
            .await?
            .filter(|s| s.provider_id() == provider.id())
            .ok_or(LedgerError::Referential {
                entity: crate::domain::core::Service::ENTITY_NAME,
                id: *meta.service_id,
            })?;
        let mut lines = Vec::with_capacity(meta.addon_ids.len());
        for addon_id in &meta.addon_ids {
            let addon = AddonRepository::find_by_id(&self.catalog, *addon_id)
                .await?
                .filter(|a| a.provider_id() == provider.id())
                .ok_or(LedgerError::Referential {
                    entity: crate::domain::core::Addon::ENTITY_NAME,
                    id: **addon_id,
                })?;
            lines.push(AddonLine::snapshot(
                ID_GENERATOR.generate::<AddonLineId>(),
                &addon,
            ));
        }

        let split = FeeSplit::compute(&self.fees, provider.zero_fee());
        let mut booking = Booking::create(
            ID_GENERATOR.generate::<BookingId>(),
            provider.id(),
            service.id(),
            BookingKind::Paid {
                fee_charged: event.amount_money(),
                split,
            },
            meta.slot_start..meta.slot_start + service.duration(),
            meta.customer.clone(),
            service.price(),
            Some(event.transaction_id.clone()),
            None,
        )
        .map_err(LedgerError::Validation)?;
        for line in lines {
            booking.add_line(line).map_err(LedgerError::Validation)?;
        }

        // The guard runs inside create: a settlement can race a direct
        // booking attempt for the same slot.
        let created = self.ledger.create(booking).await?;
        let confirmed = self
            .ledger
            .transition(created.id(), BookingStatus::Confirmed)
            .await?;
        let booking = self
            .ledger
            .set_payment_status(confirmed.id(), PaymentStatus::Succeeded)
            .await?;
        self.record_settlement(&event, &booking).await?;
        info!(
            transaction_id = %event.transaction_id,
            booking_id = %booking.id(),
            "settlement created booking"
        );
        Ok(ReconcileOutcome::Created(booking))
    }

    async fn on_settlement_abandoned(
        &self,
        event: GatewayEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match self.ledger.find_by_transaction(&event.transaction_id).await? {
            Some(booking) if booking.status() == BookingStatus::Pending => {
                let booking = self
                    .ledger
                    .transition(booking.id(), BookingStatus::Failed)
                    .await?;
                let booking = self
                    .ledger
                    .set_payment_status(booking.id(), PaymentStatus::Failed)
                    .await?;
                Ok(ReconcileOutcome::Updated(booking))
            }
            _ => Ok(ReconcileOutcome::Ignored),
        }
    }

    async fn on_refund_issued(
        &self,
        event: GatewayEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(booking) = self.ledger.find_by_transaction(&event.transaction_id).await? else {
            warn!(transaction_id = %event.transaction_id, "refund for unknown transaction");
            return Ok(ReconcileOutcome::Ignored);
        };
        let refund_tx = event
            .refund_id
            .clone()
            .unwrap_or_else(|| format!("{}.refund", event.transaction_id));
        if self.payments.find_by_transaction(&refund_tx).await?.is_some() {
            // Redelivery: the audit row exists and the status change already
            // happened on the first pass.
            info!(transaction_id = %refund_tx, "duplicate refund delivery");
            return Ok(ReconcileOutcome::Duplicate(booking));
        }
        let full = event.amount >= booking.price().amount();
        let (booking_status, payment_status) = if full {
            (BookingStatus::Refunded, PaymentStatus::Refunded)
        } else {
            (BookingStatus::PartiallyRefunded, PaymentStatus::PartiallyRefunded)
        };
        let booking = self.ledger.transition(booking.id(), booking_status).await?;
        let booking = self
            .ledger
            .set_payment_status(booking.id(), payment_status)
            .await?;
        let record = PaymentRecord::refund(
            ID_GENERATOR.generate::<PaymentRecordId>(),
            refund_tx,
            event.amount_money(),
            payment_status,
            booking.id(),
        )?;
        self.payments.insert(record).await?;
        Ok(ReconcileOutcome::Updated(booking))
    }

    async fn record_settlement(
        &self,
        event: &GatewayEvent,
        booking: &Booking,
    ) -> Result<(), ReconcileError> {
        let record = PaymentRecord::create(
            ID_GENERATOR.generate::<PaymentRecordId>(),
            event.transaction_id.clone(),
            event.amount_money(),
            PaymentStatus::Succeeded,
            booking.id(),
        )?;
        // Duplicate key means the first delivery already recorded it.
        self.payments.insert(record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::core::{
        sign, Addon, AddonId, BookingCustomer, Calendar, Currency, InsertOutcome, Money, Provider,
        ProviderId, Service, ServiceId,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MemoryLedger {
        bookings: Mutex<Vec<Booking>>,
    }

    impl MemoryLedger {
        fn with(
            &self,
            id: BookingId,
            f: impl FnOnce(&mut Booking) -> Result<(), LedgerError>,
        ) -> Result<Booking, LedgerError> {
            let mut bookings = self.bookings.lock().unwrap();
            let booking = bookings
                .iter_mut()
                .find(|b| b.id() == id)
                .ok_or(LedgerError::NotFound(*id))?;
            f(booking)?;
            Ok(booking.clone())
        }
    }

    #[async_trait]
    impl BookingLedger for MemoryLedger {
        async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, DataAccessError> {
            Ok(self
                .bookings
                .lock()
                .unwrap()
                .iter()
                .find(|b| b.id() == id)
                .cloned())
        }

        async fn find_by_transaction(
            &self,
            transaction_id: &str,
        ) -> Result<Option<Booking>, DataAccessError> {
            Ok(self
                .bookings
                .lock()
                .unwrap()
                .iter()
                .find(|b| b.transaction_id() == Some(transaction_id))
                .cloned())
        }

        async fn create(&self, booking: Booking) -> Result<Booking, LedgerError> {
            let mut bookings = self.bookings.lock().unwrap();
            let provider = booking.provider_id();
            let calendar = Calendar::new(bookings.iter().filter(|b| b.provider_id() == provider));
            if calendar.conflict_with(booking.slot()).is_some() {
                return Err(LedgerError::SlotConflict);
            }
            bookings.push(booking.clone());
            Ok(booking)
        }

        async fn transition(
            &self,
            id: BookingId,
            status: BookingStatus,
        ) -> Result<Booking, LedgerError> {
            self.with(id, |b| b.transition(status).map_err(LedgerError::Validation))
        }

        async fn set_payment_status(
            &self,
            id: BookingId,
            status: PaymentStatus,
        ) -> Result<Booking, LedgerError> {
            self.with(id, |b| {
                b.set_payment_status(status);
                Ok(())
            })
        }

        async fn set_addon_lines(
            &self,
            id: BookingId,
            lines: Vec<AddonLine>,
        ) -> Result<Booking, LedgerError> {
            self.with(id, |b| b.set_lines(lines).map_err(LedgerError::Validation))
        }
    }

    #[derive(Default)]
    struct MemoryPayments {
        records: Mutex<Vec<PaymentRecord>>,
    }

    #[async_trait]
    impl PaymentRecords for MemoryPayments {
        async fn insert(&self, record: PaymentRecord) -> Result<InsertOutcome, DataAccessError> {
            let mut records = self.records.lock().unwrap();
            if records
                .iter()
                .any(|r| r.transaction_id() == record.transaction_id())
            {
                return Ok(InsertOutcome::AlreadyRecorded);
            }
            records.push(record);
            Ok(InsertOutcome::Inserted)
        }

        async fn find_by_transaction(
            &self,
            transaction_id: &str,
        ) -> Result<Option<PaymentRecord>, DataAccessError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.transaction_id() == transaction_id)
                .cloned())
        }
    }

    struct MemoryCatalog {
        providers: Vec<Provider>,
        services: Vec<Service>,
        addons: Vec<Addon>,
    }

    #[async_trait]
    impl ProviderRepository for MemoryCatalog {
        async fn find_by_id(&self, id: ProviderId) -> Result<Option<Provider>, DataAccessError> {
            Ok(self.providers.iter().find(|p| p.id() == id).cloned())
        }
    }

    #[async_trait]
    impl ServiceRepository for MemoryCatalog {
        async fn find_by_id(&self, id: ServiceId) -> Result<Option<Service>, DataAccessError> {
            Ok(self.services.iter().find(|s| s.id() == id).cloned())
        }
    }

    #[async_trait]
    impl AddonRepository for MemoryCatalog {
        async fn find_by_id(&self, id: AddonId) -> Result<Option<Addon>, DataAccessError> {
            Ok(self.addons.iter().find(|a| a.id() == id).cloned())
        }
    }

    const SECRET: &str = "whsec_test";

    fn catalog(zero_fee: bool) -> MemoryCatalog {
        let provider =
            Provider::create(ProviderId::from(7), "Studio Seven".to_owned(), zero_fee).unwrap();
        let service = Service::create(
            ServiceId::from(1),
            provider.id(),
            "Portrait session".to_owned(),
            Money::new(5000, Currency::USD),
            30,
        )
        .unwrap();
        let addon = Addon::create(
            AddonId::from(100),
            provider.id(),
            "Extra prints".to_owned(),
            Money::new(700, Currency::USD),
        )
        .unwrap();
        MemoryCatalog {
            providers: vec![provider],
            services: vec![service],
            addons: vec![addon],
        }
    }

    fn reconciler(
        zero_fee: bool,
    ) -> PaymentReconciler<MemoryLedger, MemoryPayments, MemoryCatalog> {
        let fees = FeeConfig::new(
            Money::new(338, Currency::USD),
            Money::new(38, Currency::USD),
            40,
        )
        .unwrap();
        PaymentReconciler::new(
            MemoryLedger::default(),
            MemoryPayments::default(),
            catalog(zero_fee),
            fees,
            SECRET.to_owned(),
        )
    }

    fn settlement_body(transaction_id: &str, slot_start: &str) -> Vec<u8> {
        serde_json::json!({
            "type": "settlement_succeeded",
            "transaction_id": transaction_id,
            "amount": "338",
            "currency": "usd",
            "metadata": {
                "provider_id": "7",
                "service_id": "1",
                "slot_start": slot_start,
                "addon_ids": "100",
                "guest_name": "Ada",
                "guest_email": "ada@example.com"
            }
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_settlement_creates_confirmed_booking() {
        let reconciler = reconciler(false);
        let body = settlement_body("tx_1", "2024-06-01T10:00:00Z");
        let outcome = reconciler.handle(&body, &sign(SECRET, &body)).await.unwrap();

        let ReconcileOutcome::Created(booking) = outcome else {
            panic!("expected creation");
        };
        assert_eq!(booking.status(), BookingStatus::Confirmed);
        assert_eq!(booking.payment_status(), PaymentStatus::Succeeded);
        assert_eq!(booking.price(), Money::new(338, Currency::USD));
        assert_eq!(booking.platform_fee(), Money::new(180, Currency::USD));
        assert_eq!(booking.provider_payout(), Money::new(120, Currency::USD));
        assert_eq!(booking.addon_subtotal(), Money::new(700, Currency::USD));

        let record = reconciler
            .payments()
            .find_by_transaction("tx_1")
            .await
            .unwrap()
            .expect("payment record");
        assert_eq!(record.amount(), Money::new(338, Currency::USD));
    }

    #[tokio::test]
    async fn test_duplicate_settlement_is_idempotent() {
        let reconciler = reconciler(false);
        let body = settlement_body("tx_1", "2024-06-01T10:00:00Z");
        let signature = sign(SECRET, &body);

        let first = reconciler.handle(&body, &signature).await.unwrap();
        let ReconcileOutcome::Created(created) = first else {
            panic!("expected creation");
        };
        let second = reconciler.handle(&body, &signature).await.unwrap();
        let ReconcileOutcome::Duplicate(redelivered) = second else {
            panic!("expected duplicate outcome");
        };

        // exactly one booking, commercial fields unmodified
        assert_eq!(redelivered.id(), created.id());
        assert_eq!(redelivered.price(), created.price());
        assert_eq!(redelivered.platform_fee(), created.platform_fee());
        assert_eq!(redelivered.provider_payout(), created.provider_payout());
        assert_eq!(reconciler.payments().records.lock().unwrap().len(), 1);
        assert_eq!(reconciler.ledger().bookings.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unverifiable_signature_has_no_side_effects() {
        let reconciler = reconciler(false);
        let body = settlement_body("tx_1", "2024-06-01T10:00:00Z");
        let err = reconciler.handle(&body, &sign("wrong", &body)).await;
        assert!(matches!(
            err,
            Err(ReconcileError::Payment(PaymentError::Unverifiable))
        ));
        assert!(reconciler.ledger().bookings.lock().unwrap().is_empty());
        assert!(reconciler.payments().records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_metadata_creates_nothing() {
        let reconciler = reconciler(false);
        let body = serde_json::json!({
            "type": "settlement_succeeded",
            "transaction_id": "tx_1",
            "amount": "338",
            "currency": "usd",
            "metadata": { "provider_id": "7" }
        })
        .to_string()
        .into_bytes();
        let err = reconciler.handle(&body, &sign(SECRET, &body)).await;
        assert!(matches!(err, Err(ReconcileError::Payment(_))));
        assert!(reconciler.ledger().bookings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_provider_is_referential() {
        let reconciler = reconciler(false);
        let body = serde_json::json!({
            "type": "settlement_succeeded",
            "transaction_id": "tx_1",
            "amount": "338",
            "currency": "usd",
            "metadata": {
                "provider_id": "999",
                "service_id": "1",
                "slot_start": "2024-06-01T10:00:00Z",
                "guest_name": "Ada",
                "guest_email": "ada@example.com"
            }
        })
        .to_string()
        .into_bytes();
        let err = reconciler.handle(&body, &sign(SECRET, &body)).await;
        assert!(matches!(
            err,
            Err(ReconcileError::Ledger(LedgerError::Referential { .. }))
        ));
    }

    #[tokio::test]
    async fn test_settlement_races_existing_booking() {
        let reconciler = reconciler(false);
        let body = settlement_body("tx_1", "2024-06-01T10:00:00Z");
        reconciler
            .handle(&body, &sign(SECRET, &body))
            .await
            .unwrap();

        // a different transaction for the same slot loses to the guard
        let body = settlement_body("tx_2", "2024-06-01T10:00:00Z");
        let err = reconciler.handle(&body, &sign(SECRET, &body)).await;
        assert!(matches!(
            err,
            Err(ReconcileError::Ledger(LedgerError::SlotConflict))
        ));
    }

    #[tokio::test]
    async fn test_refund_full_and_partial() {
        let reconciler = reconciler(false);
        let body = settlement_body("tx_1", "2024-06-01T10:00:00Z");
        reconciler
            .handle(&body, &sign(SECRET, &body))
            .await
            .unwrap();

        let partial = serde_json::json!({
            "type": "refund_issued",
            "transaction_id": "tx_1",
            "amount": "100",
            "currency": "usd",
            "refund_id": "re_1"
        })
        .to_string()
        .into_bytes();
        let outcome = reconciler
            .handle(&partial, &sign(SECRET, &partial))
            .await
            .unwrap();
        let ReconcileOutcome::Updated(booking) = outcome else {
            panic!("expected update");
        };
        assert_eq!(booking.status(), BookingStatus::PartiallyRefunded);

        let full = serde_json::json!({
            "type": "refund_issued",
            "transaction_id": "tx_1",
            "amount": "338",
            "currency": "usd",
            "refund_id": "re_2"
        })
        .to_string()
        .into_bytes();
        let outcome = reconciler
            .handle(&full, &sign(SECRET, &full))
            .await
            .unwrap();
        let ReconcileOutcome::Updated(booking) = outcome else {
            panic!("expected update");
        };
        assert_eq!(booking.status(), BookingStatus::Refunded);
        assert_eq!(booking.payment_status(), PaymentStatus::Refunded);

        // negative audit rows for both refunds
        let re_1 = reconciler
            .payments()
            .find_by_transaction("re_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(re_1.amount(), Money::new(-100, Currency::USD));
        let re_2 = reconciler
            .payments()
            .find_by_transaction("re_2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(re_2.amount(), Money::new(-338, Currency::USD));
    }

    #[tokio::test]
    async fn test_redelivered_refund_is_a_no_op() {
        let reconciler = reconciler(false);
        let body = settlement_body("tx_1", "2024-06-01T10:00:00Z");
        reconciler
            .handle(&body, &sign(SECRET, &body))
            .await
            .unwrap();

        let refund = serde_json::json!({
            "type": "refund_issued",
            "transaction_id": "tx_1",
            "amount": "338",
            "currency": "usd",
            "refund_id": "re_1"
        })
        .to_string()
        .into_bytes();
        let signature = sign(SECRET, &refund);
        reconciler.handle(&refund, &signature).await.unwrap();

        // the gateway retries the same refund delivery
        let outcome = reconciler.handle(&refund, &signature).await.unwrap();
        let ReconcileOutcome::Duplicate(booking) = outcome else {
            panic!("expected duplicate outcome");
        };
        assert_eq!(booking.status(), BookingStatus::Refunded);
        // one settlement row plus one refund row, nothing added by the retry
        assert_eq!(reconciler.payments().records.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_checkout_fails_pending_booking() {
        let reconciler = reconciler(false);
        // a pending paid booking sits in the ledger, settlement never came
        let fees = FeeConfig::new(
            Money::new(338, Currency::USD),
            Money::new(38, Currency::USD),
            40,
        )
        .unwrap();
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let booking = Booking::create(
            BookingId::from(1),
            ProviderId::from(7),
            ServiceId::from(1),
            BookingKind::Paid {
                fee_charged: Money::new(338, Currency::USD),
                split: FeeSplit::compute(&fees, false),
            },
            start..start + Duration::minutes(30),
            BookingCustomer::Registered {
                id: crate::domain::core::ClientId::from(9),
            },
            Money::new(5000, Currency::USD),
            Some("tx_9".to_owned()),
            None,
        )
        .unwrap();
        reconciler.ledger().create(booking).await.unwrap();

        let body = serde_json::json!({
            "type": "checkout_expired",
            "transaction_id": "tx_9",
            "amount": "0",
            "currency": "usd"
        })
        .to_string()
        .into_bytes();
        let outcome = reconciler
            .handle(&body, &sign(SECRET, &body))
            .await
            .unwrap();
        let ReconcileOutcome::Updated(booking) = outcome else {
            panic!("expected update");
        };
        assert_eq!(booking.status(), BookingStatus::Failed);
        assert_eq!(booking.payment_status(), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_zero_fee_settlement_pays_out_nothing_from_fee() {
        let reconciler = reconciler(true);
        let body = settlement_body("tx_1", "2024-06-01T10:00:00Z");
        let outcome = reconciler
            .handle(&body, &sign(SECRET, &body))
            .await
            .unwrap();
        let ReconcileOutcome::Created(booking) = outcome else {
            panic!("expected creation");
        };
        assert!(booking.platform_fee().is_zero());
        assert!(booking.provider_payout().is_zero());
    }

    #[tokio::test]
    async fn test_concurrent_creation_admits_exactly_one() {
        let ledger = Arc::new(MemoryLedger::default());
        let start: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

        let mut handles = Vec::new();
        for i in 0..2u64 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                let booking = Booking::create(
                    BookingId::from(i + 1),
                    ProviderId::from(7),
                    ServiceId::from(1),
                    BookingKind::Internal,
                    start..start + Duration::minutes(30),
                    BookingCustomer::Guest {
                        name: "Ada".to_owned(),
                        email: "ada@example.com".to_owned(),
                        phone: None,
                    },
                    Money::new(5000, Currency::USD),
                    None,
                    None,
                )
                .unwrap();
                ledger.create(booking).await
            }));
        }

        let mut admitted = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(LedgerError::SlotConflict) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(conflicts, 1);
        assert_eq!(ledger.bookings.lock().unwrap().len(), 1);
    }
}

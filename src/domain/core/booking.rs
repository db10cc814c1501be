use std::ops::Range;
use std::str::FromStr;

use async_trait::async_trait;
use bio::data_structures::interval_tree::IntervalTree;
use chrono::{DateTime, Utc};
use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DataAccessError, Entity, Id};

use super::{Addon, FeeSplit, Money};

/// The authoritative booking write path. Every creation passes through the
/// slot conflict guard inside one transaction; every status change goes
/// through the domain state machine.
#[async_trait]
pub trait BookingLedger {
    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, DataAccessError>;
    /// Lookup by the originating gateway transaction id, the idempotency key
    /// of the paid path.
    async fn find_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Booking>, DataAccessError>;
    /// Admits the booking through the conflict guard and persists it together
    /// with its add-on lines, atomically.
    async fn create(&self, booking: Booking) -> Result<Booking, LedgerError>;
    async fn transition(&self, id: BookingId, status: BookingStatus)
        -> Result<Booking, LedgerError>;
    async fn set_payment_status(
        &self,
        id: BookingId,
        status: PaymentStatus,
    ) -> Result<Booking, LedgerError>;
    /// Replaces the booking's add-on lines and recomputes the stored subtotal
    /// from scratch.
    async fn set_addon_lines(
        &self,
        id: BookingId,
        lines: Vec<AddonLine>,
    ) -> Result<Booking, LedgerError>;
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(#[from] BookingError),
    #[error("Requested slot overlaps an existing booking")]
    SlotConflict,
    #[error("{entity} {id} does not exist")]
    Referential { entity: &'static str, id: u64 },
    #[error("Timed out waiting for a conflicting booking lock")]
    LockTimeout,
    #[error("Booking {0} does not exist")]
    NotFound(u64),
    #[error(transparent)]
    DataAccess(#[from] DataAccessError),
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, From, Deref, Default, Hash,
)]
pub struct BookingId(u64);

impl Id for BookingId {
    type Inner = u64;
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, From, Deref, Default, Hash,
)]
pub struct ClientId(u64);

impl Id for ClientId {
    type Inner = u64;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Failed,
    Cancelled,
    Missed,
    Refunded,
    PartiallyRefunded,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Failed => "failed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Missed => "missed",
            BookingStatus::Refunded => "refunded",
            BookingStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Refunded
        )
    }
}

impl FromStr for BookingStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "failed" => Ok(BookingStatus::Failed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "missed" => Ok(BookingStatus::Missed),
            "refunded" => Ok(BookingStatus::Refunded),
            "partially_refunded" => Ok(BookingStatus::PartiallyRefunded),
            _ => Err(BookingError::UnknownStatus),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
    PartiallyRefunded,
    Manual,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
            PaymentStatus::Manual => "manual",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            "partially_refunded" => Ok(PaymentStatus::PartiallyRefunded),
            "manual" => Ok(PaymentStatus::Manual),
            _ => Err(BookingError::UnknownStatus),
        }
    }
}

/// Who the slot is reserved for. Exactly one identity path is populated;
/// anonymous bookings are not representable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingCustomer {
    Registered {
        id: ClientId,
    },
    Guest {
        name: String,
        email: String,
        phone: Option<String>,
    },
}

impl BookingCustomer {
    fn validate(&self) -> Result<(), BookingError> {
        match self {
            BookingCustomer::Registered { .. } => Ok(()),
            BookingCustomer::Guest { name, email, .. } => {
                if name.trim().is_empty() {
                    return Err(BookingError::GuestNameRequired);
                }
                if email.trim().is_empty() {
                    return Err(BookingError::GuestEmailRequired);
                }
                Ok(())
            }
        }
    }
}

/// The three creation paths populate a booking differently, and the meaning
/// of the top-level `price` depends on which one ran. That divergence is
/// intentional; each variant carries its own pricing policy so the contract
/// is visible at the type level instead of in scattered flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingKind {
    /// Customer paid the flat platform fee through the gateway. `price` is
    /// the fee charged; the split divides the fee net of gateway cost.
    Paid { fee_charged: Money, split: FeeSplit },
    /// Internal/no-fee account. `price` is service price plus add-on
    /// subtotal and the provider is paid out in full.
    Internal,
    /// Administrative entry. All commercial fields are caller-supplied.
    Manual {
        price: Money,
        platform_fee: Money,
        provider_payout: Money,
    },
}

impl BookingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingKind::Paid { .. } => "paid",
            BookingKind::Internal => "internal",
            BookingKind::Manual { .. } => "manual",
        }
    }
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, From, Deref, Default, Hash,
)]
pub struct AddonLineId(u64);

impl Id for AddonLineId {
    type Inner = u64;
}

/// A child line item holding an immutable copy of the add-on's price at
/// booking time, never a live reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonLine {
    id: AddonLineId,
    addon_id: super::AddonId,
    price: Money,
}

impl AddonLine {
    pub fn snapshot(id: AddonLineId, addon: &Addon) -> Self {
        Self {
            id,
            addon_id: addon.id(),
            price: addon.price(),
        }
    }

    pub fn restore(id: AddonLineId, addon_id: super::AddonId, price: Money) -> Self {
        Self {
            id,
            addon_id,
            price,
        }
    }

    pub fn addon_id(&self) -> super::AddonId {
        self.addon_id
    }

    pub fn price(&self) -> Money {
        self.price
    }
}

impl Entity for AddonLine {
    type Id = AddonLineId;

    const ENTITY_NAME: &'static str = "addon_line";

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// One reservation of a provider's time. Never physically deleted; a
/// booking leaves the calendar only by transitioning to `cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    id: BookingId,
    provider_id: super::ProviderId,
    service_id: super::ServiceId,
    kind: BookingKind,
    status: BookingStatus,
    payment_status: PaymentStatus,
    slot: Range<DateTime<Utc>>,
    customer: BookingCustomer,
    service_price: Money,
    addon_subtotal: Money,
    platform_fee: Money,
    provider_payout: Money,
    price: Money,
    transaction_id: Option<String>,
    notes: Option<String>,
    lines: Vec<AddonLine>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Booking {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        id: BookingId,
        provider_id: super::ProviderId,
        service_id: super::ServiceId,
        kind: BookingKind,
        slot: Range<DateTime<Utc>>,
        customer: BookingCustomer,
        service_price: Money,
        transaction_id: Option<String>,
        notes: Option<String>,
    ) -> Result<Self, BookingError> {
        Self::validate_slot(&slot)?;
        customer.validate()?;
        let currency = service_price.currency();
        let zero = Money::zero(currency);
        let (status, payment_status, price, platform_fee, provider_payout) = match &kind {
            BookingKind::Paid { fee_charged, split } => {
                let transaction_id = transaction_id.as_deref().unwrap_or("");
                if transaction_id.trim().is_empty() {
                    return Err(BookingError::TransactionIdRequired);
                }
                let shares = split
                    .gross_provider_share()
                    .checked_add(&split.net_platform_share())
                    .ok_or(BookingError::CurrencyMismatch)?;
                if shares.currency() != fee_charged.currency()
                    || fee_charged.currency() != currency
                {
                    return Err(BookingError::CurrencyMismatch);
                }
                // The remainder of the fee over the two shares is the gateway
                // cost; a negative remainder means the split was computed for
                // a larger fee than was actually charged.
                if shares.amount() > fee_charged.amount() {
                    return Err(BookingError::FeeMismatch);
                }
                (
                    BookingStatus::Pending,
                    PaymentStatus::Pending,
                    *fee_charged,
                    split.net_platform_share(),
                    split.gross_provider_share(),
                )
            }
            BookingKind::Internal => (
                BookingStatus::Confirmed,
                PaymentStatus::Manual,
                service_price,
                zero,
                service_price,
            ),
            BookingKind::Manual {
                price,
                platform_fee,
                provider_payout,
            } => (
                BookingStatus::Confirmed,
                PaymentStatus::Manual,
                *price,
                *platform_fee,
                *provider_payout,
            ),
        };
        let now = Utc::now();
        Ok(Self {
            id,
            provider_id,
            service_id,
            kind,
            status,
            payment_status,
            slot,
            customer,
            service_price,
            addon_subtotal: zero,
            platform_fee,
            provider_payout,
            price,
            transaction_id,
            notes,
            lines: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuilds a booking from stored state. Trusts the store for commercial
    /// fields but still refuses rows that violate the slot invariant.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: BookingId,
        provider_id: super::ProviderId,
        service_id: super::ServiceId,
        kind: BookingKind,
        status: BookingStatus,
        payment_status: PaymentStatus,
        slot: Range<DateTime<Utc>>,
        customer: BookingCustomer,
        service_price: Money,
        addon_subtotal: Money,
        platform_fee: Money,
        provider_payout: Money,
        price: Money,
        transaction_id: Option<String>,
        notes: Option<String>,
        lines: Vec<AddonLine>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, BookingError> {
        Self::validate_slot(&slot)?;
        Ok(Self {
            id,
            provider_id,
            service_id,
            kind,
            status,
            payment_status,
            slot,
            customer,
            service_price,
            addon_subtotal,
            platform_fee,
            provider_payout,
            price,
            transaction_id,
            notes,
            lines,
            created_at,
            updated_at,
        })
    }

    pub fn provider_id(&self) -> super::ProviderId {
        self.provider_id
    }

    pub fn service_id(&self) -> super::ServiceId {
        self.service_id
    }

    pub fn kind(&self) -> &BookingKind {
        &self.kind
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn slot(&self) -> &Range<DateTime<Utc>> {
        &self.slot
    }

    pub fn customer(&self) -> &BookingCustomer {
        &self.customer
    }

    pub fn service_price(&self) -> Money {
        self.service_price
    }

    pub fn addon_subtotal(&self) -> Money {
        self.addon_subtotal
    }

    pub fn platform_fee(&self) -> Money {
        self.platform_fee
    }

    pub fn provider_payout(&self) -> Money {
        self.provider_payout
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn lines(&self) -> &[AddonLine] {
        &self.lines
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// A confirmed booking whose start has passed without completion.
    pub fn is_missable(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Confirmed && self.slot.start < now
    }

    pub fn transition(&mut self, next: BookingStatus) -> Result<(), BookingError> {
        self.validate_transition(next)?;
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn set_payment_status(&mut self, status: PaymentStatus) {
        self.payment_status = status;
        self.touch();
    }

    pub fn add_line(&mut self, line: AddonLine) -> Result<(), BookingError> {
        self.validate_mutable()?;
        if self.lines.iter().any(|l| l.id() == line.id()) {
            return Err(BookingError::DuplicateLine);
        }
        if line.price().currency() != self.service_price.currency() {
            return Err(BookingError::CurrencyMismatch);
        }
        self.lines.push(line);
        self.recompute_addon_subtotal()
    }

    pub fn remove_line(&mut self, line_id: AddonLineId) -> Result<(), BookingError> {
        self.validate_mutable()?;
        if !self.lines.iter().any(|l| l.id() == line_id) {
            return Err(BookingError::LineNotFound);
        }
        self.lines.retain(|l| l.id() != line_id);
        self.recompute_addon_subtotal()
    }

    pub fn set_lines(&mut self, lines: Vec<AddonLine>) -> Result<(), BookingError> {
        self.validate_mutable()?;
        self.lines.clear();
        for line in lines {
            self.add_line(line)?;
        }
        self.recompute_addon_subtotal()
    }

    /// Re-derives the add-on subtotal by summing the current lines from
    /// scratch. Never adjusts a running total; this is the authoritative
    /// value consumers must not re-derive elsewhere.
    fn recompute_addon_subtotal(&mut self) -> Result<(), BookingError> {
        let mut sum = Money::zero(self.service_price.currency());
        for line in &self.lines {
            sum = sum
                .checked_add(&line.price())
                .ok_or(BookingError::CurrencyMismatch)?;
        }
        self.addon_subtotal = sum;
        if let BookingKind::Internal = self.kind {
            self.price = self
                .service_price
                .checked_add(&sum)
                .ok_or(BookingError::CurrencyMismatch)?;
            self.provider_payout = self.price;
        }
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Bookings in a terminal status are immutable in business terms; the
    /// row persists for audit only.
    fn validate_mutable(&self) -> Result<(), BookingError> {
        match self.status.is_terminal() {
            true => Err(BookingError::ImmutableBooking),
            false => Ok(()),
        }
    }

    fn validate_slot(slot: &Range<DateTime<Utc>>) -> Result<(), BookingError> {
        if slot.start >= slot.end {
            return Err(BookingError::InvalidSlot);
        }
        Ok(())
    }

    fn validate_transition(&self, next: BookingStatus) -> Result<(), BookingError> {
        use BookingStatus::*;
        let permitted = matches!(
            (self.status, next),
            (Pending, Confirmed)
                | (Pending, Failed)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
                | (Confirmed, Missed)
                | (Confirmed, Refunded)
                | (Confirmed, PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
                | (PartiallyRefunded, PartiallyRefunded)
        );
        match permitted {
            true => Ok(()),
            false => Err(BookingError::InvalidStatusTransition),
        }
    }
}

impl Entity for Booking {
    type Id = BookingId;

    const ENTITY_NAME: &'static str = "booking";

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[derive(derive_more::Error, Display, Debug, PartialEq, Eq)]
pub enum BookingError {
    #[display(fmt = "Slot end must be after its start")]
    InvalidSlot,
    #[display(fmt = "Guest name is not specified")]
    GuestNameRequired,
    #[display(fmt = "Guest email is not specified")]
    GuestEmailRequired,
    #[display(fmt = "Paid bookings require a gateway transaction id")]
    TransactionIdRequired,
    #[display(fmt = "Mixed currencies on one booking")]
    CurrencyMismatch,
    #[display(fmt = "Fee split does not fit the fee charged")]
    FeeMismatch,
    #[display(fmt = "Duplicate add-on line")]
    DuplicateLine,
    #[display(fmt = "Add-on line not found")]
    LineNotFound,
    #[display(fmt = "Invalid status transition")]
    InvalidStatusTransition,
    #[display(fmt = "Booking is in a terminal status")]
    ImmutableBooking,
    #[display(fmt = "Unknown status value")]
    UnknownStatus,
}

/// In-memory overlap test over one provider's non-cancelled bookings,
/// half-open interval semantics: back-to-back slots do not conflict.
///
/// The interval tree mirrors the database guard for code paths that hold the
/// full booking set in memory (and for tests); the row-lock guard in the
/// infrastructure layer remains the source of truth under concurrency.
pub struct Calendar {
    tree: IntervalTree<DateTime<Utc>, BookingId>,
}

impl Calendar {
    pub fn new<'i, I>(bookings: I) -> Self
    where
        I: IntoIterator<Item = &'i Booking>,
    {
        Self {
            tree: IntervalTree::from_iter(
                bookings
                    .into_iter()
                    .filter(|b| b.status() != BookingStatus::Cancelled)
                    .map(|b| (b.slot().clone(), b.id())),
            ),
        }
    }

    pub fn conflict_with(&self, slot: &Range<DateTime<Utc>>) -> Option<BookingId> {
        self.tree.find(slot).map(|entry| *entry.data()).next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::core::{Currency, FeeConfig, ProviderId, ServiceId};
    use chrono::{Duration, TimeZone};

    fn slot(start_hour: u32, minutes: i64) -> Range<DateTime<Utc>> {
        let start = Utc
            .with_ymd_and_hms(2024, 6, 1, start_hour, 0, 0)
            .unwrap();
        start..start + Duration::minutes(minutes)
    }

    fn guest() -> BookingCustomer {
        BookingCustomer::Guest {
            name: "Ada".to_owned(),
            email: "ada@example.com".to_owned(),
            phone: None,
        }
    }

    fn internal_booking(id: u64, start_hour: u32) -> Booking {
        Booking::create(
            BookingId::from(id),
            ProviderId::from(7),
            ServiceId::from(1),
            BookingKind::Internal,
            slot(start_hour, 30),
            guest(),
            Money::new(5000, Currency::USD),
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_slot_must_be_forward() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let result = Booking::create(
            BookingId::from(1),
            ProviderId::from(7),
            ServiceId::from(1),
            BookingKind::Internal,
            start..start,
            guest(),
            Money::new(5000, Currency::USD),
            None,
            None,
        );
        assert_eq!(result.unwrap_err(), BookingError::InvalidSlot);
    }

    #[test]
    fn test_internal_pricing() {
        // $50.00 service, no add-ons: price = 5000, fee = 0, payout = 5000
        let booking = internal_booking(1, 10);
        assert_eq!(booking.price(), Money::new(5000, Currency::USD));
        assert!(booking.platform_fee().is_zero());
        assert_eq!(booking.provider_payout(), Money::new(5000, Currency::USD));
        assert_eq!(booking.status(), BookingStatus::Confirmed);
        assert_eq!(booking.payment_status(), PaymentStatus::Manual);
    }

    #[test]
    fn test_paid_pricing_follows_split() {
        let config = FeeConfig::new(
            Money::new(338, Currency::USD),
            Money::new(38, Currency::USD),
            40,
        )
        .unwrap();
        let split = FeeSplit::compute(&config, false);
        let booking = Booking::create(
            BookingId::from(2),
            ProviderId::from(7),
            ServiceId::from(1),
            BookingKind::Paid {
                fee_charged: Money::new(338, Currency::USD),
                split,
            },
            slot(10, 30),
            BookingCustomer::Registered { id: ClientId::from(9) },
            Money::new(5000, Currency::USD),
            Some("tx_1".to_owned()),
            None,
        )
        .unwrap();
        assert_eq!(booking.price(), Money::new(338, Currency::USD));
        assert_eq!(booking.platform_fee(), Money::new(180, Currency::USD));
        assert_eq!(booking.provider_payout(), Money::new(120, Currency::USD));
        assert_eq!(booking.status(), BookingStatus::Pending);
    }

    #[test]
    fn test_paid_requires_transaction_id() {
        let config = FeeConfig::new(
            Money::new(338, Currency::USD),
            Money::new(38, Currency::USD),
            40,
        )
        .unwrap();
        let result = Booking::create(
            BookingId::from(2),
            ProviderId::from(7),
            ServiceId::from(1),
            BookingKind::Paid {
                fee_charged: Money::new(338, Currency::USD),
                split: FeeSplit::compute(&config, false),
            },
            slot(10, 30),
            guest(),
            Money::new(5000, Currency::USD),
            None,
            None,
        );
        assert_eq!(result.unwrap_err(), BookingError::TransactionIdRequired);
    }

    #[test]
    fn test_paid_rejects_oversized_split() {
        let config = FeeConfig::new(
            Money::new(338, Currency::USD),
            Money::new(38, Currency::USD),
            40,
        )
        .unwrap();
        let result = Booking::create(
            BookingId::from(2),
            ProviderId::from(7),
            ServiceId::from(1),
            BookingKind::Paid {
                // fee smaller than the split it claims to carry
                fee_charged: Money::new(200, Currency::USD),
                split: FeeSplit::compute(&config, false),
            },
            slot(10, 30),
            guest(),
            Money::new(5000, Currency::USD),
            Some("tx_1".to_owned()),
            None,
        );
        assert_eq!(result.unwrap_err(), BookingError::FeeMismatch);
    }

    #[test]
    fn test_guest_identity_validation() {
        let result = Booking::create(
            BookingId::from(3),
            ProviderId::from(7),
            ServiceId::from(1),
            BookingKind::Internal,
            slot(10, 30),
            BookingCustomer::Guest {
                name: "".to_owned(),
                email: "ada@example.com".to_owned(),
                phone: None,
            },
            Money::new(5000, Currency::USD),
            None,
            None,
        );
        assert_eq!(result.unwrap_err(), BookingError::GuestNameRequired);
    }

    #[test]
    fn test_status_machine() {
        let mut booking = internal_booking(1, 10);
        assert!(booking.transition(BookingStatus::Completed).is_ok());
        // completed is terminal
        assert_eq!(
            booking.transition(BookingStatus::Cancelled).unwrap_err(),
            BookingError::InvalidStatusTransition
        );

        let mut booking = internal_booking(2, 11);
        assert!(booking.transition(BookingStatus::PartiallyRefunded).is_ok());
        assert!(booking.transition(BookingStatus::PartiallyRefunded).is_ok());
        assert!(booking.transition(BookingStatus::Refunded).is_ok());
        assert!(booking.status().is_terminal());

        let mut booking = internal_booking(3, 12);
        assert_eq!(
            booking.transition(BookingStatus::Pending).unwrap_err(),
            BookingError::InvalidStatusTransition
        );
        assert!(booking.transition(BookingStatus::Missed).is_ok());
    }

    #[test]
    fn test_addon_subtotal_recomputed_from_scratch() {
        let mut booking = internal_booking(1, 10);
        let addon_a = Addon::create(
            crate::domain::core::AddonId::from(100),
            ProviderId::from(7),
            "Hot stones".to_owned(),
            Money::new(700, Currency::USD),
        )
        .unwrap();
        let addon_b = Addon::create(
            crate::domain::core::AddonId::from(101),
            ProviderId::from(7),
            "Aromatherapy".to_owned(),
            Money::new(300, Currency::USD),
        )
        .unwrap();
        let line_a = AddonLine::snapshot(AddonLineId::from(1), &addon_a);
        let line_b = AddonLine::snapshot(AddonLineId::from(2), &addon_b);

        booking.add_line(line_a).unwrap();
        booking.add_line(line_b).unwrap();
        assert_eq!(booking.addon_subtotal(), Money::new(1000, Currency::USD));
        // internal kind: price and payout track service price + subtotal
        assert_eq!(booking.price(), Money::new(6000, Currency::USD));
        assert_eq!(booking.provider_payout(), Money::new(6000, Currency::USD));

        booking.remove_line(AddonLineId::from(1)).unwrap();
        assert_eq!(booking.addon_subtotal(), Money::new(300, Currency::USD));
        assert_eq!(booking.price(), Money::new(5300, Currency::USD));

        assert_eq!(
            booking.remove_line(AddonLineId::from(1)).unwrap_err(),
            BookingError::LineNotFound
        );
    }

    #[test]
    fn test_terminal_booking_rejects_line_changes() {
        let mut booking = internal_booking(1, 10);
        let addon = Addon::create(
            crate::domain::core::AddonId::from(100),
            ProviderId::from(7),
            "Hot stones".to_owned(),
            Money::new(700, Currency::USD),
        )
        .unwrap();
        let line = AddonLine::snapshot(AddonLineId::from(1), &addon);
        booking.transition(BookingStatus::Completed).unwrap();
        let price = booking.price();

        assert_eq!(
            booking.add_line(line.clone()).unwrap_err(),
            BookingError::ImmutableBooking
        );
        assert_eq!(
            booking.set_lines(vec![line]).unwrap_err(),
            BookingError::ImmutableBooking
        );
        assert_eq!(
            booking.remove_line(AddonLineId::from(1)).unwrap_err(),
            BookingError::ImmutableBooking
        );
        // commercial fields did not move
        assert_eq!(booking.price(), price);
        assert!(booking.addon_subtotal().is_zero());
    }

    #[test]
    fn test_missable_when_start_has_passed() {
        let booking = internal_booking(1, 10);
        let before = booking.slot().start - Duration::minutes(5);
        let after = booking.slot().start + Duration::minutes(5);
        assert!(!booking.is_missable(before));
        assert!(booking.is_missable(after));

        let mut completed = internal_booking(2, 11);
        completed.transition(BookingStatus::Completed).unwrap();
        assert!(!completed.is_missable(completed.slot().start + Duration::minutes(5)));
    }

    #[test]
    fn test_calendar_overlap() {
        let existing = internal_booking(1, 10);
        let calendar = Calendar::new([&existing]);

        // same 30 minute slot conflicts
        assert!(calendar.conflict_with(&slot(10, 30)).is_some());
        // back-to-back booking starting exactly at the end does not
        let back_to_back = existing.slot().end..existing.slot().end + Duration::minutes(30);
        assert!(calendar.conflict_with(&back_to_back).is_none());
    }

    #[test]
    fn test_cancelled_bookings_free_the_calendar() {
        let mut existing = internal_booking(1, 10);
        existing.transition(BookingStatus::Cancelled).unwrap();
        let calendar = Calendar::new([&existing]);
        assert!(calendar.conflict_with(&slot(10, 30)).is_none());
    }
}

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::{Deref, Display, From};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use sha2::Sha256;
use thiserror::Error;

use crate::domain::{DataAccessError, Entity, Id};

use super::{AddonId, BookingCustomer, BookingId, ClientId, Currency, Money, PaymentStatus, ProviderId, ServiceId};

type HmacSha256 = Hmac<Sha256>;

/// Append-only audit trail of settled monetary transactions. The uniqueness
/// of `transaction_id` is the durable idempotency contract: inserting a
/// duplicate is a successful no-op, never an update in place.
#[async_trait]
pub trait PaymentRecords {
    async fn insert(&self, record: PaymentRecord) -> Result<InsertOutcome, DataAccessError>;
    async fn find_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentRecord>, DataAccessError>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The transaction id was already recorded; the first write stands.
    AlreadyRecorded,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, From, Deref, Default, Hash,
)]
pub struct PaymentRecordId(u64);

impl Id for PaymentRecordId {
    type Inner = u64;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    id: PaymentRecordId,
    transaction_id: String,
    amount: Money,
    status: PaymentStatus,
    booking_id: BookingId,
    created_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn create(
        id: PaymentRecordId,
        transaction_id: String,
        amount: Money,
        status: PaymentStatus,
        booking_id: BookingId,
    ) -> Result<Self, PaymentError> {
        if transaction_id.trim().is_empty() {
            return Err(PaymentError::BlankTransactionId);
        }
        Ok(Self {
            id,
            transaction_id,
            amount,
            status,
            booking_id,
            created_at: Utc::now(),
        })
    }

    /// Negative-amount audit row for a refund, keyed by the refund's own
    /// transaction id.
    pub fn refund(
        id: PaymentRecordId,
        transaction_id: String,
        refunded: Money,
        status: PaymentStatus,
        booking_id: BookingId,
    ) -> Result<Self, PaymentError> {
        Self::create(id, transaction_id, refunded.negated(), status, booking_id)
    }

    pub(crate) fn restore(
        id: PaymentRecordId,
        transaction_id: String,
        amount: Money,
        status: PaymentStatus,
        booking_id: BookingId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            transaction_id,
            amount,
            status,
            booking_id,
            created_at,
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn booking_id(&self) -> BookingId {
        self.booking_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for PaymentRecord {
    type Id = PaymentRecordId;

    const ENTITY_NAME: &'static str = "payment_record";

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayEventKind {
    SettlementSucceeded,
    SettlementFailed,
    CheckoutExpired,
    RefundIssued,
    AccountStatusChanged,
}

/// One authenticated webhook delivery from the payment gateway. Amounts
/// arrive in minor currency units, sometimes as strings; metadata is a
/// free-form string map parsed eagerly into [`SettlementMetadata`] before
/// anything downstream trusts it.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    #[serde(rename = "type")]
    pub kind: GatewayEventKind,
    pub transaction_id: String,
    // gateways disagree on whether minor-unit amounts are numbers or strings
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub amount: i64,
    pub currency: Currency,
    /// Present on refund events; distinct from the settled transaction id so
    /// repeated partial refunds stay individually auditable.
    #[serde(default)]
    pub refund_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl GatewayEvent {
    pub fn parse(body: &[u8]) -> Result<Self, PaymentError> {
        let event: GatewayEvent = serde_json::from_slice(body)?;
        if event.transaction_id.trim().is_empty() {
            return Err(PaymentError::BlankTransactionId);
        }
        Ok(event)
    }

    pub fn amount_money(&self) -> Money {
        Money::new(self.amount, self.currency)
    }
}

/// The strongly-typed booking request carried in a settlement's metadata.
/// Every required field missing or malformed aborts with a validation error
/// before any write; a half-populated booking is never created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementMetadata {
    pub provider_id: ProviderId,
    pub service_id: ServiceId,
    pub slot_start: DateTime<Utc>,
    pub addon_ids: Vec<AddonId>,
    pub customer: BookingCustomer,
}

impl SettlementMetadata {
    pub fn from_event(event: &GatewayEvent) -> Result<Self, PaymentError> {
        let meta = &event.metadata;
        let provider_id = ProviderId::from(parse_required::<u64>(meta, "provider_id")?);
        let service_id = ServiceId::from(parse_required::<u64>(meta, "service_id")?);
        let slot_start = required(meta, "slot_start")?
            .parse::<DateTime<Utc>>()
            .map_err(|_| PaymentError::MalformedMetadata { field: "slot_start" })?;
        let addon_ids = match meta.get("addon_ids") {
            None => Vec::new(),
            Some(raw) if raw.trim().is_empty() => Vec::new(),
            Some(raw) => raw
                .split(',')
                .map(|s| {
                    s.trim()
                        .parse::<u64>()
                        .map(AddonId::from)
                        .map_err(|_| PaymentError::MalformedMetadata { field: "addon_ids" })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        let customer = match meta.get("client_id") {
            Some(raw) => BookingCustomer::Registered {
                id: ClientId::from(raw.trim().parse::<u64>().map_err(|_| {
                    PaymentError::MalformedMetadata { field: "client_id" }
                })?),
            },
            None => BookingCustomer::Guest {
                name: required(meta, "guest_name")?.to_owned(),
                email: required(meta, "guest_email")?.to_owned(),
                phone: meta.get("guest_phone").cloned(),
            },
        };
        Ok(Self {
            provider_id,
            service_id,
            slot_start,
            addon_ids,
            customer,
        })
    }
}

fn required<'m>(
    meta: &'m HashMap<String, String>,
    field: &'static str,
) -> Result<&'m str, PaymentError> {
    match meta.get(field).map(String::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(PaymentError::MissingMetadata { field }),
    }
}

fn parse_required<T: std::str::FromStr>(
    meta: &HashMap<String, String>,
    field: &'static str,
) -> Result<T, PaymentError> {
    required(meta, field)?
        .trim()
        .parse::<T>()
        .map_err(|_| PaymentError::MalformedMetadata { field })
}

/// Verifies the gateway's HMAC-SHA256 signature over the raw body. An
/// unverifiable event is rejected before any of its content is trusted.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> Result<(), PaymentError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentError::Unverifiable)?;
    mac.update(body);
    let provided = hex::decode(signature.trim()).map_err(|_| PaymentError::Unverifiable)?;
    mac.verify_slice(&provided)
        .map_err(|_| PaymentError::Unverifiable)
}

/// Counterpart of [`verify_signature`]; what a well-behaved gateway sends.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Error, Debug)]
pub enum PaymentError {
    /// Signature did not verify; logged as a threat signal, rejected with no
    /// side effects.
    #[error("Webhook signature could not be verified")]
    Unverifiable,
    #[error("Malformed gateway event: {0}")]
    MalformedEvent(#[from] serde_json::Error),
    #[error("Transaction id cannot be blank")]
    BlankTransactionId,
    #[error("Required metadata field is missing: {field}")]
    MissingMetadata { field: &'static str },
    #[error("Metadata field is malformed: {field}")]
    MalformedMetadata { field: &'static str },
}

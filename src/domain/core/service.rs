use async_trait::async_trait;
use chrono::Duration;
use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};

use crate::domain::{DataAccessError, Entity, Id};

use super::{Money, ProviderId};

#[async_trait]
pub trait ServiceRepository {
    async fn find_by_id(&self, id: ServiceId) -> Result<Option<Service>, DataAccessError>;
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, From, Deref, Default, Hash,
)]
pub struct ServiceId(u64);

impl Id for ServiceId {
    type Inner = u64;
}

/// A bookable service. Its price is copied onto every booking at creation
/// time; later edits never touch historical bookings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    id: ServiceId,
    provider_id: ProviderId,
    name: String,
    price: Money,
    duration_minutes: u32,
}

impl Service {
    pub fn create(
        id: ServiceId,
        provider_id: ProviderId,
        name: String,
        price: Money,
        duration_minutes: u32,
    ) -> Result<Self, ServiceError> {
        Self::validate_name(&name)?;
        Self::validate_duration(duration_minutes)?;
        if price.amount() < 0 {
            return Err(ServiceError::NegativePrice);
        }
        Ok(Self {
            id,
            provider_id,
            name,
            price,
            duration_minutes,
        })
    }

    pub fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    fn validate_name(name: &str) -> Result<(), ServiceError> {
        match name.trim().is_empty() {
            true => Err(ServiceError::NameIsBlank),
            false => Ok(()),
        }
    }

    fn validate_duration(duration_minutes: u32) -> Result<(), ServiceError> {
        match duration_minutes {
            0 => Err(ServiceError::InvalidDuration),
            _ => Ok(()),
        }
    }
}

impl Entity for Service {
    type Id = ServiceId;

    const ENTITY_NAME: &'static str = "service";

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[derive(derive_more::Error, Display, Debug)]
pub enum ServiceError {
    #[display(fmt = "Name cannot be blank")]
    NameIsBlank,
    #[display(fmt = "Duration must be positive")]
    InvalidDuration,
    #[display(fmt = "Price cannot be negative")]
    NegativePrice,
}

use async_trait::async_trait;
use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};

use crate::domain::{DataAccessError, Entity, Id};

use super::{Money, ProviderId};

#[async_trait]
pub trait AddonRepository {
    async fn find_by_id(&self, id: AddonId) -> Result<Option<Addon>, DataAccessError>;
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, From, Deref, Default, Hash,
)]
pub struct AddonId(u64);

impl Id for AddonId {
    type Inner = u64;
}

/// An optional extra a client can attach to a booking. Like the service
/// price, the add-on price is snapshotted onto the booking's line item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addon {
    id: AddonId,
    provider_id: ProviderId,
    name: String,
    price: Money,
}

impl Addon {
    pub fn create(
        id: AddonId,
        provider_id: ProviderId,
        name: String,
        price: Money,
    ) -> Result<Self, AddonError> {
        Self::validate_name(&name)?;
        if price.amount() < 0 {
            return Err(AddonError::NegativePrice);
        }
        Ok(Self {
            id,
            provider_id,
            name,
            price,
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

    fn validate_name(name: &str) -> Result<(), AddonError> {
        match name.trim().is_empty() {
            true => Err(AddonError::NameIsBlank),
            false => Ok(()),
        }
    }
}

impl Entity for Addon {
    type Id = AddonId;

    const ENTITY_NAME: &'static str = "addon";

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[derive(derive_more::Error, Display, Debug)]
pub enum AddonError {
    #[display(fmt = "Name cannot be blank")]
    NameIsBlank,
    #[display(fmt = "Price cannot be negative")]
    NegativePrice,
}

use async_trait::async_trait;
use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};

use crate::domain::{DataAccessError, Entity, Id};

/// Provider lookup used by the booking paths. Read-only here: provider
/// onboarding and profile editing live outside the reservation core.
#[async_trait]
pub trait ProviderRepository {
    async fn find_by_id(&self, id: ProviderId) -> Result<Option<Provider>, DataAccessError>;
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, From, Deref, Default, Hash,
)]
pub struct ProviderId(u64);

impl Id for ProviderId {
    type Inner = u64;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    id: ProviderId,
    name: String,
    /// Internal/no-fee account: bypasses the platform revenue split.
    zero_fee: bool,
}

impl Provider {
    pub fn create(id: ProviderId, name: String, zero_fee: bool) -> Result<Self, ProviderError> {
        Self::validate_name(&name)?;
        Ok(Self { id, name, zero_fee })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn zero_fee(&self) -> bool {
        self.zero_fee
    }

    fn validate_name(name: &str) -> Result<(), ProviderError> {
        match name.trim().is_empty() {
            true => Err(ProviderError::NameIsBlank),
            false => Ok(()),
        }
    }
}

impl Entity for Provider {
    type Id = ProviderId;

    const ENTITY_NAME: &'static str = "provider";

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[derive(derive_more::Error, Display, Debug)]
pub enum ProviderError {
    #[display(fmt = "Name cannot be blank")]
    NameIsBlank,
}

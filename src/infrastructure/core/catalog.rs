use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use crate::domain::core::{
    Addon, AddonId, AddonRepository, Currency, Money, Provider, ProviderId, ProviderRepository,
    Service, ServiceId, ServiceRepository,
};
use crate::domain::DataAccessError;

/// Read side of the catalog: providers, their services and their add-ons.
/// One type carries all three lookups so the reconciler can take a single
/// catalog handle.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderRepository for PgCatalog {
    async fn find_by_id(&self, id: ProviderId) -> Result<Option<Provider>, DataAccessError> {
        let row: Option<ProviderRow> =
            sqlx::query_as("SELECT id, name, zero_fee FROM providers WHERE id = $1")
                .bind(*id as i64)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ProviderRow::into_provider).transpose()
    }
}

#[async_trait]
impl ServiceRepository for PgCatalog {
    async fn find_by_id(&self, id: ServiceId) -> Result<Option<Service>, DataAccessError> {
        let row: Option<ServiceRow> = sqlx::query_as(
            "SELECT id, provider_id, name, price, currency, duration_minutes \
             FROM services WHERE id = $1",
        )
        .bind(*id as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ServiceRow::into_service).transpose()
    }
}

#[async_trait]
impl AddonRepository for PgCatalog {
    async fn find_by_id(&self, id: AddonId) -> Result<Option<Addon>, DataAccessError> {
        let row: Option<AddonRow> =
            sqlx::query_as("SELECT id, provider_id, name, price, currency FROM addons WHERE id = $1")
                .bind(*id as i64)
                .fetch_optional(&self.pool)
                .await?;
        row.map(AddonRow::into_addon).transpose()
    }
}

fn read_error<E>(e: E) -> DataAccessError
where
    E: std::error::Error + Send + Sync + 'static,
{
    DataAccessError::ReadError(Box::new(e))
}

#[derive(FromRow)]
struct ProviderRow {
    id: i64,
    name: String,
    zero_fee: bool,
}

impl ProviderRow {
    fn into_provider(self) -> Result<Provider, DataAccessError> {
        Provider::create(ProviderId::from(self.id as u64), self.name, self.zero_fee)
            .map_err(read_error)
    }
}

#[derive(FromRow)]
struct ServiceRow {
    id: i64,
    provider_id: i64,
    name: String,
    price: i64,
    currency: String,
    duration_minutes: i32,
}

impl ServiceRow {
    fn into_service(self) -> Result<Service, DataAccessError> {
        let currency = self.currency.parse::<Currency>().map_err(read_error)?;
        Service::create(
            ServiceId::from(self.id as u64),
            ProviderId::from(self.provider_id as u64),
            self.name,
            Money::new(self.price, currency),
            self.duration_minutes as u32,
        )
        .map_err(read_error)
    }
}

#[derive(FromRow)]
struct AddonRow {
    id: i64,
    provider_id: i64,
    name: String,
    price: i64,
    currency: String,
}

impl AddonRow {
    fn into_addon(self) -> Result<Addon, DataAccessError> {
        let currency = self.currency.parse::<Currency>().map_err(read_error)?;
        Addon::create(
            AddonId::from(self.id as u64),
            ProviderId::from(self.provider_id as u64),
            self.name,
            Money::new(self.price, currency),
        )
        .map_err(read_error)
    }
}

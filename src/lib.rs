use config::{Config, ConfigError};
use serde::Deserialize;

pub mod domain;
pub mod infrastructure;

#[derive(Clone, Debug, Deserialize)]
pub struct BooklyConfig {
    pub database: Database,
    pub gateway: Gateway,
    pub server: Server,
    pub logger: Logger,
}

impl BooklyConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(config::File::with_name("bookly.toml"))
            .add_source(config::Environment::with_prefix("BOOKLY").separator("_"))
            .build()?
            .try_deserialize::<BooklyConfig>()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
    /// How long a booking transaction may wait on a conflicting row lock
    /// before it is rolled back with a timeout instead of a conflict.
    pub lock_timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Gateway {
    pub webhook_secret: String,
    /// Flat fee charged to the customer, in minor currency units.
    pub platform_fee: i64,
    /// Flat processing cost retained by the gateway, in minor currency units.
    pub gateway_cost: i64,
    pub provider_share_percent: u8,
    pub currency: crate::domain::core::Currency,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Server {
    pub listen: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Logger {
    pub level: Level,
}

#[derive(Clone, Debug, Deserialize)]
pub enum Level {
    TRACE,
    DEBUG,
    INFO,
    WARN,
    ERROR,
}

impl From<&Level> for tracing::Level {
    fn from(value: &Level) -> Self {
        match value {
            Level::TRACE => tracing::Level::TRACE,
            Level::DEBUG => tracing::Level::DEBUG,
            Level::INFO => tracing::Level::INFO,
            Level::WARN => tracing::Level::WARN,
            Level::ERROR => tracing::Level::ERROR,
        }
    }
}

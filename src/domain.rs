pub mod core;
pub mod reconcile;

use once_cell::sync;
use serde::{Deserialize, Serialize};
use snowflake::SnowflakeIdGenerator;
use std::{
    error::Error,
    fmt::{Debug, Display},
    ops::Deref,
    str::FromStr,
    sync::Mutex,
};
use thiserror::Error;

pub trait Id:
    Copy
    + Eq
    + Deref<Target = Self::Inner>
    + From<Self::Inner>
    + Display
    + Debug
    + Serialize
    + for<'de> Deserialize<'de>
{
    type Inner: FromStr;
}

pub trait Entity {
    type Id: Id;

    const ENTITY_NAME: &'static str;

    fn id(&self) -> Self::Id;
}

#[derive(Error, Debug)]
pub enum DataAccessError {
    #[error("Database connection error: {0}")]
    ConnectionError(Box<dyn Error + Send + Sync>),
    #[error("Database query error: {0}")]
    QueryError(Box<dyn Error + Send + Sync>),
    #[error("Data read error: {0}")]
    ReadError(Box<dyn Error + Send + Sync>),
    #[error("Data write error: {0}")]
    WriteError(Box<dyn Error + Send + Sync>),
    #[error("Client side error: {0}")]
    ClientSideError(Box<dyn Error + Send + Sync>),
}

pub struct IdGenerator(SnowflakeIdGenerator);

impl IdGenerator {
    pub fn new(gen: SnowflakeIdGenerator) -> Self {
        Self(gen)
    }

    pub fn generate(&mut self) -> u64 {
        self.0.generate() as u64
    }
}

impl From<SnowflakeIdGenerator> for IdGenerator {
    fn from(value: SnowflakeIdGenerator) -> Self {
        Self::new(value)
    }
}

/// Process-wide id source. Not bound to any async runtime, so ids can be
/// drawn from request handlers, background sweeps and tests alike.
pub static ID_GENERATOR: sync::Lazy<SharedIdGenerator> =
    sync::Lazy::new(|| SharedIdGenerator::new(SnowflakeIdGenerator::new(1, 1).into()));

pub struct SharedIdGenerator {
    inner: Mutex<IdGenerator>,
}

impl SharedIdGenerator {
    pub fn new(gen: IdGenerator) -> Self {
        Self {
            inner: Mutex::new(gen),
        }
    }

    pub fn generate<T>(&self) -> T
    where
        T: From<u64>,
    {
        // A poisoned lock still holds a usable generator.
        let mut gen = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        T::from(gen.generate())
    }
}

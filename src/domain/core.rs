mod addon;
mod booking;
mod fee;
mod payment;
mod provider;
mod service;

use std::fmt::Display;

use num_format::{Locale, ToFormattedString};
use serde::Deserialize;
use serde::Serialize;

pub use self::addon::*;
pub use self::booking::*;
pub use self::fee::*;
pub use self::payment::*;
pub use self::provider::*;
pub use self::service::*;

/// Monetary amount in minor currency units.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Money {
    amount: i64,
    currency: Currency,
}

impl Money {
    pub fn new(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    pub fn negated(&self) -> Self {
        Self::new(-self.amount, self.currency)
    }

    /// None on currency mismatch or overflow.
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        if self.currency != other.currency {
            return None;
        }
        self.amount
            .checked_add(other.amount)
            .map(|amount| Self::new(amount, self.currency))
    }

    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        self.checked_add(&other.negated())
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        write!(
            f,
            "{}{}{}",
            sign,
            self.currency.symbol(),
            self.amount.unsigned_abs().to_formatted_string(&Locale::en)
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Currency {
    #[serde(alias = "jpy")]
    JPY,
    #[default]
    #[serde(alias = "usd")]
    USD,
    #[serde(alias = "eur")]
    EUR,
}

impl Currency {
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::JPY => "¥",
            Currency::USD => "$",
            Currency::EUR => "€",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::JPY => "JPY",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
        }
    }
}

impl std::str::FromStr for Currency {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "JPY" => Ok(Currency::JPY),
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            _ => Err(UnknownCurrency),
        }
    }
}

#[derive(Debug)]
pub struct UnknownCurrency;

impl Display for UnknownCurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown currency code")
    }
}

impl std::error::Error for UnknownCurrency {}

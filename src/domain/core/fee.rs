use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::Money;

/// Fee constants for the platform revenue split. Passed explicitly so the
/// calculator stays pure and independently testable; nothing in here reads
/// ambient module state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    platform_fee: Money,
    gateway_cost: Money,
    provider_share_percent: u8,
}

impl FeeConfig {
    pub fn new(
        platform_fee: Money,
        gateway_cost: Money,
        provider_share_percent: u8,
    ) -> Result<Self, FeeError> {
        if platform_fee.currency() != gateway_cost.currency() {
            return Err(FeeError::CurrencyMismatch);
        }
        if platform_fee.amount() < 0 || gateway_cost.amount() < 0 {
            return Err(FeeError::NegativeAmount);
        }
        if gateway_cost.amount() > platform_fee.amount() {
            return Err(FeeError::CostExceedsFee);
        }
        if provider_share_percent > 100 {
            return Err(FeeError::ShareOutOfRange);
        }
        Ok(Self {
            platform_fee,
            gateway_cost,
            provider_share_percent,
        })
    }

    /// The flat fee the customer is charged on the paid booking path.
    pub fn platform_fee(&self) -> Money {
        self.platform_fee
    }

    pub fn gateway_cost(&self) -> Money {
        self.gateway_cost
    }

    pub fn provider_share_percent(&self) -> u8 {
        self.provider_share_percent
    }
}

impl TryFrom<&crate::Gateway> for FeeConfig {
    type Error = FeeError;

    fn try_from(value: &crate::Gateway) -> Result<Self, Self::Error> {
        Self::new(
            Money::new(value.platform_fee, value.currency),
            Money::new(value.gateway_cost, value.currency),
            value.provider_share_percent,
        )
    }
}

/// Result of splitting one platform fee between provider and platform.
///
/// Invariant: `gross_provider_share + net_platform_share` equals
/// `platform_fee - gateway_cost` for standard accounts, and both shares are
/// exactly zero for zero-fee accounts. The provider share is round-half-up
/// of its percentage of the net; the platform share is the exact remainder
/// of the net, so the two always reconstruct it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    gross_provider_share: Money,
    net_platform_share: Money,
}

impl FeeSplit {
    pub fn compute(config: &FeeConfig, zero_fee: bool) -> Self {
        let currency = config.platform_fee.currency();
        if zero_fee {
            return Self {
                gross_provider_share: Money::zero(currency),
                net_platform_share: Money::zero(currency),
            };
        }
        let net = config.platform_fee.amount() - config.gateway_cost.amount();
        let provider = round_half_up(
            i128::from(net) * i128::from(config.provider_share_percent),
            100,
        );
        Self {
            gross_provider_share: Money::new(provider, currency),
            net_platform_share: Money::new(net - provider, currency),
        }
    }

    /// Rebuilds a split from stored booking columns.
    pub(crate) fn from_parts(gross_provider_share: Money, net_platform_share: Money) -> Self {
        Self {
            gross_provider_share,
            net_platform_share,
        }
    }

    pub fn gross_provider_share(&self) -> Money {
        self.gross_provider_share
    }

    pub fn net_platform_share(&self) -> Money {
        self.net_platform_share
    }
}

fn round_half_up(numerator: i128, denominator: i128) -> i64 {
    ((numerator + denominator / 2) / denominator) as i64
}

#[derive(derive_more::Error, Display, Debug)]
pub enum FeeError {
    #[display(fmt = "Fee and cost currencies differ")]
    CurrencyMismatch,
    #[display(fmt = "Fee amounts cannot be negative")]
    NegativeAmount,
    #[display(fmt = "Gateway cost exceeds the platform fee")]
    CostExceedsFee,
    #[display(fmt = "Provider share percent must be 0..=100")]
    ShareOutOfRange,
}

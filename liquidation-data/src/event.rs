use crate::{error::NormaliseError, exchange::ExchangeId};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Underlying assets whose liquidations are tracked. Fixed at compile time.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    #[display("BTC")]
    Btc,
    #[display("ETH")]
    Eth,
    #[display("SOL")]
    Sol,
}

impl Asset {
    /// Number of tracked assets.
    pub const COUNT: usize = 3;

    /// Every tracked asset, in snapshot order.
    pub const ALL: [Asset; Self::COUNT] = [Asset::Btc, Asset::Eth, Asset::Sol];

    /// Dense index of this asset, used to address fixed size per-asset arrays.
    pub const fn index(self) -> usize {
        match self {
            Asset::Btc => 0,
            Asset::Eth => 1,
            Asset::Sol => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
            Asset::Sol => "SOL",
        }
    }

    /// Match an upper-case base currency code against the tracked assets.
    pub fn from_base(base: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|asset| asset.as_str() == base)
    }
}

/// Side of the position that was forcibly closed.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[display("LONG")]
    Long,
    #[display("SHORT")]
    Short,
}

/// Normalised liquidation reported by an exchange feed.
///
/// Construct via [`LiquidationEvent::new`], which guarantees a finite, positive `quantity` and
/// `price` and derives `notional_value`.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationEvent {
    pub asset: Asset,
    pub side: Side,
    /// Liquidated size in units of the base asset.
    pub quantity: f64,
    /// Bankruptcy / execution price in quote currency.
    pub price: f64,
    /// `quantity * price`, in quote currency.
    pub notional_value: f64,
    pub source_exchange: ExchangeId,
    /// Exchange event time if the feed provides one, otherwise local receipt time.
    pub observed_at: DateTime<Utc>,
}

impl LiquidationEvent {
    pub fn new(
        asset: Asset,
        side: Side,
        quantity: f64,
        price: f64,
        source_exchange: ExchangeId,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, NormaliseError> {
        let check = |field: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(value)
            } else {
                Err(NormaliseError::InvalidNumber {
                    exchange: source_exchange,
                    field,
                    value,
                })
            }
        };

        let quantity = check("quantity", quantity)?;
        let price = check("price", price)?;

        Ok(Self {
            asset,
            side,
            quantity,
            price,
            notional_value: quantity * price,
            source_exchange,
            observed_at,
        })
    }

    /// Whether the event satisfies the invariants established by [`LiquidationEvent::new`].
    pub fn is_valid(&self) -> bool {
        [self.quantity, self.price, self.notional_value]
            .into_iter()
            .all(|value| value.is_finite() && value > 0.0)
    }
}

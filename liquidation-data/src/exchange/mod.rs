use crate::{error::DataError, event::Asset};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{str::FromStr, time::Duration};
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;
use url::Url;

/// `Binance` USD-M futures `forceOrder` [`Connector`].
pub mod binance;

/// `Bybit` linear perpetuals `allLiquidation` [`Connector`].
pub mod bybit;

/// `Gate.io` USDT futures `futures.public_liquidates` [`Connector`].
pub mod gateio;

/// `Okx` perpetual swaps `liquidation-orders` [`Connector`].
pub mod okx;

/// Convenient type alias for a tungstenite WebSocket [`Message`].
pub type WsMessage = Message;

/// Unique identifier for an exchange feed, also used as the `sourceExchange` of every
/// [`LiquidationEvent`](crate::event::LiquidationEvent) it produces.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeId {
    #[display("binance_futures_usd")]
    BinanceFuturesUsd,
    #[display("bybit_perpetuals_usd")]
    BybitPerpetualsUsd,
    #[display("gateio_futures_usd")]
    GateioFuturesUsd,
    #[display("okx")]
    Okx,
}

impl ExchangeId {
    /// Every supported exchange feed.
    pub const ALL: [ExchangeId; 4] = [
        ExchangeId::BybitPerpetualsUsd,
        ExchangeId::BinanceFuturesUsd,
        ExchangeId::Okx,
        ExchangeId::GateioFuturesUsd,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::BinanceFuturesUsd => "binance_futures_usd",
            ExchangeId::BybitPerpetualsUsd => "bybit_perpetuals_usd",
            ExchangeId::GateioFuturesUsd => "gateio_futures_usd",
            ExchangeId::Okx => "okx",
        }
    }
}

impl FromStr for ExchangeId {
    type Err = String;

    /// Accepts the canonical id as well as the bare exchange name, eg/ `"bybit"`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "binance" | "binance_futures_usd" => Ok(ExchangeId::BinanceFuturesUsd),
            "bybit" | "bybit_perpetuals_usd" => Ok(ExchangeId::BybitPerpetualsUsd),
            "gate" | "gateio" | "gateio_futures_usd" => Ok(ExchangeId::GateioFuturesUsd),
            "okx" => Ok(ExchangeId::Okx),
            other => Err(format!("unknown exchange: {other}")),
        }
    }
}

/// Exchange specific side vocabulary of a raw liquidation, interpreted by
/// [`normalise`](crate::normalise::normalise) using the exchange's documented convention.
#[derive(Clone, PartialEq, PartialOrd, Debug)]
pub enum RawSide {
    /// `Buy` / `Sell` label in any case, eg/ Bybit `"S"`, Binance `"o.S"`, Okx `"side"`.
    Label(String),
    /// Explicit side of the liquidated position, eg/ Okx `"posSide": "long"`.
    Position(String),
    /// Signed order size, positive for buy, eg/ Gate.io `"size": -124`.
    Signed(f64),
}

/// Liquidation decoded from an exchange payload, prior to normalisation.
#[derive(Clone, PartialEq, PartialOrd, Debug)]
pub struct RawLiquidation {
    pub symbol: String,
    pub side: RawSide,
    /// Size in exchange units (base currency or contracts, see [`Connector::contract_sizes`]).
    pub quantity: f64,
    pub price: f64,
    pub time: Option<DateTime<Utc>>,
}

/// Decoded exchange WebSocket frame.
#[derive(Clone, PartialEq, Debug)]
pub enum FeedMessage {
    /// Response to the subscription handshake, `Err` holds the exchange's rejection reason.
    SubscriptionAck(Result<(), String>),
    Liquidations(Vec<RawLiquidation>),
    /// Keep-alive responses and any other frame carrying no liquidations.
    Ignore,
}

/// Base currency quantity represented by one exchange contract, per tracked [`Asset`].
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
pub struct ContractSizes([f64; Asset::COUNT]);

impl ContractSizes {
    /// Sizes already denominated in the base currency.
    pub const UNIT: Self = Self([1.0; Asset::COUNT]);

    pub const fn new(btc: f64, eth: f64, sol: f64) -> Self {
        Self([btc, eth, sol])
    }

    pub fn get(&self, asset: Asset) -> f64 {
        self.0[asset.index()]
    }

    pub fn set(&mut self, asset: Asset, size: f64) {
        self.0[asset.index()] = size;
    }
}

impl Default for ContractSizes {
    fn default() -> Self {
        Self::UNIT
    }
}

/// Application level keep-alive sent by a [`Connector`] at a fixed interval.
#[derive(Debug)]
pub struct PingInterval {
    pub interval: Duration,
    pub ping: fn() -> WsMessage,
}

/// Defines everything exchange specific about a liquidation feed: where to connect, how to
/// subscribe, how to keep the connection alive, and how to decode each frame.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Unique identifier for the exchange feed.
    const ID: ExchangeId;

    /// Base WebSocket url of the exchange feed.
    fn url(&self) -> Result<Url, DataError>;

    /// Subscription handshake frames sent after connecting. Each feed expects one
    /// [`FeedMessage::SubscriptionAck`] in response.
    fn requests(&self) -> Vec<WsMessage>;

    /// Optional application level keep-alive.
    fn ping_interval(&self) -> Option<PingInterval> {
        None
    }

    /// Decode a text frame.
    fn decode(&self, payload: &str) -> Result<FeedMessage, DataError>;

    /// Multipliers converting the raw liquidation size into base currency.
    fn contract_sizes(&self) -> ContractSizes {
        ContractSizes::UNIT
    }

    /// One-off initialisation before the first connection, eg/ refreshing contract sizes
    /// from the exchange REST API.
    async fn init(&mut self, _http: &reqwest::Client) -> Result<(), DataError> {
        Ok(())
    }
}

/// Decode every entry of a batched payload independently, skipping the entries that fail.
///
/// Exchanges batch several liquidations into one frame, a malformed entry must only cost itself.
pub(crate) fn decode_entries<T>(exchange: ExchangeId, entries: Vec<serde_json::Value>) -> Vec<T>
where
    T: DeserializeOwned,
{
    entries
        .into_iter()
        .filter_map(|entry| match T::deserialize(&entry) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                warn!(%exchange, %error, %entry, "skipping malformed liquidation entry");
                None
            }
        })
        .collect()
}

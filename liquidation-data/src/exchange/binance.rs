use super::{Connector, ExchangeId, FeedMessage, PingInterval, RawLiquidation, RawSide, WsMessage};
use crate::error::DataError;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

/// [`BinanceFuturesUsd`] WebSocket server base url.
///
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams>
pub const BASE_URL_BINANCE_FUTURES_USD: &str = "wss://fstream.binance.com/ws";

/// Binance only pings every 3 minutes, so send our own pings to keep frames flowing through
/// the read timeout on quiet markets.
pub const PING_INTERVAL_BINANCE_FUTURES_USD: Duration = Duration::from_secs(60);

/// Binance `forceOrder` stream suffix.
///
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams/Liquidation-Order-Streams>
pub const FORCE_ORDER_CHANNEL: &str = "forceOrder";

/// [`Binance`](https://www.binance.com) USD-M futures liquidation feed.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct BinanceFuturesUsd {
    pub symbols: Vec<String>,
}

impl Default for BinanceFuturesUsd {
    fn default() -> Self {
        Self {
            symbols: vec!["btcusdt".into(), "ethusdt".into(), "solusdt".into()],
        }
    }
}

impl Connector for BinanceFuturesUsd {
    const ID: ExchangeId = ExchangeId::BinanceFuturesUsd;

    fn url(&self) -> Result<Url, DataError> {
        Url::parse(BASE_URL_BINANCE_FUTURES_USD).map_err(DataError::from)
    }

    fn requests(&self) -> Vec<WsMessage> {
        let params = self
            .symbols
            .iter()
            .map(|symbol| format!("{}@{FORCE_ORDER_CHANNEL}", symbol.to_lowercase()))
            .collect_vec();

        vec![WsMessage::text(
            json!({
                "method": "SUBSCRIBE",
                "params": params,
                "id": 1,
            })
            .to_string(),
        )]
    }

    fn ping_interval(&self) -> Option<PingInterval> {
        Some(PingInterval {
            interval: PING_INTERVAL_BINANCE_FUTURES_USD,
            ping: || WsMessage::Ping(vec![].into()),
        })
    }

    fn decode(&self, payload: &str) -> Result<FeedMessage, DataError> {
        let message = serde_json::from_str::<BinanceMessage>(payload)
            .map_err(|error| DataError::deserialise(error, payload))?;

        Ok(match message {
            BinanceMessage::ForceOrder(order) if order.event == FORCE_ORDER_CHANNEL => {
                FeedMessage::Liquidations(vec![RawLiquidation::from(order.order)])
            }
            BinanceMessage::ForceOrder(_) => FeedMessage::Ignore,
            BinanceMessage::Response(response) => {
                FeedMessage::SubscriptionAck(match (response.error, response.msg) {
                    (Some(error), _) => Err(error.msg),
                    (None, Some(msg)) => Err(msg),
                    (None, None) => Ok(()),
                })
            }
        })
    }
}

/// Messages received on a [`BinanceFuturesUsd`] liquidation stream.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum BinanceMessage {
    ForceOrder(BinanceForceOrder),
    Response(BinanceResponse),
}

/// [`BinanceFuturesUsd`] response to a `SUBSCRIBE` request.
///
/// ### Raw Payload Examples
/// ```json
/// {"result": null, "id": 1}
/// {"code": 2, "msg": "Invalid request: unknown variant `SUBSCRIBEX`", "id": 1}
/// {"error": {"code": 2, "msg": "Invalid request"}, "id": 1}
/// ```
#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct BinanceResponse {
    pub id: u64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub error: Option<BinanceResponseError>,
}

#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct BinanceResponseError {
    pub code: i64,
    pub msg: String,
}

/// [`BinanceFuturesUsd`] `forceOrder` event.
///
/// ### Raw Payload Examples
/// ```json
/// {
///     "e": "forceOrder",
///     "E": 1568014460893,
///     "o": {
///         "s": "BTCUSDT", "S": "SELL", "o": "LIMIT", "f": "IOC",
///         "q": "0.014", "p": "9910", "ap": "9910", "X": "FILLED",
///         "l": "0.014", "z": "0.014", "T": 1568014460893
///     }
/// }
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct BinanceForceOrder {
    #[serde(rename = "e")]
    pub event: String,
    #[serde(rename = "o")]
    pub order: BinanceForceOrderInner,
}

#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct BinanceForceOrderInner {
    #[serde(rename = "s")]
    pub symbol: String,

    /// Side of the liquidation order: `SELL` closes a long position.
    #[serde(rename = "S")]
    pub side: String,

    #[serde(rename = "q", deserialize_with = "crate::de::de_str")]
    pub original_quantity: f64,

    #[serde(rename = "z", deserialize_with = "crate::de::de_str")]
    pub filled_quantity: f64,

    #[serde(rename = "p", deserialize_with = "crate::de::de_str")]
    pub price: f64,

    #[serde(rename = "ap", deserialize_with = "crate::de::de_str")]
    pub average_price: f64,

    #[serde(
        rename = "T",
        deserialize_with = "crate::de::de_u64_epoch_ms_as_datetime_utc"
    )]
    pub time: DateTime<Utc>,
}

impl From<BinanceForceOrderInner> for RawLiquidation {
    /// Prefers the executed (filled, average price) figures, falling back to the order figures
    /// when the execution fields are empty.
    fn from(order: BinanceForceOrderInner) -> Self {
        let quantity = if order.filled_quantity > 0.0 {
            order.filled_quantity
        } else {
            order.original_quantity
        };
        let price = if order.average_price > 0.0 {
            order.average_price
        } else {
            order.price
        };

        Self {
            symbol: order.symbol,
            side: RawSide::Label(order.side),
            quantity,
            price,
            time: Some(order.time),
        }
    }
}

use super::{
    Connector, ExchangeId, FeedMessage, PingInterval, RawLiquidation, RawSide, WsMessage,
    decode_entries,
};
use crate::error::DataError;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::time::Duration;
use url::Url;

/// [`BybitPerpetualsUsd`] WebSocket server base url.
///
/// See docs: <https://bybit-exchange.github.io/docs/v5/ws/connect>
pub const BASE_URL_BYBIT_PERPETUALS_USD: &str = "wss://stream.bybit.com/v5/public/linear";

/// [`BybitPerpetualsUsd`] application level ping interval.
///
/// See docs: <https://bybit-exchange.github.io/docs/v5/ws/connect#how-to-send-the-heartbeat-packet>
pub const PING_INTERVAL_BYBIT: Duration = Duration::from_secs(20);

/// Type that defines a [`BybitPerpetualsUsd`] channel to be subscribed to.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct BybitChannel(pub &'static str);

impl BybitChannel {
    /// [`BybitPerpetualsUsd`] stream emitting every liquidation of an instrument.
    ///
    /// See docs: <https://bybit-exchange.github.io/docs/v5/websocket/public/all-liquidation>
    pub const ALL_LIQUIDATION: Self = Self("allLiquidation");

    /// Legacy single liquidation stream, superseded by [`Self::ALL_LIQUIDATION`].
    pub const LIQUIDATION: Self = Self("liquidation");
}

impl AsRef<str> for BybitChannel {
    fn as_ref(&self) -> &str {
        self.0
    }
}

/// [`Bybit`](https://www.bybit.com) linear perpetuals liquidation feed.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct BybitPerpetualsUsd {
    pub channel: BybitChannel,
    pub symbols: Vec<String>,
}

impl Default for BybitPerpetualsUsd {
    fn default() -> Self {
        Self {
            channel: BybitChannel::ALL_LIQUIDATION,
            symbols: vec!["BTCUSDT".into(), "ETHUSDT".into(), "SOLUSDT".into()],
        }
    }
}

impl Connector for BybitPerpetualsUsd {
    const ID: ExchangeId = ExchangeId::BybitPerpetualsUsd;

    fn url(&self) -> Result<Url, DataError> {
        Url::parse(BASE_URL_BYBIT_PERPETUALS_USD).map_err(DataError::from)
    }

    fn requests(&self) -> Vec<WsMessage> {
        let args = self
            .symbols
            .iter()
            .map(|symbol| format!("{}.{symbol}", self.channel.as_ref()))
            .collect_vec();

        vec![WsMessage::text(
            json!({
                "req_id": "liquidation_sub",
                "op": "subscribe",
                "args": args,
            })
            .to_string(),
        )]
    }

    fn ping_interval(&self) -> Option<PingInterval> {
        Some(PingInterval {
            interval: PING_INTERVAL_BYBIT,
            ping: || WsMessage::text(json!({ "op": "ping" }).to_string()),
        })
    }

    fn decode(&self, payload: &str) -> Result<FeedMessage, DataError> {
        let message = serde_json::from_str::<BybitMessage>(payload)
            .map_err(|error| DataError::deserialise(error, payload))?;

        Ok(match message {
            BybitMessage::Response(response) if response.op == "subscribe" => {
                FeedMessage::SubscriptionAck(if response.success {
                    Ok(())
                } else {
                    Err(response.ret_msg)
                })
            }
            BybitMessage::Response(_) => FeedMessage::Ignore,
            BybitMessage::Payload(payload) if payload.is_liquidation() => FeedMessage::Liquidations(
                decode_entries::<BybitLiquidationInner>(Self::ID, payload.data.into_vec())
                    .into_iter()
                    .map(RawLiquidation::from)
                    .collect(),
            ),
            BybitMessage::Payload(_) => FeedMessage::Ignore,
        })
    }
}

/// Messages received on a [`BybitPerpetualsUsd`] liquidation stream.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum BybitMessage {
    Response(BybitResponse),
    Payload(BybitLiquidationPayload),
}

/// [`BybitPerpetualsUsd`] response to an `op` request (`subscribe`, `ping`).
///
/// ### Raw Payload Examples
/// ```json
/// {"success":true,"ret_msg":"","conn_id":"2324d924-aa4d-45b0-a858-7b8be29ab52b","req_id":"liquidation_sub","op":"subscribe"}
/// {"success":true,"ret_msg":"pong","conn_id":"0970e817-426e-429a-a679-ff7f55e0b16a","op":"ping"}
/// ```
#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct BybitResponse {
    pub op: String,
    pub success: bool,
    #[serde(default)]
    pub ret_msg: String,
}

/// [`BybitPerpetualsUsd`] topic payload.
///
/// `allLiquidation` sends a list of entries, the legacy `liquidation` topic a single object.
/// Each entry is decoded into a [`BybitLiquidationInner`] on its own.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct BybitLiquidationPayload {
    pub topic: String,
    pub data: OneOrMany<serde_json::Value>,
}

impl BybitLiquidationPayload {
    fn is_liquidation(&self) -> bool {
        self.topic
            .split_once('.')
            .map(|(channel, _)| channel)
            .is_some_and(|channel| {
                channel == BybitChannel::ALL_LIQUIDATION.as_ref()
                    || channel == BybitChannel::LIQUIDATION.as_ref()
            })
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// Individual liquidation entry of a [`BybitLiquidationPayload`].
///
/// ### Raw Payload Examples
/// See docs: <https://bybit-exchange.github.io/docs/v5/websocket/public/all-liquidation>
/// ```json
/// {"T": 1739502302929, "s": "ROSEUSDT", "S": "Sell", "v": "20000", "p": "0.04499"}
/// ```
/// Legacy `liquidation` topic:
/// ```json
/// {"updatedTime": 1673251091822, "symbol": "ETHUSDT", "side": "Sell", "size": "2.5", "price": "3000"}
/// ```
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct BybitLiquidationInner {
    #[serde(
        rename = "T",
        alias = "updatedTime",
        default,
        deserialize_with = "de_opt_epoch_ms"
    )]
    pub time: Option<DateTime<Utc>>,

    #[serde(rename = "s", alias = "symbol")]
    pub market: String,

    /// Side of the liquidated position: `Buy` => long.
    #[serde(rename = "S", alias = "side")]
    pub side: String,

    #[serde(
        rename = "v",
        alias = "size",
        alias = "qty",
        deserialize_with = "crate::de::de_str_or_f64"
    )]
    pub quantity: f64,

    #[serde(
        rename = "p",
        alias = "price",
        deserialize_with = "crate::de::de_str_or_f64"
    )]
    pub price: f64,
}

impl From<BybitLiquidationInner> for RawLiquidation {
    fn from(entry: BybitLiquidationInner) -> Self {
        Self {
            symbol: entry.market,
            side: RawSide::Label(entry.side),
            quantity: entry.quantity,
            price: entry.price,
            time: entry.time,
        }
    }
}

fn de_opt_epoch_ms<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    crate::de::de_any_epoch_ms_as_datetime_utc(deserializer).map(Some)
}

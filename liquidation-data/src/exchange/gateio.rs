use super::{
    ContractSizes, Connector, ExchangeId, FeedMessage, PingInterval, RawLiquidation, RawSide,
    WsMessage, decode_entries,
};
use crate::{error::DataError, event::Asset};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// [`GateioFuturesUsd`] WebSocket server base url.
///
/// See docs: <https://www.gate.io/docs/developers/futures/ws/en/#gate-io-futures-websocket-v4>
pub const BASE_URL_GATEIO_FUTURES_USD: &str = "wss://fx-ws.gateio.ws/v4/ws/usdt";

/// [`GateioFuturesUsd`] REST endpoint listing every USDT settled contract.
///
/// See docs: <https://www.gate.io/docs/developers/apiv4/en/#list-all-futures-contracts>
pub const CONTRACTS_URL_GATEIO_FUTURES_USD: &str = "https://api.gateio.ws/api/v4/futures/usdt/contracts";

/// [`GateioFuturesUsd`] application level ping interval.
pub const PING_INTERVAL_GATEIO: Duration = Duration::from_secs(20);

/// [`GateioFuturesUsd`] public liquidation channel.
///
/// See docs: <https://www.gate.io/docs/developers/futures/ws/en/#public-liquidates-order-api>
pub const PUBLIC_LIQUIDATES_CHANNEL: &str = "futures.public_liquidates";

const PING_CHANNEL: &str = "futures.ping";

/// Base currency per contract of the tracked USDT contracts, used until refreshed from
/// [`CONTRACTS_URL_GATEIO_FUTURES_USD`].
pub const DEFAULT_CONTRACT_SIZES_GATEIO: ContractSizes = ContractSizes::new(0.0001, 0.01, 1.0);

/// [`Gate.io`](https://www.gate.io) USDT settled futures liquidation feed.
///
/// Sizes are signed contract counts: the sign is the side of the liquidation order and the
/// magnitude is converted with the contract `quanto_multiplier`.
#[derive(Clone, PartialEq, Debug)]
pub struct GateioFuturesUsd {
    pub contracts: Vec<String>,
    pub contract_sizes: ContractSizes,
}

impl Default for GateioFuturesUsd {
    fn default() -> Self {
        Self {
            contracts: vec!["BTC_USDT".into(), "ETH_USDT".into(), "SOL_USDT".into()],
            contract_sizes: DEFAULT_CONTRACT_SIZES_GATEIO,
        }
    }
}

#[async_trait]
impl Connector for GateioFuturesUsd {
    const ID: ExchangeId = ExchangeId::GateioFuturesUsd;

    fn url(&self) -> Result<Url, DataError> {
        Url::parse(BASE_URL_GATEIO_FUTURES_USD).map_err(DataError::from)
    }

    fn requests(&self) -> Vec<WsMessage> {
        vec![WsMessage::text(
            json!({
                "time": Utc::now().timestamp(),
                "channel": PUBLIC_LIQUIDATES_CHANNEL,
                "event": "subscribe",
                "payload": self.contracts,
            })
            .to_string(),
        )]
    }

    fn ping_interval(&self) -> Option<PingInterval> {
        Some(PingInterval {
            interval: PING_INTERVAL_GATEIO,
            ping: || {
                WsMessage::text(
                    json!({ "time": Utc::now().timestamp(), "channel": PING_CHANNEL }).to_string(),
                )
            },
        })
    }

    fn decode(&self, payload: &str) -> Result<FeedMessage, DataError> {
        let message = serde_json::from_str::<GateioMessage>(payload)
            .map_err(|error| DataError::deserialise(error, payload))?;

        if message.channel != PUBLIC_LIQUIDATES_CHANNEL {
            return Ok(FeedMessage::Ignore);
        }

        Ok(match (message.event.as_str(), message.error, message.result) {
            ("subscribe", Some(error), _) => FeedMessage::SubscriptionAck(Err(format!(
                "code: {}, message: {}",
                error.code, error.message
            ))),
            ("subscribe", None, Some(GateioResult::Status { status })) if status == "success" => {
                FeedMessage::SubscriptionAck(Ok(()))
            }
            ("subscribe", None, result) => {
                FeedMessage::SubscriptionAck(Err(format!("unexpected result: {result:?}")))
            }
            ("update", _, Some(GateioResult::Liquidations(entries))) => FeedMessage::Liquidations(
                decode_entries::<GateioLiquidation>(Self::ID, entries)
                    .into_iter()
                    .map(RawLiquidation::from)
                    .collect(),
            ),
            _ => FeedMessage::Ignore,
        })
    }

    fn contract_sizes(&self) -> ContractSizes {
        self.contract_sizes
    }

    async fn init(&mut self, http: &reqwest::Client) -> Result<(), DataError> {
        let contracts = http
            .get(CONTRACTS_URL_GATEIO_FUTURES_USD)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<GateioContract>>()
            .await?;

        for contract in contracts {
            let Some(asset) = contract
                .name
                .strip_suffix("_USDT")
                .and_then(Asset::from_base)
            else {
                continue;
            };

            if contract.quanto_multiplier.is_finite() && contract.quanto_multiplier > 0.0 {
                debug!(
                    exchange = %Self::ID,
                    %asset,
                    quanto_multiplier = contract.quanto_multiplier,
                    "refreshed contract multiplier"
                );
                self.contract_sizes.set(asset, contract.quanto_multiplier);
            }
        }

        Ok(())
    }
}

/// Messages received on a [`GateioFuturesUsd`] connection.
///
/// ### Raw Payload Examples
/// See docs: <https://www.gate.io/docs/developers/futures/ws/en/#public-liquidates-order-api>
/// ```json
/// {"time":1545404023,"time_ms":1545404023123,"channel":"futures.public_liquidates","event":"subscribe","result":{"status":"success"}}
/// {"time":1545404023,"channel":"futures.public_liquidates","event":"subscribe","error":{"code":2,"message":"unknown contract"},"result":null}
/// {"channel":"futures.public_liquidates","event":"update","time":1541505434,"time_ms":1541505434123,"result":[{"price":215.1,"size":-124,"time_ms":1541486601123,"contract":"BTC_USDT"}]}
/// {"time":1545404023,"time_ms":1545404023123,"channel":"futures.pong","event":"","result":null}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct GateioMessage {
    pub channel: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub error: Option<GateioError>,
    #[serde(default)]
    pub result: Option<GateioResult>,
}

#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct GateioError {
    pub code: i64,
    pub message: String,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum GateioResult {
    Status { status: String },
    /// Decoded into [`GateioLiquidation`]s entry by entry.
    Liquidations(Vec<serde_json::Value>),
}

#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct GateioLiquidation {
    pub contract: String,

    #[serde(deserialize_with = "crate::de::de_str_or_f64")]
    pub price: f64,

    /// Signed contract count, negative for a sell order.
    #[serde(deserialize_with = "crate::de::de_str_or_f64")]
    pub size: f64,

    #[serde(default, deserialize_with = "de_opt_epoch_ms")]
    pub time_ms: Option<DateTime<Utc>>,
}

impl From<GateioLiquidation> for RawLiquidation {
    fn from(liquidation: GateioLiquidation) -> Self {
        Self {
            symbol: liquidation.contract,
            side: RawSide::Signed(liquidation.size),
            quantity: liquidation.size.abs(),
            price: liquidation.price,
            time: liquidation.time_ms,
        }
    }
}

/// [`CONTRACTS_URL_GATEIO_FUTURES_USD`] entry.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct GateioContract {
    pub name: String,
    #[serde(deserialize_with = "crate::de::de_str_or_f64")]
    pub quanto_multiplier: f64,
}

fn de_opt_epoch_ms<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    crate::de::de_any_epoch_ms_as_datetime_utc(deserializer).map(Some)
}

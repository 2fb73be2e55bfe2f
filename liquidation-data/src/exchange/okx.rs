use super::{
    ContractSizes, Connector, ExchangeId, FeedMessage, PingInterval, RawLiquidation, RawSide,
    WsMessage, decode_entries,
};
use crate::{error::DataError, event::Asset};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// [`Okx`] WebSocket server base url.
///
/// See docs: <https://www.okx.com/docs-v5/en/#overview-production-trading-services>
pub const BASE_URL_OKX: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// [`Okx`] REST endpoint listing every perpetual swap instrument, including its contract value.
///
/// See docs: <https://www.okx.com/docs-v5/en/#public-data-rest-api-get-instruments>
pub const INSTRUMENTS_URL_OKX: &str = "https://www.okx.com/api/v5/public/instruments?instType=SWAP";

/// [`Okx`] closes connections that see no traffic for 30s.
///
/// See docs: <https://www.okx.com/docs-v5/en/#overview-websocket-overview>
pub const PING_INTERVAL_OKX: Duration = Duration::from_secs(29);

/// [`Okx`] liquidation orders channel.
///
/// See docs: <https://www.okx.com/docs-v5/en/#public-data-websocket-liquidation-orders-channel>
pub const LIQUIDATION_ORDERS_CHANNEL: &str = "liquidation-orders";

/// Only USDT margined perpetual swaps are tracked.
const USDT_SWAP_SUFFIX: &str = "-USDT-SWAP";

/// Contract values of the tracked USDT swaps, used until refreshed from
/// [`INSTRUMENTS_URL_OKX`].
pub const DEFAULT_CONTRACT_SIZES_OKX: ContractSizes = ContractSizes::new(0.01, 0.1, 1.0);

/// [`Okx`](https://www.okx.com) perpetual swaps liquidation feed.
///
/// Okx reports liquidation sizes in contracts, see [`DEFAULT_CONTRACT_SIZES_OKX`].
#[derive(Clone, PartialEq, Debug)]
pub struct Okx {
    pub contract_sizes: ContractSizes,
}

impl Default for Okx {
    fn default() -> Self {
        Self {
            contract_sizes: DEFAULT_CONTRACT_SIZES_OKX,
        }
    }
}

#[async_trait]
impl Connector for Okx {
    const ID: ExchangeId = ExchangeId::Okx;

    fn url(&self) -> Result<Url, DataError> {
        Url::parse(BASE_URL_OKX).map_err(DataError::from)
    }

    fn requests(&self) -> Vec<WsMessage> {
        vec![WsMessage::text(
            json!({
                "op": "subscribe",
                "args": [{ "channel": LIQUIDATION_ORDERS_CHANNEL, "instType": "SWAP" }],
            })
            .to_string(),
        )]
    }

    fn ping_interval(&self) -> Option<PingInterval> {
        Some(PingInterval {
            interval: PING_INTERVAL_OKX,
            ping: || WsMessage::text("ping"),
        })
    }

    fn decode(&self, payload: &str) -> Result<FeedMessage, DataError> {
        if payload.trim() == "pong" {
            return Ok(FeedMessage::Ignore);
        }

        let message = serde_json::from_str::<OkxMessage>(payload)
            .map_err(|error| DataError::deserialise(error, payload))?;

        Ok(match message {
            OkxMessage::Event(event) => match event.event.as_str() {
                "subscribe" => FeedMessage::SubscriptionAck(Ok(())),
                "error" => FeedMessage::SubscriptionAck(Err(format!(
                    "code: {}, msg: {}",
                    event.code.unwrap_or_default(),
                    event.msg.unwrap_or_default()
                ))),
                _ => FeedMessage::Ignore,
            },
            OkxMessage::Data(payload) if payload.arg.channel == LIQUIDATION_ORDERS_CHANNEL => {
                FeedMessage::Liquidations(
                    decode_entries::<OkxLiquidation>(Self::ID, payload.data)
                        .into_iter()
                        .filter(|liquidation| liquidation.inst_id.ends_with(USDT_SWAP_SUFFIX))
                        .flat_map(OkxLiquidation::into_raw)
                        .collect(),
                )
            }
            OkxMessage::Data(_) => FeedMessage::Ignore,
        })
    }

    fn contract_sizes(&self) -> ContractSizes {
        self.contract_sizes
    }

    async fn init(&mut self, http: &reqwest::Client) -> Result<(), DataError> {
        let instruments = http
            .get(INSTRUMENTS_URL_OKX)
            .send()
            .await?
            .error_for_status()?
            .json::<OkxInstruments>()
            .await?;

        for instrument in instruments.data {
            let Some(asset) = instrument
                .inst_id
                .strip_suffix(USDT_SWAP_SUFFIX)
                .and_then(Asset::from_base)
            else {
                continue;
            };

            if instrument.contract_value.is_finite() && instrument.contract_value > 0.0 {
                debug!(
                    exchange = %Self::ID,
                    %asset,
                    contract_value = instrument.contract_value,
                    "refreshed contract value"
                );
                self.contract_sizes.set(asset, instrument.contract_value);
            }
        }

        Ok(())
    }
}

/// Messages received on an [`Okx`] liquidation stream.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum OkxMessage {
    Event(OkxEvent),
    Data(OkxLiquidationPayload),
}

/// [`Okx`] operation response.
///
/// ### Raw Payload Examples
/// See docs: <https://www.okx.com/docs-v5/en/#overview-websocket-subscribe>
/// ```json
/// {"event":"subscribe","arg":{"channel":"liquidation-orders","instType":"SWAP"},"connId":"a4d3ae55"}
/// {"event":"error","code":"60012","msg":"Invalid request: {\"op\": \"subscribe\"}","connId":"a4d3ae55"}
/// ```
#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct OkxEvent {
    pub event: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

/// Entries are kept undecoded so each instrument, and each detail, is decoded on its own.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct OkxLiquidationPayload {
    pub arg: OkxArg,
    pub data: Vec<serde_json::Value>,
}

#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct OkxArg {
    pub channel: String,
}

/// [`Okx`] liquidation orders of a single instrument.
///
/// ### Raw Payload Examples
/// ```json
/// {
///     "details": [
///         {"bkLoss": "0", "bkPx": "0.007831", "ccy": "", "posSide": "short", "side": "buy", "sz": "13", "ts": "1692266434010"}
///     ],
///     "instFamily": "IOST-USDT",
///     "instId": "IOST-USDT-SWAP",
///     "instType": "SWAP",
///     "uly": "IOST-USDT"
/// }
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct OkxLiquidation {
    #[serde(rename = "instId")]
    pub inst_id: String,
    /// Decoded into [`OkxLiquidationDetail`]s once the instrument is known to be tracked.
    pub details: Vec<serde_json::Value>,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct OkxLiquidationDetail {
    /// Side of the liquidation order.
    pub side: String,

    /// Side of the liquidated position, empty in net position mode.
    #[serde(rename = "posSide", default)]
    pub pos_side: String,

    #[serde(rename = "bkPx", deserialize_with = "crate::de::de_str_or_f64")]
    pub bankruptcy_price: f64,

    /// Size in contracts.
    #[serde(rename = "sz", deserialize_with = "crate::de::de_str_or_f64")]
    pub size: f64,

    #[serde(deserialize_with = "crate::de::de_any_epoch_ms_as_datetime_utc")]
    pub ts: DateTime<Utc>,
}

impl OkxLiquidation {
    fn into_raw(self) -> impl Iterator<Item = RawLiquidation> {
        let inst_id = self.inst_id;
        let details = decode_entries::<OkxLiquidationDetail>(Okx::ID, self.details);
        details.into_iter().map(move |detail| {
            let side = match detail.pos_side.as_str() {
                "long" | "short" => RawSide::Position(detail.pos_side),
                _ => RawSide::Label(detail.side),
            };

            RawLiquidation {
                symbol: inst_id.clone(),
                side,
                quantity: detail.size,
                price: detail.bankruptcy_price,
                time: Some(detail.ts),
            }
        })
    }
}

/// [`INSTRUMENTS_URL_OKX`] response.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct OkxInstruments {
    pub data: Vec<OkxInstrument>,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct OkxInstrument {
    #[serde(rename = "instId")]
    pub inst_id: String,
    #[serde(rename = "ctVal", deserialize_with = "crate::de::de_str_or_f64")]
    pub contract_value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::de::datetime_utc_from_epoch_duration;

    mod de {
        use super::*;

        #[test]
        fn test_okx_liquidation_message() {
            struct TestCase {
                input: &'static str,
                expected: Result<FeedMessage, ()>,
            }

            let tests = vec![
                // TC0: subscription success
                TestCase {
                    input: r#"{"event":"subscribe","arg":{"channel":"liquidation-orders","instType":"SWAP"},"connId":"a4d3ae55"}"#,
                    expected: Ok(FeedMessage::SubscriptionAck(Ok(()))),
                },
                // TC1: subscription failure
                TestCase {
                    input: r#"{"event":"error","code":"60012","msg":"Invalid request","connId":"a4d3ae55"}"#,
                    expected: Ok(FeedMessage::SubscriptionAck(Err(
                        "code: 60012, msg: Invalid request".to_string(),
                    ))),
                },
                // TC2: pong keep-alive
                TestCase {
                    input: "pong",
                    expected: Ok(FeedMessage::Ignore),
                },
                // TC3: liquidation w/ posSide, non USDT swap filtered out
                TestCase {
                    input: r#"
                    {
                        "arg": {"channel": "liquidation-orders", "instType": "SWAP"},
                        "data": [
                            {
                                "details": [
                                    {"bkLoss": "0", "bkPx": "3000.5", "ccy": "", "posSide": "short", "side": "buy", "sz": "13", "ts": "1692266434010"}
                                ],
                                "instFamily": "ETH-USDT",
                                "instId": "ETH-USDT-SWAP",
                                "instType": "SWAP",
                                "uly": "ETH-USDT"
                            },
                            {
                                "details": [
                                    {"bkLoss": "0", "bkPx": "60000", "ccy": "", "posSide": "long", "side": "sell", "sz": "2", "ts": "1692266434010"}
                                ],
                                "instFamily": "BTC-USD",
                                "instId": "BTC-USD-SWAP",
                                "instType": "SWAP",
                                "uly": "BTC-USD"
                            }
                        ]
                    }
                    "#,
                    expected: Ok(FeedMessage::Liquidations(vec![RawLiquidation {
                        symbol: "ETH-USDT-SWAP".to_string(),
                        side: RawSide::Position("short".to_string()),
                        quantity: 13.0,
                        price: 3000.5,
                        time: Some(datetime_utc_from_epoch_duration(Duration::from_millis(
                            1692266434010,
                        ))),
                    }])),
                },
                // TC4: net mode liquidation falls back to order side
                TestCase {
                    input: r#"{"arg":{"channel":"liquidation-orders","instType":"SWAP"},"data":[{"details":[{"bkLoss":"0","bkPx":"150","ccy":"","posSide":"","side":"sell","sz":"4","ts":"1"}],"instId":"SOL-USDT-SWAP","instType":"SWAP"}]}"#,
                    expected: Ok(FeedMessage::Liquidations(vec![RawLiquidation {
                        symbol: "SOL-USDT-SWAP".to_string(),
                        side: RawSide::Label("sell".to_string()),
                        quantity: 4.0,
                        price: 150.0,
                        time: Some(datetime_utc_from_epoch_duration(Duration::from_millis(1))),
                    }])),
                },
                // TC5: unrelated channel ignored
                TestCase {
                    input: r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[]}"#,
                    expected: Ok(FeedMessage::Ignore),
                },
                // TC6: malformed detail is skipped, leaving an empty batch
                TestCase {
                    input: r#"{"arg":{"channel":"liquidation-orders"},"data":[{"details":[{"bkPx":"x","side":"sell","sz":"4","ts":"1"}],"instId":"SOL-USDT-SWAP"}]}"#,
                    expected: Ok(FeedMessage::Liquidations(vec![])),
                },
                // TC7: malformed untracked instrument does not drop the tracked one
                TestCase {
                    input: r#"
                    {
                        "arg": {"channel": "liquidation-orders", "instType": "SWAP"},
                        "data": [
                            {
                                "details": [
                                    {"bkLoss": "0", "bkPx": "3000", "ccy": "", "posSide": "long", "side": "sell", "sz": "5", "ts": "1692266434010"}
                                ],
                                "instId": "ETH-USDT-SWAP",
                                "instType": "SWAP"
                            },
                            {
                                "details": [
                                    {"bkLoss": "0", "bkPx": "", "ccy": "", "posSide": "short", "side": "buy", "sz": "100", "ts": "1692266434010"}
                                ],
                                "instId": "DOGE-USDT-SWAP",
                                "instType": "SWAP"
                            }
                        ]
                    }
                    "#,
                    expected: Ok(FeedMessage::Liquidations(vec![RawLiquidation {
                        symbol: "ETH-USDT-SWAP".to_string(),
                        side: RawSide::Position("long".to_string()),
                        quantity: 5.0,
                        price: 3000.0,
                        time: Some(datetime_utc_from_epoch_duration(Duration::from_millis(
                            1692266434010,
                        ))),
                    }])),
                },
                // TC8: malformed detail only drops itself, not its valid sibling
                TestCase {
                    input: r#"{"arg":{"channel":"liquidation-orders"},"data":[{"details":[{"bkPx":"","side":"buy","sz":"1","ts":"1"},{"bkPx":"150","posSide":"","side":"buy","sz":"2","ts":"1"}],"instId":"SOL-USDT-SWAP"}]}"#,
                    expected: Ok(FeedMessage::Liquidations(vec![RawLiquidation {
                        symbol: "SOL-USDT-SWAP".to_string(),
                        side: RawSide::Label("buy".to_string()),
                        quantity: 2.0,
                        price: 150.0,
                        time: Some(datetime_utc_from_epoch_duration(Duration::from_millis(1))),
                    }])),
                },
                // TC9: payload that is not JSON is a decode error
                TestCase {
                    input: r#"{"arg":{"channel":"liquidation-orders"},"data":"#,
                    expected: Err(()),
                },
            ];

            let connector = Okx::default();

            for (index, test) in tests.into_iter().enumerate() {
                let actual = connector.decode(test.input).map_err(|_| ());
                assert_eq!(actual, test.expected, "TC{} failed", index);
            }
        }

        #[test]
        fn test_okx_instruments() {
            let input = r#"
            {
                "code": "0",
                "msg": "",
                "data": [
                    {"instId": "BTC-USDT-SWAP", "ctVal": "0.01", "ctValCcy": "BTC", "instType": "SWAP"},
                    {"instId": "BTC-USD-SWAP", "ctVal": "100", "ctValCcy": "USD", "instType": "SWAP"}
                ]
            }
            "#;

            let actual = serde_json::from_str::<OkxInstruments>(input).unwrap();

            assert_eq!(actual.data.len(), 2);
            assert_eq!(actual.data[0].inst_id, "BTC-USDT-SWAP");
            assert_eq!(actual.data[0].contract_value, 0.01);
        }
    }

    #[test]
    fn test_okx_subscription_request() {
        let requests = Okx::default().requests();

        let WsMessage::Text(text) = &requests[0] else {
            panic!("expected text subscription frame");
        };
        let actual: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();

        assert_eq!(
            actual,
            json!({
                "op": "subscribe",
                "args": [{"channel": "liquidation-orders", "instType": "SWAP"}]
            })
        );
    }

    #[test]
    fn test_okx_default_contract_sizes() {
        let sizes = Okx::default().contract_sizes();
        assert_eq!(sizes.get(Asset::Btc), 0.01);
        assert_eq!(sizes.get(Asset::Eth), 0.1);
        assert_eq!(sizes.get(Asset::Sol), 1.0);
    }
}

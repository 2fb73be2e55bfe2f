use crate::{event::LiquidationEvent, stats::StatsSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message pushed to a subscriber, tagged by `type`.
///
/// ### Payload Examples
/// ```json
/// {"type":"welcome","message":"Connected to liquidation stream","timestamp":"2024-01-01T00:00:00Z"}
/// {"type":"snapshot","BTC":{"longCount":1,"shortCount":0,"cumulativeValue":60000.0},"ETH":{..},"SOL":{..}}
/// {"type":"liquidation","asset":"ETH","side":"SHORT","quantity":2.5,"price":3000.0,"notionalValue":7500.0,"sourceExchange":"bybit_perpetuals_usd","observedAt":"2024-01-01T00:00:00Z"}
/// {"type":"recent","events":[..]}
/// {"type":"heartbeat_ack","timestamp":"2024-01-01T00:00:00Z"}
/// {"type":"going_away","reason":"heartbeat timeout"}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Snapshot(StatsSnapshot),
    Liquidation(LiquidationEvent),
    /// Recent event log, newest first.
    Recent {
        events: Vec<LiquidationEvent>,
    },
    HeartbeatAck {
        timestamp: DateTime<Utc>,
    },
    /// Sent once before the server drops the subscriber.
    GoingAway {
        reason: String,
    },
}

impl ServerMessage {
    pub fn welcome(message: impl Into<String>) -> Self {
        Self::Welcome {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat_ack() -> Self {
        Self::HeartbeatAck {
            timestamp: Utc::now(),
        }
    }

    pub fn going_away(reason: impl Into<String>) -> Self {
        Self::GoingAway {
            reason: reason.into(),
        }
    }

    /// Serialise to the JSON text sent over the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Message received from a subscriber, tagged by `type`.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keep-alive, any extra payload is ignored.
    Heartbeat,
}

use crate::exchange::ExchangeId;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// All errors generated by an exchange feed in `liquidation-data`.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum DataError {
    #[error("failed to parse exchange endpoint url: {0}")]
    UrlParse(String),

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("ExchangeStream terminated: {0}")]
    Terminated(String),

    #[error("{exchange} rejected subscription: {reason}")]
    SubscriptionRejected { exchange: ExchangeId, reason: String },

    #[error("{exchange} subscription not acknowledged within {timeout_ms}ms")]
    AckTimeout { exchange: ExchangeId, timeout_ms: u64 },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("failed to deserialise payload: {error}, payload: {payload}")]
    Deserialise { error: String, payload: String },
}

impl DataError {
    /// Determine if an error can never be recovered by reconnecting, in which case the feed is
    /// disabled rather than retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DataError::UrlParse(_))
    }

    /// Construct a [`DataError::Deserialise`] from a serde error and the offending payload.
    pub fn deserialise(error: serde_json::Error, payload: &str) -> Self {
        Self::Deserialise {
            error: error.to_string(),
            payload: payload.to_owned(),
        }
    }
}

impl From<tungstenite::Error> for DataError {
    fn from(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Terminated(error.to_string())
            }
            other => Self::Socket(other.to_string()),
        }
    }
}

impl From<url::ParseError> for DataError {
    fn from(error: url::ParseError) -> Self {
        Self::UrlParse(error.to_string())
    }
}

impl From<reqwest::Error> for DataError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error.to_string())
    }
}

/// Reasons a raw exchange liquidation cannot be normalised. The event is dropped, the feed
/// connection is unaffected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormaliseError {
    #[error("{exchange} symbol not tracked: {symbol}")]
    UnsupportedSymbol { exchange: ExchangeId, symbol: String },

    #[error("{exchange} side not recognised: {side}")]
    UnsupportedSide { exchange: ExchangeId, side: String },

    #[error("{exchange} {field} must be finite and positive, got {value}")]
    InvalidNumber {
        exchange: ExchangeId,
        field: &'static str,
        value: f64,
    },
}

/// Exchange feed session: connect, subscribe, validate the acknowledgement, stream & reconnect.
pub mod feed;

/// Reconnection backoff policy.
pub mod reconnect;

/// Idle read timeout wrapper for exchange WebSocket streams.
pub mod timeout;

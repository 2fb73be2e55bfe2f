use super::{
    reconnect::{Backoff, ReconnectPolicy},
    timeout::{DEFAULT_WS_READ_TIMEOUT, TimeoutStream},
};
use crate::{
    error::DataError,
    event::LiquidationEvent,
    exchange::{Connector, ExchangeId, FeedMessage, PingInterval, WsMessage},
    normalise::normalise_liquidation,
};
use derive_more::Display;
use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, Interval, MissedTickBehavior},
};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};
use url::Url;

/// Lifecycle of an exchange feed connection.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    /// Not connected, either before the first attempt or after shutdown.
    #[display("disconnected")]
    Disconnected,
    #[display("connecting")]
    Connecting,
    /// Subscription handshake sent, awaiting the exchange acknowledgement.
    #[display("subscribed")]
    Subscribed,
    /// Subscription acknowledged.
    #[display("streaming")]
    Streaming,
    /// Waiting out the backoff delay before the next attempt.
    #[display("reconnecting")]
    Reconnecting,
    /// Stopped permanently after an unrecoverable error.
    #[display("disabled")]
    Disabled,
}

/// Timeouts and reconnection policy of an exchange feed.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct FeedConfig {
    pub connect_timeout: Duration,
    /// Maximum wait for the subscription acknowledgement after the handshake is sent.
    pub ack_timeout: Duration,
    /// Reconnect if nothing has been received for this long.
    pub read_timeout: Duration,
    /// Bound on sending the close frame during shutdown.
    pub close_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            read_timeout: DEFAULT_WS_READ_TIMEOUT,
            close_timeout: Duration::from_secs(2),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// How a single connection attempt ended.
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Reconnect { streamed: bool, reason: DataError },
}

/// Run an exchange feed until shutdown is signalled, reconnecting with backoff whenever the
/// connection is lost.
///
/// Every normalised [`LiquidationEvent`] is sent to `event_tx` in arrival order. Each transition
/// is published on `state_tx`. The feed stops early, in [`FeedState::Disabled`], if it hits an
/// error reconnecting cannot fix.
pub async fn run_feed<C>(
    connector: C,
    config: FeedConfig,
    event_tx: mpsc::Sender<LiquidationEvent>,
    state_tx: watch::Sender<FeedState>,
    mut shutdown: watch::Receiver<bool>,
) where
    C: Connector,
{
    let exchange = C::ID;

    let url = match connector.url() {
        Ok(url) => url,
        Err(error) => {
            error!(%exchange, %error, "invalid feed endpoint, disabling feed");
            state_tx.send_replace(FeedState::Disabled);
            return;
        }
    };

    let mut backoff = Backoff::new(config.reconnect);

    loop {
        if *shutdown.borrow() {
            break;
        }

        state_tx.send_replace(FeedState::Connecting);
        info!(%exchange, %url, "connecting to exchange feed");

        match run_session(&connector, &url, &config, &event_tx, &state_tx, &mut shutdown).await {
            SessionEnd::Shutdown => break,
            SessionEnd::Reconnect { reason, .. } if reason.is_fatal() => {
                error!(%exchange, error = %reason, "unrecoverable feed error, disabling feed");
                state_tx.send_replace(FeedState::Disabled);
                return;
            }
            SessionEnd::Reconnect { streamed, reason } => {
                if streamed {
                    backoff.reset();
                }

                let delay = backoff.next_delay();
                warn!(
                    %exchange,
                    error = %reason,
                    delay_ms = delay.as_millis() as u64,
                    "feed disconnected, reconnecting after backoff"
                );
                state_tx.send_replace(FeedState::Reconnecting);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    info!(%exchange, "exchange feed stopped");
    state_tx.send_replace(FeedState::Disconnected);
}

async fn run_session<C>(
    connector: &C,
    url: &Url,
    config: &FeedConfig,
    event_tx: &mpsc::Sender<LiquidationEvent>,
    state_tx: &watch::Sender<FeedState>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd
where
    C: Connector,
{
    let exchange = C::ID;
    let reconnect = |streamed: bool, reason: DataError| SessionEnd::Reconnect { streamed, reason };

    let connect = tokio::time::timeout(config.connect_timeout, connect_async(url.as_str()));
    let websocket = tokio::select! {
        result = connect => match result {
            Ok(Ok((websocket, _response))) => websocket,
            Ok(Err(error)) => return reconnect(false, DataError::from(error)),
            Err(_elapsed) => {
                return reconnect(
                    false,
                    DataError::Socket(format!(
                        "connect timed out after {}ms",
                        config.connect_timeout.as_millis()
                    )),
                );
            }
        },
        _ = shutdown.changed() => return SessionEnd::Shutdown,
    };

    let (mut ws_sink, ws_stream) = websocket.split();
    let mut ws_stream = TimeoutStream::new(ws_stream, exchange, config.read_timeout);

    for request in connector.requests() {
        if let Err(error) = ws_sink.send(request).await {
            return reconnect(false, DataError::from(error));
        }
    }
    state_tx.send_replace(FeedState::Subscribed);
    debug!(%exchange, "subscription handshake sent");

    let ack_deadline = tokio::time::sleep(config.ack_timeout);
    tokio::pin!(ack_deadline);
    let mut acknowledged = false;

    let mut ping = connector.ping_interval().map(PingTimer::new);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                close(&mut ws_sink, exchange, config.close_timeout).await;
                return SessionEnd::Shutdown;
            }

            _ = &mut ack_deadline, if !acknowledged => {
                return reconnect(false, DataError::AckTimeout {
                    exchange,
                    timeout_ms: config.ack_timeout.as_millis() as u64,
                });
            }

            ping_message = next_ping(&mut ping) => {
                if let Err(error) = ws_sink.send(ping_message).await {
                    return reconnect(acknowledged, DataError::from(error));
                }
            }

            message = ws_stream.next() => {
                let text = match message {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(frame))) => {
                        return reconnect(
                            acknowledged,
                            DataError::Terminated(format!("close frame received: {frame:?}")),
                        );
                    }
                    Some(Ok(other)) => {
                        debug!(%exchange, payload = ?other, "ignoring non-text frame");
                        continue;
                    }
                    Some(Err(error)) => return reconnect(acknowledged, DataError::from(error)),
                    None if ws_stream.timed_out() => {
                        return reconnect(
                            acknowledged,
                            DataError::Terminated(format!(
                                "no data received for {}s",
                                config.read_timeout.as_secs()
                            )),
                        );
                    }
                    None => {
                        return reconnect(
                            acknowledged,
                            DataError::Terminated("stream ended".to_string()),
                        );
                    }
                };

                match connector.decode(text.as_str()) {
                    Ok(FeedMessage::SubscriptionAck(Ok(()))) => {
                        if !acknowledged {
                            acknowledged = true;
                            state_tx.send_replace(FeedState::Streaming);
                            info!(%exchange, "subscription acknowledged, streaming liquidations");
                        }
                    }
                    Ok(FeedMessage::SubscriptionAck(Err(reason))) => {
                        error!(%exchange, %reason, "subscription rejected");
                        return reconnect(
                            acknowledged,
                            DataError::SubscriptionRejected { exchange, reason },
                        );
                    }
                    Ok(FeedMessage::Liquidations(liquidations)) => {
                        let contract_sizes = connector.contract_sizes();

                        for raw in liquidations {
                            match normalise_liquidation(exchange, raw, &contract_sizes) {
                                Ok(event) => {
                                    if event_tx.send(event).await.is_err() {
                                        warn!(%exchange, "event pipeline closed, stopping feed");
                                        close(&mut ws_sink, exchange, config.close_timeout).await;
                                        return SessionEnd::Shutdown;
                                    }
                                }
                                Err(error) => {
                                    debug!(%exchange, %error, "dropping liquidation");
                                }
                            }
                        }
                    }
                    Ok(FeedMessage::Ignore) => {}
                    Err(error) => {
                        debug!(%exchange, %error, "skipping undecodable frame");
                    }
                }
            }
        }
    }
}

/// Send a close frame, bounded by `close_timeout`.
async fn close<S>(ws_sink: &mut S, exchange: ExchangeId, close_timeout: Duration)
where
    S: Sink<WsMessage> + Unpin,
{
    let close = async {
        let _ = ws_sink.send(WsMessage::Close(None)).await;
        let _ = ws_sink.close().await;
    };

    if tokio::time::timeout(close_timeout, close).await.is_err() {
        warn!(%exchange, "timed out sending close frame");
    }
}

#[derive(Debug)]
struct PingTimer {
    interval: Interval,
    ping: fn() -> WsMessage,
}

impl PingTimer {
    fn new(ping: PingInterval) -> Self {
        let mut interval =
            tokio::time::interval_at(Instant::now() + ping.interval, ping.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            interval,
            ping: ping.ping,
        }
    }
}

/// Resolve with the next keep-alive frame, or never for feeds without an application ping.
async fn next_ping(ping: &mut Option<PingTimer>) -> WsMessage {
    match ping {
        Some(timer) => {
            timer.interval.tick().await;
            (timer.ping)()
        }
        None => std::future::pending().await,
    }
}

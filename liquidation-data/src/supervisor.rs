use crate::{
    event::LiquidationEvent,
    exchange::{
        Connector, ExchangeId, binance::BinanceFuturesUsd, bybit::BybitPerpetualsUsd,
        gateio::GateioFuturesUsd, okx::Okx,
    },
    streams::feed::{FeedConfig, FeedState, run_feed},
};
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{info, warn};

/// Timeout of the REST requests made while initialising a feed.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct FeedHandle {
    exchange: ExchangeId,
    state: watch::Receiver<FeedState>,
    task: JoinHandle<()>,
}

/// Runs every exchange feed as an independent task.
///
/// A feed failing, reconnecting or being disabled never affects the other feeds.
#[derive(Debug)]
pub struct FeedSupervisor {
    event_tx: mpsc::Sender<LiquidationEvent>,
    config: FeedConfig,
    http: reqwest::Client,
    shutdown_tx: watch::Sender<bool>,
    feeds: Vec<FeedHandle>,
}

impl FeedSupervisor {
    pub fn new(event_tx: mpsc::Sender<LiquidationEvent>) -> Self {
        Self::with_config(event_tx, FeedConfig::default())
    }

    pub fn with_config(event_tx: mpsc::Sender<LiquidationEvent>, config: FeedConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|error| {
                warn!(%error, "failed to build configured HTTP client, using defaults");
                reqwest::Client::new()
            });

        Self {
            event_tx,
            config,
            http,
            shutdown_tx: watch::Sender::new(false),
            feeds: Vec::new(),
        }
    }

    /// Spawn a feed task for the provided [`Connector`].
    ///
    /// The connector is initialised first (eg/ contract sizes refreshed over REST). A failed
    /// initialisation is logged and the feed runs with the connector's defaults.
    pub fn spawn<C>(&mut self, mut connector: C)
    where
        C: Connector,
    {
        let exchange = C::ID;
        let (state_tx, state_rx) = watch::channel(FeedState::Disconnected);

        let http = self.http.clone();
        let event_tx = self.event_tx.clone();
        let shutdown = self.shutdown_tx.subscribe();
        let config = self.config;

        let task = tokio::spawn(async move {
            if let Err(error) = connector.init(&http).await {
                warn!(%exchange, %error, "failed to initialise feed, continuing with defaults");
            }
            run_feed(connector, config, event_tx, state_tx, shutdown).await
        });

        info!("Spawned {} liquidation feed", exchange);
        self.feeds.push(FeedHandle {
            exchange,
            state: state_rx,
            task,
        });
    }

    /// Spawn the default [`Connector`] of an exchange.
    pub fn spawn_exchange(&mut self, exchange: ExchangeId) {
        match exchange {
            ExchangeId::BinanceFuturesUsd => self.spawn(BinanceFuturesUsd::default()),
            ExchangeId::BybitPerpetualsUsd => self.spawn(BybitPerpetualsUsd::default()),
            ExchangeId::GateioFuturesUsd => self.spawn(GateioFuturesUsd::default()),
            ExchangeId::Okx => self.spawn(Okx::default()),
        }
    }

    /// Current [`FeedState`] of every spawned feed.
    pub fn states(&self) -> Vec<(ExchangeId, FeedState)> {
        self.feeds
            .iter()
            .map(|feed| (feed.exchange, *feed.state.borrow()))
            .collect()
    }

    /// Watch the [`FeedState`] transitions of an exchange feed.
    pub fn watch(&self, exchange: ExchangeId) -> Option<watch::Receiver<FeedState>> {
        self.feeds
            .iter()
            .find(|feed| feed.exchange == exchange)
            .map(|feed| feed.state.clone())
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Signal every feed to close its connection and wait up to `timeout` for all of them to
    /// finish. Feeds still running at the deadline are aborted.
    pub async fn shutdown(self, timeout: Duration) {
        self.shutdown_tx.send_replace(true);
        let deadline = tokio::time::Instant::now() + timeout;

        for mut feed in self.feeds {
            match tokio::time::timeout_at(deadline, &mut feed.task).await {
                Ok(Ok(())) => info!("{} feed shut down", feed.exchange),
                Ok(Err(error)) => warn!(exchange = %feed.exchange, %error, "feed task failed"),
                Err(_) => {
                    warn!(exchange = %feed.exchange, "feed did not shut down in time, aborting");
                    feed.task.abort();
                }
            }
        }
    }
}

use crate::{
    config::{Config, LogFormat},
    session::handle_client,
};
use liquidation_data::{
    broadcast::Broadcaster, pipeline::run_pipeline, stats::StatsAggregator,
    supervisor::FeedSupervisor,
};
use std::{process::ExitCode, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
    task::JoinSet,
};
use tracing::{error, info, warn};

mod config;
mod session;

/// Capacity of the channel between the exchange feeds and the event pipeline.
const EVENT_BUFFER: usize = 1024;

/// Reason sent to every subscriber when the server stops.
const REASON_SHUTDOWN: &str = "server shutting down";

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("liquidation-data-server: {error}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    init_logging(config.log_format);

    info!("Starting liquidation-data WebSocket server");
    info!(
        "Subscriber buffer: {}, heartbeat timeout: {:?}, sweep interval: {:?}",
        config.broadcast.client_buffer,
        config.broadcast.heartbeat_timeout,
        config.broadcast.sweep_interval
    );

    let listener = match TcpListener::bind(config.addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(addr = %config.addr, %error, "failed to bind WebSocket server");
            return ExitCode::FAILURE;
        }
    };
    info!("WebSocket server listening on ws://{}", config.addr);

    let aggregator = Arc::new(StatsAggregator::new());
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&aggregator), config.broadcast));

    // Exchange feeds -> pipeline -> subscribers
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let mut supervisor = FeedSupervisor::new(event_tx);
    for exchange in &config.feeds {
        supervisor.spawn_exchange(*exchange);
    }
    let pipeline = tokio::spawn(run_pipeline(
        event_rx,
        Arc::clone(&aggregator),
        Arc::clone(&broadcaster),
    ));

    // Stale subscriber eviction
    let (sweep_shutdown_tx, sweep_shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn({
        let broadcaster = Arc::clone(&broadcaster);
        async move { broadcaster.run_sweep(sweep_shutdown_rx).await }
    });

    // Accept subscribers until Ctrl-C / SIGTERM
    let mut sessions = JoinSet::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    info!("New WebSocket connection from {}", peer_addr);
                    sessions.spawn(handle_client(stream, peer_addr, Arc::clone(&broadcaster)));
                }
                Err(error) => warn!(%error, "failed to accept connection"),
            },
            Some(result) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(error) = result {
                    warn!(%error, "subscriber session failed");
                }
            }
        }
    }

    // Stop accepting, close the exchange feeds, then say goodbye to every subscriber
    drop(listener);
    supervisor.shutdown(config.shutdown_grace).await;
    let closed = broadcaster.close_all(REASON_SHUTDOWN);
    info!("Closing {} subscriber sessions", closed);

    let drained = tokio::time::timeout(config.shutdown_grace, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            remaining = sessions.len(),
            "subscriber sessions did not close in time, aborting"
        );
        sessions.shutdown().await;
    }

    let _ = sweep_shutdown_tx.send(true);
    let _ = sweeper.await;

    // Every feed sender is dropped by now, so the pipeline drains & stops
    if tokio::time::timeout(config.shutdown_grace, pipeline).await.is_err() {
        warn!("event pipeline did not stop in time");
    }

    info!("liquidation-data WebSocket server stopped");
    ExitCode::SUCCESS
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(%error, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Received Ctrl-C, shutting down"),
        _ = terminate => warn!("Received SIGTERM, shutting down"),
    }
}

// Initialise an INFO `Subscriber` for `Tracing` logs and install it as the global default.
fn init_logging(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        // Filter messages based on the INFO
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        // Disable colours on release builds
        .with_ansi(cfg!(debug_assertions));

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

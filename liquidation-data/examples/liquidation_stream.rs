use liquidation_data::{exchange::ExchangeId, supervisor::FeedSupervisor};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
    // Initialise INFO Tracing log subscriber
    init_logging();

    println!("\n🔴 Starting Liquidation Data Stream...");
    println!("📡 Connecting to Bybit, Binance, OKX and Gate.io...");
    println!("💥 Waiting for BTC, ETH & SOL liquidation events...\n");

    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(1024);

    // Run every exchange feed as an independent task
    let mut supervisor = FeedSupervisor::new(event_tx);
    for exchange in ExchangeId::ALL {
        supervisor.spawn_exchange(exchange);
    }

    // Stream normalised liquidation events until Ctrl-C
    let mut event_count = 0;
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                event_count += 1;
                info!("💥 LIQUIDATION #{} => {event:?}", event_count);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    supervisor.shutdown(Duration::from_secs(2)).await;
}

// Initialise an INFO `Subscriber` for `Tracing` logs and install it as the global default.
fn init_logging() {
    tracing_subscriber::fmt()
        // Filter messages based on the INFO
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        // Disable colours on release builds
        .with_ansi(cfg!(debug_assertions))
        // Install this Tracing subscriber as global default
        .init()
}

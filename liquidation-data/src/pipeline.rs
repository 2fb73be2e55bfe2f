use crate::{broadcast::Broadcaster, event::LiquidationEvent, stats::StatsAggregator};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Single writer connecting the exchange feeds to the aggregator and the subscribers.
///
/// For every event received from the feeds: apply it to the [`StatsAggregator`], then publish
/// the event followed by the post-update snapshot. Processing events one at a time means
/// subscribers receive snapshots in the order they were produced.
///
/// Runs until every feed has dropped its sender.
pub async fn run_pipeline(
    mut event_rx: mpsc::Receiver<LiquidationEvent>,
    aggregator: Arc<StatsAggregator>,
    broadcaster: Arc<Broadcaster>,
) {
    while let Some(event) = event_rx.recv().await {
        process(&event, &aggregator, &broadcaster);
    }

    info!("Liquidation event pipeline stopped, every feed closed");
}

fn process(event: &LiquidationEvent, aggregator: &StatsAggregator, broadcaster: &Broadcaster) {
    if !event.is_valid() {
        error!(?event, "dropping invalid liquidation event");
        return;
    }

    info!(
        "LIQ EVENT {} {} {} qty {} @ {} value {:.2}",
        event.source_exchange,
        event.asset,
        event.side,
        event.quantity,
        event.price,
        event.notional_value
    );

    let snapshot = aggregator.apply(event);
    let delivered = broadcaster.publish(event);
    broadcaster.publish_snapshot(&snapshot);

    debug!("Liquidation sent to {} subscribers", delivered);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broadcast::BroadcastConfig,
        event::{Asset, Side},
        exchange::ExchangeId,
        message::ServerMessage,
        stats::AssetStats,
    };
    use chrono::Utc;

    #[tokio::test]
    async fn test_pipeline_applies_then_publishes_event_and_snapshot() {
        let aggregator = Arc::new(StatsAggregator::new());
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&aggregator),
            BroadcastConfig::default(),
        ));
        let (sink, mut rx) = mpsc::channel(16);
        broadcaster.register(sink);

        let (event_tx, event_rx) = mpsc::channel(16);
        let pipeline = tokio::spawn(run_pipeline(
            event_rx,
            Arc::clone(&aggregator),
            Arc::clone(&broadcaster),
        ));

        let event = LiquidationEvent::new(
            Asset::Btc,
            Side::Long,
            0.5,
            60000.0,
            ExchangeId::BinanceFuturesUsd,
            Utc::now(),
        )
        .unwrap();
        let mut invalid = event.clone();
        invalid.price = -1.0;

        event_tx.send(invalid).await.unwrap();
        event_tx.send(event.clone()).await.unwrap();
        drop(event_tx);
        pipeline.await.unwrap();

        // Registration snapshot & recent log
        assert!(matches!(*rx.recv().await.unwrap(), ServerMessage::Snapshot(_)));
        assert!(matches!(*rx.recv().await.unwrap(), ServerMessage::Recent { .. }));

        assert_eq!(*rx.recv().await.unwrap(), ServerMessage::Liquidation(event));
        let message = rx.recv().await.unwrap();
        let ServerMessage::Snapshot(snapshot) = message.as_ref() else {
            panic!("expected snapshot after liquidation");
        };
        assert_eq!(
            snapshot.get(Asset::Btc),
            AssetStats {
                long_count: 1,
                short_count: 0,
                cumulative_value: 30000.0,
            }
        );
        assert!(rx.try_recv().is_err());
    }
}

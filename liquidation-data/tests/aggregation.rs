use chrono::Utc;
use liquidation_data::{
    event::{Asset, LiquidationEvent, Side},
    exchange::ExchangeId,
    stats::StatsAggregator,
};
use std::sync::Arc;

const TASKS: usize = 8;
const EVENTS_PER_TASK: usize = 250;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_apply_loses_no_updates() {
    let aggregator = Arc::new(StatsAggregator::new());

    let tasks = (0..TASKS)
        .map(|task| {
            let aggregator = Arc::clone(&aggregator);
            tokio::spawn(async move {
                for index in 0..EVENTS_PER_TASK {
                    let side = if (task + index) % 2 == 0 {
                        Side::Long
                    } else {
                        Side::Short
                    };
                    let event = LiquidationEvent::new(
                        Asset::ALL[task % Asset::COUNT],
                        side,
                        1.0,
                        100.0,
                        ExchangeId::ALL[task % ExchangeId::ALL.len()],
                        Utc::now(),
                    )
                    .unwrap();

                    aggregator.apply(&event);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect::<Vec<_>>();

    for task in tasks {
        task.await.unwrap();
    }

    let snapshot = aggregator.snapshot();

    let total_count = Asset::ALL
        .into_iter()
        .map(|asset| snapshot.get(asset).total_count())
        .sum::<u64>();
    let total_value = Asset::ALL
        .into_iter()
        .map(|asset| snapshot.get(asset).cumulative_value)
        .sum::<f64>();

    assert_eq!(total_count, (TASKS * EVENTS_PER_TASK) as u64);
    assert_eq!(total_value, (TASKS * EVENTS_PER_TASK) as f64 * 100.0);

    // Tasks 0, 3 & 6 write BTC: 750 events
    assert_eq!(snapshot.get(Asset::Btc).total_count(), 750);
    assert_eq!(aggregator.recent().len(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_snapshots_are_consistent() {
    let aggregator = Arc::new(StatsAggregator::new());

    let writer = tokio::spawn({
        let aggregator = Arc::clone(&aggregator);
        async move {
            for _ in 0..1_000 {
                let event = LiquidationEvent::new(
                    Asset::Sol,
                    Side::Long,
                    2.0,
                    50.0,
                    ExchangeId::Okx,
                    Utc::now(),
                )
                .unwrap();
                aggregator.apply(&event);
                tokio::task::yield_now().await;
            }
        }
    });

    let reader = tokio::spawn({
        let aggregator = Arc::clone(&aggregator);
        async move {
            let mut previous = 0;
            for _ in 0..1_000 {
                let stats = aggregator.snapshot().get(Asset::Sol);
                // Count and value always move together
                assert_eq!(stats.cumulative_value, stats.long_count as f64 * 100.0);
                assert!(stats.long_count >= previous);
                previous = stats.long_count;
                tokio::task::yield_now().await;
            }
        }
    });

    writer.await.unwrap();
    reader.await.unwrap();

    assert_eq!(aggregator.snapshot().get(Asset::Sol).long_count, 1_000);
}

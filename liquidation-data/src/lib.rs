#![warn(
    unused,
    clippy::cast_possible_truncation,
    clippy::unused_self,
    clippy::cast_possible_wrap,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! # Liquidation-Data
//! Normalised liquidation feeds from leading cryptocurrency exchanges, running per-asset
//! aggregate statistics, and a fan-out [`Broadcaster`](broadcast::Broadcaster) that pushes
//! every event and updated snapshot to any number of live subscribers.
//!
//! Data flows leaf first:
//!
//! ```text
//! Connector (Bybit, Binance, Okx, Gate.io)
//!     -> normalise          (exchange symbol & side vocabulary -> Asset x Side)
//!     -> pipeline           (single writer)
//!         -> StatsAggregator::apply
//!         -> Broadcaster::publish + Broadcaster::publish_snapshot
//!             -> every registered subscriber
//! ```
//!
//! Each exchange feed runs as an independent task under the
//! [`FeedSupervisor`](supervisor::FeedSupervisor), reconnecting with backoff forever; a failure
//! in one feed never affects the others. The [`Broadcaster`](broadcast::Broadcaster) never blocks
//! on a slow subscriber: delivery goes through a bounded per-subscriber queue and a full queue
//! drops the message for that subscriber only.
//!
//! ## Example
//! ```rust,no_run
//! use liquidation_data::{
//!     broadcast::{BroadcastConfig, Broadcaster},
//!     exchange::{binance::BinanceFuturesUsd, bybit::BybitPerpetualsUsd},
//!     pipeline::run_pipeline,
//!     stats::StatsAggregator,
//!     supervisor::FeedSupervisor,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let aggregator = Arc::new(StatsAggregator::new());
//!     let broadcaster = Arc::new(Broadcaster::new(aggregator.clone(), BroadcastConfig::default()));
//!
//!     let (event_tx, event_rx) = tokio::sync::mpsc::channel(4096);
//!     let mut supervisor = FeedSupervisor::new(event_tx);
//!     supervisor.spawn(BybitPerpetualsUsd::default());
//!     supervisor.spawn(BinanceFuturesUsd::default());
//!
//!     run_pipeline(event_rx, aggregator, broadcaster).await;
//! }
//! ```

/// All [`Error`](std::error::Error)s generated in Liquidation-Data.
pub mod error;

/// Serde helpers for decoding exchange payloads (numeric strings, epoch timestamps).
pub mod de;

/// Normalised [`LiquidationEvent`](event::LiquidationEvent) model and the tracked
/// [`Asset`](event::Asset) & [`Side`](event::Side) domain.
pub mod event;

/// Pure mapping from exchange specific symbol & side vocabulary to the canonical domain.
pub mod normalise;

/// [`Connector`](exchange::Connector) implementations for every supported exchange feed.
pub mod exchange;

/// Feed connection lifecycle: read timeouts, reconnect backoff and the per-feed state machine.
pub mod streams;

/// Running per-asset [`AssetStats`](stats::AssetStats) and the bounded recent event log.
pub mod stats;

/// Wire messages exchanged with downstream subscribers.
pub mod message;

/// Subscriber registry & fan-out of events and snapshots.
pub mod broadcast;

/// Runs every exchange feed as an independent task.
pub mod supervisor;

/// Single writer task connecting the feeds, the aggregator and the broadcaster.
pub mod pipeline;

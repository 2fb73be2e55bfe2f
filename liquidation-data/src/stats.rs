use crate::event::{Asset, LiquidationEvent, Side};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::error;

/// Default capacity of the [`RecentEventLog`].
pub const DEFAULT_RECENT_CAPACITY: usize = 50;

/// Running liquidation statistics of a single [`Asset`] since process start.
///
/// Every field is monotonically non-decreasing.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetStats {
    pub long_count: u64,
    pub short_count: u64,
    /// Sum of the notional value of every liquidation, in quote currency.
    pub cumulative_value: f64,
}

impl AssetStats {
    pub fn total_count(&self) -> u64 {
        self.long_count + self.short_count
    }

    fn record(&mut self, side: Side, notional_value: f64) {
        match side {
            Side::Long => self.long_count += 1,
            Side::Short => self.short_count += 1,
        }
        self.cumulative_value += notional_value;
    }
}

/// Point-in-time copy of the [`AssetStats`] of every tracked [`Asset`].
///
/// Always contains all tracked assets, serialised as `{"BTC": {..}, "ETH": {..}, "SOL": {..}}`.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(transparent)]
pub struct StatsSnapshot(pub BTreeMap<Asset, AssetStats>);

impl StatsSnapshot {
    fn from_stats(stats: &[AssetStats; Asset::COUNT]) -> Self {
        Self(
            Asset::ALL
                .into_iter()
                .map(|asset| (asset, stats[asset.index()]))
                .collect(),
        )
    }

    pub fn get(&self, asset: Asset) -> AssetStats {
        self.0.get(&asset).copied().unwrap_or_default()
    }
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self::from_stats(&[AssetStats::default(); Asset::COUNT])
    }
}

/// Bounded log of the most recent [`LiquidationEvent`]s, newest first.
#[derive(Clone, PartialEq, Debug)]
pub struct RecentEventLog {
    capacity: usize,
    events: VecDeque<LiquidationEvent>,
}

impl RecentEventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    /// Push the newest event, evicting the oldest once at capacity.
    pub fn push(&mut self, event: LiquidationEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_back();
        }
        self.events.push_front(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn to_vec(&self) -> Vec<LiquidationEvent> {
        self.events.iter().cloned().collect()
    }
}

impl Default for RecentEventLog {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}

#[derive(Debug)]
struct AggregatorState {
    stats: [AssetStats; Asset::COUNT],
    recent: RecentEventLog,
}

/// Thread safe running [`AssetStats`] per [`Asset`] plus the [`RecentEventLog`].
///
/// Stats and log are updated in one critical section, so an observer never sees one without the
/// other.
#[derive(Debug)]
pub struct StatsAggregator {
    state: Mutex<AggregatorState>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::with_recent_capacity(DEFAULT_RECENT_CAPACITY)
    }

    pub fn with_recent_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(AggregatorState {
                stats: [AssetStats::default(); Asset::COUNT],
                recent: RecentEventLog::new(capacity),
            }),
        }
    }

    /// Record a [`LiquidationEvent`] and return the post-update [`StatsSnapshot`].
    ///
    /// An event breaking the [`LiquidationEvent::new`] invariants is logged and leaves the
    /// state untouched.
    pub fn apply(&self, event: &LiquidationEvent) -> StatsSnapshot {
        let mut state = self.state.lock();

        if !event.is_valid() {
            error!(?event, "refusing to aggregate invalid liquidation event");
            return StatsSnapshot::from_stats(&state.stats);
        }

        state.stats[event.asset.index()].record(event.side, event.notional_value);
        state.recent.push(event.clone());

        StatsSnapshot::from_stats(&state.stats)
    }

    /// Consistent copy of the current stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot::from_stats(&self.state.lock().stats)
    }

    /// Copy of the recent event log, newest first.
    pub fn recent(&self) -> Vec<LiquidationEvent> {
        self.state.lock().recent.to_vec()
    }

    /// Stats and recent event log taken in the same critical section.
    pub fn snapshot_with_recent(&self) -> (StatsSnapshot, Vec<LiquidationEvent>) {
        let state = self.state.lock();
        (StatsSnapshot::from_stats(&state.stats), state.recent.to_vec())
    }
}

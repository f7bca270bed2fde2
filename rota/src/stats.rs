//! Internal counters for the paged store.
//!
//! [`StoreStats`] is created once, injected into the first store generation
//! and shared by every generation rotated from it, so the counters describe
//! the page pool rather than any single generation. Series update it as they
//! gain and lose pages and samples; a [`StoreSnapshot`] combines it with the
//! pool gauges for publishing to an external registry.

use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Number of finite buckets in a [`Distribution`]; upper bounds are powers
/// of two from 1 to 2^20 (just over one million).
const BUCKET_COUNT: usize = 21;

fn bucket_upper_bound(index: usize) -> f64 {
    f64::from(1u32 << index)
}

fn bucket_for(value: f64) -> usize {
    (0..BUCKET_COUNT)
        .find(|&i| value <= bucket_upper_bound(i))
        .unwrap_or(BUCKET_COUNT)
}

/// Non-cumulative distribution with geometric buckets.
///
/// Values can be removed or moved after being added, so the distribution
/// always describes the current population (e.g. pages held by each live
/// series) rather than a history of observations.
#[derive(Debug)]
pub struct Distribution {
    state: Mutex<DistributionState>,
}

#[derive(Debug)]
struct DistributionState {
    count: u64,
    sum: f64,
    buckets: [u64; BUCKET_COUNT + 1],
}

impl Default for Distribution {
    fn default() -> Self {
        Self::new()
    }
}

impl Distribution {
    /// Creates an empty distribution.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DistributionState {
                count: 0,
                sum: 0.0,
                buckets: [0; BUCKET_COUNT + 1],
            }),
        }
    }

    /// Adds a value to the population.
    pub fn add(&self, value: f64) {
        let mut state = self.state.lock();
        state.count += 1;
        state.sum += value;
        state.buckets[bucket_for(value)] += 1;
    }

    /// Removes a value previously added.
    pub fn remove(&self, value: f64) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_sub(1);
        state.sum -= value;
        let bucket = &mut state.buckets[bucket_for(value)];
        *bucket = bucket.saturating_sub(1);
    }

    /// Replaces a member's value `old` with `new`.
    pub fn update(&self, old: f64, new: f64) {
        let mut state = self.state.lock();
        state.sum += new - old;
        let (from, to) = (bucket_for(old), bucket_for(new));
        if from != to {
            state.buckets[from] = state.buckets[from].saturating_sub(1);
            state.buckets[to] += 1;
        }
    }

    /// Sum of all current values.
    pub fn sum(&self) -> f64 {
        self.state.lock().sum
    }

    /// Number of current values.
    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    /// Copies the distribution out.
    pub fn snapshot(&self) -> DistributionSnapshot {
        let state = self.state.lock();
        let buckets = state
            .buckets
            .iter()
            .enumerate()
            .map(|(i, &count)| BucketCount {
                upper_bound: (i < BUCKET_COUNT).then(|| bucket_upper_bound(i)),
                count,
            })
            .collect();
        DistributionSnapshot {
            count: state.count,
            sum: state.sum,
            buckets,
        }
    }
}

/// Point-in-time copy of a [`Distribution`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionSnapshot {
    /// Number of values.
    pub count: u64,
    /// Sum of values.
    pub sum: f64,
    /// Per-bucket counts, lowest bucket first.
    pub buckets: Vec<BucketCount>,
}

/// Count of values in one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketCount {
    /// Inclusive upper bound; `None` for the overflow bucket.
    pub upper_bound: Option<f64>,
    /// Values in the bucket.
    pub count: u64,
}

/// Counters shared by every generation of a store.
#[derive(Debug, Default)]
pub struct StoreStats {
    pages_per_metric: Distribution,
    pending_per_metric: Distribution,
    last_evicted: Mutex<Option<f64>>,
    value_count: AtomicI64,
}

impl StoreStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages held per live series.
    pub fn pages_per_metric(&self) -> &Distribution {
        &self.pages_per_metric
    }

    /// Samples written but not yet drained, per live series.
    pub fn pending_per_metric(&self) -> &Distribution {
        &self.pending_per_metric
    }

    /// Latest timestamp on the most recent page evicted from a live series.
    pub fn last_evicted(&self) -> Option<f64> {
        *self.last_evicted.lock()
    }

    /// Samples currently stored across all series.
    pub fn value_count(&self) -> i64 {
        self.value_count.load(Ordering::Relaxed)
    }

    pub(crate) fn series_created(&self, pending: usize) {
        self.pages_per_metric.add(1.0);
        self.pending_per_metric.add(as_f64(pending));
    }

    pub(crate) fn page_added(&self, old_pages: usize) {
        self.pages_per_metric
            .update(as_f64(old_pages), as_f64(old_pages + 1));
    }

    pub(crate) fn page_removed(&self, old_pages: usize, pending: usize) {
        if old_pages == 1 {
            self.pages_per_metric.remove(1.0);
            self.pending_per_metric.remove(as_f64(pending));
        } else {
            self.pages_per_metric
                .update(as_f64(old_pages), as_f64(old_pages - 1));
        }
    }

    pub(crate) fn pending_changed(&self, old: usize, new: usize) {
        self.pending_per_metric.update(as_f64(old), as_f64(new));
    }

    pub(crate) fn evicted(&self, timestamp: f64) {
        *self.last_evicted.lock() = Some(timestamp);
    }

    pub(crate) fn values_added(&self, count: usize) {
        self.value_count.fetch_add(as_i64(count), Ordering::Relaxed);
    }

    pub(crate) fn values_removed(&self, count: usize) {
        self.value_count.fetch_sub(as_i64(count), Ordering::Relaxed);
    }
}

#[allow(clippy::cast_precision_loss)] // Page and sample counts stay far below 2^52
fn as_f64(n: usize) -> f64 {
    n as f64
}

fn as_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Published view of the store's gauges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSnapshot {
    /// Reclaim queue length: pages obtainable without evicting a live
    /// series below its reaping threshold.
    pub available_pages: usize,
    /// Free pages not owned by any series.
    pub spare_pages: usize,
    /// Pages allocated at startup.
    pub total_pages: usize,
    /// Capacity of each page.
    pub max_values_per_page: usize,
    /// Samples stored.
    pub value_count: i64,
    /// Fraction of owned page capacity holding samples, 0.0 - 1.0.
    pub page_utilization: f64,
    /// Latest timestamp evicted from a live series.
    pub last_evicted: Option<f64>,
    /// Pages held per live series.
    pub pages_per_metric: DistributionSnapshot,
    /// Samples pending drain per live series.
    pub pending_per_metric: DistributionSnapshot,
}

impl StoreSnapshot {
    pub(crate) fn new(
        stats: &StoreStats,
        available_pages: usize,
        spare_pages: usize,
        total_pages: usize,
        max_values_per_page: usize,
    ) -> Self {
        let pages_per_metric = stats.pages_per_metric.snapshot();
        let value_count = stats.value_count();
        #[allow(clippy::cast_precision_loss)] // Gauge only
        let page_utilization = if pages_per_metric.sum > 0.0 {
            value_count as f64 / pages_per_metric.sum / as_f64(max_values_per_page)
        } else {
            0.0
        };

        Self {
            available_pages,
            spare_pages,
            total_pages,
            max_values_per_page,
            value_count,
            page_utilization,
            last_evicted: stats.last_evicted(),
            pages_per_metric,
            pending_per_metric: stats.pending_per_metric.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(bucket_for(0.0), 0);
        assert_eq!(bucket_for(1.0), 0);
        assert_eq!(bucket_for(1.5), 1);
        assert_eq!(bucket_for(2.0), 1);
        assert_eq!(bucket_for(1_048_576.0), 20);
        assert_eq!(bucket_for(2e6), BUCKET_COUNT);
    }

    #[test]
    fn test_distribution_add_update_remove() {
        let dist = Distribution::new();
        dist.add(1.0);
        dist.add(3.0);
        assert_eq!(dist.count(), 2);
        assert_eq!(dist.sum(), 4.0);

        dist.update(3.0, 5.0);
        assert_eq!(dist.count(), 2);
        assert_eq!(dist.sum(), 6.0);

        dist.remove(1.0);
        let snapshot = dist.snapshot();
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.sum, 5.0);
        // 5.0 lands in the (4, 8] bucket.
        assert_eq!(snapshot.buckets[3].count, 1);
        assert_eq!(snapshot.buckets[0].count, 0);
        assert_eq!(snapshot.buckets.len(), BUCKET_COUNT + 1);
        assert_eq!(snapshot.buckets[BUCKET_COUNT].upper_bound, None);
    }

    #[test]
    fn test_series_lifecycle_counters() {
        let stats = StoreStats::new();
        stats.series_created(1);
        stats.values_added(1);
        stats.page_added(1);
        stats.pending_changed(1, 2);
        stats.values_added(1);

        assert_eq!(stats.pages_per_metric().sum(), 2.0);
        assert_eq!(stats.pending_per_metric().sum(), 2.0);
        assert_eq!(stats.value_count(), 2);

        stats.page_removed(2, 2);
        stats.values_removed(1);
        stats.evicted(10.0);
        stats.page_removed(1, 2);
        stats.values_removed(1);

        assert_eq!(stats.pages_per_metric().count(), 0);
        assert_eq!(stats.pending_per_metric().count(), 0);
        assert_eq!(stats.value_count(), 0);
        assert_eq!(stats.last_evicted(), Some(10.0));
    }

    #[test]
    fn test_snapshot_utilization() {
        let stats = StoreStats::new();
        stats.series_created(1);
        stats.page_added(1);
        stats.values_added(3);

        let snapshot = StoreSnapshot::new(&stats, 5, 5, 7, 2);
        assert_eq!(snapshot.total_pages, 7);
        assert_eq!(snapshot.value_count, 3);
        assert!((snapshot.page_utilization - 0.75).abs() < f64::EPSILON);

        let empty = StoreSnapshot::new(&StoreStats::new(), 7, 7, 7, 2);
        assert_eq!(empty.page_utilization, 0.0);
    }
}

//! Prometheus export of the store gauges.
//!
//! [`StoreCollector`] reads a fresh [`StoreSnapshot`] on every scrape, so it
//! never goes stale and needs no background task. It holds the pool and
//! counters that every generation shares, so one collector covers the store
//! across rotations.
//!
//! # Metrics
//!
//! - `rota_available_pages` - Reclaim queue length
//! - `rota_spare_pages` - Free pages not owned by any series
//! - `rota_total_pages` - Pages allocated at startup
//! - `rota_max_values_per_page` - Capacity of each page
//! - `rota_value_count` - Samples stored
//! - `rota_page_utilization` - Fraction of owned page capacity in use
//! - `rota_last_evicted_timestamp_seconds` - Newest sample of the last page
//!   evicted from a live series
//! - `rota_pages_per_metric` - Histogram of pages held per live series
//! - `rota_pending_per_metric` - Histogram of undrained samples per live
//!   series
//!
//! The two histograms are built by hand from [`DistributionSnapshot`]s, with
//! power-of-two bucket bounds. They describe the current population, not a
//! history of observations, so their counts can go down between scrapes.

use std::collections::HashMap;
use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, MetricFamily, MetricType};
use prometheus::{Gauge, IntGauge, Opts, Registry};

use crate::error::Result;
use crate::pool::PagePool;
use crate::stats::{DistributionSnapshot, StoreSnapshot, StoreStats};
use crate::store::Store;

const NAMESPACE: &str = "rota";

/// Prometheus collector over a store's pool and counters.
#[derive(Clone)]
pub struct StoreCollector {
    pool: Arc<PagePool>,
    stats: Arc<StoreStats>,
    max_values_per_page: usize,
    gauges: Gauges,
    pages_per_metric: DistributionFamily,
    pending_per_metric: DistributionFamily,
}

#[derive(Clone)]
struct Gauges {
    available_pages: IntGauge,
    spare_pages: IntGauge,
    total_pages: IntGauge,
    max_values_per_page: IntGauge,
    value_count: IntGauge,
    page_utilization: Gauge,
    last_evicted: Gauge,
}

/// A [`Distribution`](crate::stats::Distribution) published as a histogram.
#[derive(Clone)]
struct DistributionFamily {
    desc: Desc,
}

impl DistributionFamily {
    fn new(name: &str, help: &str) -> prometheus::Result<Self> {
        let desc = Desc::new(
            format!("{NAMESPACE}_{name}"),
            help.to_string(),
            Vec::new(),
            HashMap::new(),
        )?;
        Ok(Self { desc })
    }

    fn family(&self, snapshot: &DistributionSnapshot) -> MetricFamily {
        let mut histogram = proto::Histogram::default();
        histogram.set_sample_count(snapshot.count);
        histogram.set_sample_sum(snapshot.sum);

        let mut cumulative = 0;
        for bucket in &snapshot.buckets {
            cumulative += bucket.count;
            // The overflow bucket is the implicit +Inf one.
            if let Some(upper_bound) = bucket.upper_bound {
                let mut b = proto::Bucket::default();
                b.set_upper_bound(upper_bound);
                b.set_cumulative_count(cumulative);
                histogram.mut_bucket().push(b);
            }
        }

        let mut metric = proto::Metric::default();
        metric.set_histogram(histogram);

        let mut family = MetricFamily::default();
        family.set_name(self.desc.fq_name.clone());
        family.set_help(self.desc.help.clone());
        family.set_field_type(MetricType::HISTOGRAM);
        family.mut_metric().push(metric);
        family
    }
}

fn int_gauge(name: &str, help: &str) -> prometheus::Result<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))
}

fn gauge(name: &str, help: &str) -> prometheus::Result<Gauge> {
    Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))
}

fn as_i64<T: TryInto<i64>>(n: T) -> i64 {
    n.try_into().unwrap_or(i64::MAX)
}

impl Gauges {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            available_pages: int_gauge("available_pages", "Reclaim queue length")?,
            spare_pages: int_gauge("spare_pages", "Free pages not owned by any series")?,
            total_pages: int_gauge("total_pages", "Pages allocated at startup")?,
            max_values_per_page: int_gauge("max_values_per_page", "Capacity of each page")?,
            value_count: int_gauge("value_count", "Samples stored")?,
            page_utilization: gauge(
                "page_utilization",
                "Fraction of owned page capacity holding samples",
            )?,
            last_evicted: gauge(
                "last_evicted_timestamp_seconds",
                "Newest sample of the last page evicted from a live series",
            )?,
        })
    }

    fn set(&self, snapshot: &StoreSnapshot) {
        self.available_pages.set(as_i64(snapshot.available_pages));
        self.spare_pages.set(as_i64(snapshot.spare_pages));
        self.total_pages.set(as_i64(snapshot.total_pages));
        self.max_values_per_page
            .set(as_i64(snapshot.max_values_per_page));
        self.value_count.set(snapshot.value_count);
        self.page_utilization.set(snapshot.page_utilization);
        if let Some(ts) = snapshot.last_evicted {
            self.last_evicted.set(ts);
        }
    }

    fn ints(&self) -> [&IntGauge; 5] {
        [
            &self.available_pages,
            &self.spare_pages,
            &self.total_pages,
            &self.max_values_per_page,
            &self.value_count,
        ]
    }

    fn floats(&self) -> [&Gauge; 2] {
        [&self.page_utilization, &self.last_evicted]
    }
}

impl StoreCollector {
    /// Creates a collector for `store` and every generation rotated from it.
    ///
    /// # Errors
    ///
    /// Returns [`RotaError::Metrics`](crate::RotaError::Metrics) if a metric
    /// descriptor cannot be created.
    pub fn new(store: &Store) -> Result<Self> {
        Ok(Self {
            pool: Arc::clone(store.pool()),
            stats: Arc::clone(store.stats()),
            max_values_per_page: store.config().max_values_per_page,
            gauges: Gauges::new()?,
            pages_per_metric: DistributionFamily::new(
                "pages_per_metric",
                "Pages held per live series",
            )?,
            pending_per_metric: DistributionFamily::new(
                "pending_per_metric",
                "Samples written but not yet drained, per live series",
            )?,
        })
    }

    /// Adds the collector to `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`RotaError::Metrics`](crate::RotaError::Metrics) if the
    /// gauges are already registered there.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.clone()))?;
        Ok(())
    }

    /// Removes the collector from `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`RotaError::Metrics`](crate::RotaError::Metrics) if it was
    /// not registered there.
    pub fn unregister(&self, registry: &Registry) -> Result<()> {
        registry.unregister(Box::new(self.clone()))?;
        Ok(())
    }

    fn refresh(&self) -> StoreSnapshot {
        let snapshot = StoreSnapshot::new(
            &self.stats,
            self.pool.len(),
            self.pool.spare_count(),
            self.pool.total_pages(),
            self.max_values_per_page,
        );
        self.gauges.set(&snapshot);
        snapshot
    }
}

impl Collector for StoreCollector {
    fn desc(&self) -> Vec<&Desc> {
        let ints = self.gauges.ints().into_iter().flat_map(|g| g.desc());
        let floats = self.gauges.floats().into_iter().flat_map(|g| g.desc());
        ints.chain(floats)
            .chain([&self.pages_per_metric.desc, &self.pending_per_metric.desc])
            .collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let snapshot = self.refresh();
        let ints = self.gauges.ints().into_iter().flat_map(|g| g.collect());
        let floats = self.gauges.floats().into_iter().flat_map(|g| g.collect());
        ints.chain(floats)
            .chain([
                self.pages_per_metric.family(&snapshot.pages_per_metric),
                self.pending_per_metric.family(&snapshot.pending_per_metric),
            ])
            .collect()
    }
}

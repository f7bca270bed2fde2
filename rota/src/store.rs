//! Store module for the rota time-series store.
//!
//! This module provides the top-level API that ties all components together.
//! A [`Store`] is one generation: a fixed map from endpoint to
//! [`TimeSeriesCollection`], plus the page pool and counters it shares with
//! every other generation. The set of endpoints changes only by rotating to
//! a new generation through a [`StoreBuilder`].
//!
//! # Design
//!
//! - The page pool is allocated once, by the first generation, and shared
//!   from then on
//! - Collections of endpoints that stay registered are carried forward by
//!   identity, samples and drain positions included
//! - Collections of endpoints that are dropped are closed, and their pages
//!   are requeued so they are reused before pages of live series
//!
//! # Example Usage
//!
//! ```rust
//! use rota::{EndpointId, Metric, MetricInfo, StoreBuilder, StoreConfig};
//! use rota::metric::{Kind, Unit};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let web1 = EndpointId::new("web1:6910");
//! let web2 = EndpointId::new("web2:6910");
//!
//! let mut builder = StoreBuilder::new(StoreConfig::new(1_000, 60)?)?;
//! builder.register_endpoint(web1.clone())?;
//! builder.register_endpoint(web2.clone())?;
//! let store = builder.build();
//!
//! let info = MetricInfo::new("/proc/cpu", "CPU", Unit::None, Kind::Float, 64);
//! let applied = store.add_batch(&web1, 1.0, &[Metric::new(info, 0.25)], |_| true)?;
//! assert_eq!(applied, 1);
//!
//! // Rotate: web2 went away. Its pages go back to the pool.
//! let mut builder = store.new_builder();
//! builder.register_endpoint(web1.clone())?;
//! let store = builder.build();
//! assert!(store.contains_endpoint(&web1));
//! assert!(!store.contains_endpoint(&web2));
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::collection::TimeSeriesCollection;
use crate::config::{ReclaimPlacement, StoreConfig};
use crate::error::{InvariantViolation, Result, RotaError};
use crate::iterator::DrainIterator;
use crate::metric::{EndpointId, Metric};
use crate::pool::PagePool;
use crate::query::{Appender, Window};
use crate::stats::{StoreSnapshot, StoreStats};

/// Callback for [`Store::visit_all_endpoints`].
pub trait Visitor {
    /// Error that stops the visit.
    type Error;

    /// Called once per endpoint.
    ///
    /// # Errors
    ///
    /// Any error ends the visit and is returned to the caller.
    fn visit(
        &mut self,
        store: &Store,
        endpoint: &EndpointId,
    ) -> std::result::Result<(), Self::Error>;
}

/// One generation of the store.
///
/// # Thread Safety
///
/// `Store` is `Send + Sync`. Writes to different series proceed in
/// parallel; writes to the same series must come from one writer at a time.
/// Rotation is driven by a single owner.
#[derive(Debug)]
pub struct Store {
    /// Collections by endpoint; fixed once built.
    collections: BTreeMap<EndpointId, Arc<TimeSeriesCollection>>,
    /// Pool shared by every generation.
    pool: Arc<PagePool>,
    config: StoreConfig,
    stats: Arc<StoreStats>,
}

impl Store {
    /// Creates an empty first generation and allocates the page pool.
    ///
    /// # Errors
    ///
    /// Returns [`RotaError::Config`] if the configuration is invalid.
    pub fn new(config: StoreConfig) -> Result<Self> {
        Self::with_stats(config, Arc::new(StoreStats::new()))
    }

    /// Like [`new`](Self::new), updating the given counters.
    ///
    /// # Errors
    ///
    /// Returns [`RotaError::Config`] if the configuration is invalid.
    pub fn with_stats(config: StoreConfig, stats: Arc<StoreStats>) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(PagePool::new(
            config.total_page_count,
            config.max_values_per_page,
        ));

        tracing::debug!(
            total_pages = config.total_page_count,
            values_per_page = config.max_values_per_page,
            reaping_threshold = config.reaping_threshold,
            "allocated page pool"
        );

        Ok(Self {
            collections: BTreeMap::new(),
            pool,
            config,
            stats,
        })
    }

    /// Starts the next generation. The builder shares this store's pool,
    /// configuration and counters.
    pub fn new_builder(&self) -> StoreBuilder<'_> {
        StoreBuilder {
            prev: Some(self),
            next: self.empty_generation(),
            carried: 0,
        }
    }

    fn empty_generation(&self) -> Self {
        Self {
            collections: BTreeMap::new(),
            pool: Arc::clone(&self.pool),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Stores one reading for `endpoint`.
    ///
    /// Returns `Ok(false)` if the sample was rejected as stale or repeated.
    ///
    /// # Errors
    ///
    /// - [`RotaError::UnknownEndpoint`] if the endpoint is not registered
    /// - [`RotaError::Invariant`] on pool exhaustion or concurrent writers
    pub fn add(&self, endpoint: &EndpointId, timestamp: f64, metric: &Metric) -> Result<bool> {
        self.registered(endpoint)?.add(timestamp, metric, &self.pool)
    }

    /// Stores the readings of one collection pass that `filter` accepts.
    ///
    /// Returns the number of samples stored.
    ///
    /// # Errors
    ///
    /// Same as [`add`](Self::add). Samples before the failing one stay
    /// stored.
    pub fn add_batch<F>(
        &self,
        endpoint: &EndpointId,
        timestamp: f64,
        metrics: &[Metric],
        mut filter: F,
    ) -> Result<usize>
    where
        F: FnMut(&Metric) -> bool,
    {
        let collection = self.registered(endpoint)?;
        let mut applied = 0;
        for metric in metrics {
            if filter(metric) && collection.add(timestamp, metric, &self.pool)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// One drain cursor per series of `endpoint`. Empty for unknown
    /// endpoints.
    pub fn iterators(&self, endpoint: &EndpointId) -> Vec<DrainIterator> {
        self.collection(endpoint)
            .map(|c| c.iterators())
            .unwrap_or_default()
    }

    /// Appends samples in `window` of every series of `endpoint` named
    /// exactly `name`.
    pub fn by_name_and_endpoint<A: Appender + ?Sized>(
        &self,
        name: &str,
        endpoint: &EndpointId,
        window: Window,
        sink: &mut A,
    ) {
        if let Some(c) = self.collection(endpoint) {
            c.by_name(name, window, sink);
        }
    }

    /// Appends samples in `window` of every series of `endpoint` whose path
    /// starts with `prefix`.
    pub fn by_prefix_and_endpoint<A: Appender + ?Sized>(
        &self,
        prefix: &str,
        endpoint: &EndpointId,
        window: Window,
        sink: &mut A,
    ) {
        if let Some(c) = self.collection(endpoint) {
            c.by_prefix(prefix, window, sink);
        }
    }

    /// Appends samples in `window` of every series of `endpoint`.
    pub fn by_endpoint<A: Appender + ?Sized>(
        &self,
        endpoint: &EndpointId,
        window: Window,
        sink: &mut A,
    ) {
        self.by_prefix_and_endpoint("", endpoint, window, sink);
    }

    /// Appends the newest sample of every series of `endpoint`.
    pub fn latest_by_endpoint<A: Appender + ?Sized>(&self, endpoint: &EndpointId, sink: &mut A) {
        if let Some(c) = self.collection(endpoint) {
            c.latest(sink);
        }
    }

    /// Calls `visitor` for every endpoint, in order, stopping at the first
    /// error.
    ///
    /// # Errors
    ///
    /// Returns the first error the visitor reports.
    pub fn visit_all_endpoints<V: Visitor + ?Sized>(
        &self,
        visitor: &mut V,
    ) -> std::result::Result<(), V::Error> {
        for endpoint in self.collections.keys() {
            visitor.visit(self, endpoint)?;
        }
        Ok(())
    }

    /// Registered endpoints, in order.
    pub fn endpoints(&self) -> Vec<EndpointId> {
        self.collections.keys().cloned().collect()
    }

    /// Returns `true` if `endpoint` is registered in this generation.
    pub fn contains_endpoint(&self, endpoint: &EndpointId) -> bool {
        self.collections.contains_key(endpoint)
    }

    /// The collection of `endpoint`, if registered.
    pub fn collection(&self, endpoint: &EndpointId) -> Option<&Arc<TimeSeriesCollection>> {
        self.collections.get(endpoint)
    }

    /// Counters shared by every generation.
    pub fn stats(&self) -> &Arc<StoreStats> {
        &self.stats
    }

    /// Current values of every published gauge.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::new(
            &self.stats,
            self.pool.len(),
            self.pool.spare_count(),
            self.pool.total_pages(),
            self.config.max_values_per_page,
        )
    }

    /// The shared page pool.
    pub fn pool(&self) -> &Arc<PagePool> {
        &self.pool
    }

    /// The configuration the pool was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn registered(&self, endpoint: &EndpointId) -> Result<&Arc<TimeSeriesCollection>> {
        self.collection(endpoint)
            .ok_or_else(|| RotaError::UnknownEndpoint {
                endpoint: endpoint.clone(),
            })
    }
}

/// Assembles the next generation of a [`Store`].
///
/// Register every endpoint that should exist in the new generation, then
/// call [`build`](Self::build).
#[derive(Debug)]
pub struct StoreBuilder<'a> {
    prev: Option<&'a Store>,
    next: Store,
    carried: usize,
}

impl StoreBuilder<'static> {
    /// Starts the first generation, allocating the page pool.
    ///
    /// # Errors
    ///
    /// Returns [`RotaError::Config`] if the configuration is invalid.
    pub fn new(config: StoreConfig) -> Result<Self> {
        Self::with_stats(config, Arc::new(StoreStats::new()))
    }

    /// Like [`new`](Self::new), updating the given counters.
    ///
    /// # Errors
    ///
    /// Returns [`RotaError::Config`] if the configuration is invalid.
    pub fn with_stats(config: StoreConfig, stats: Arc<StoreStats>) -> Result<Self> {
        Ok(Self {
            prev: None,
            next: Store::with_stats(config, stats)?,
            carried: 0,
        })
    }
}

impl StoreBuilder<'_> {
    /// Adds `endpoint` to the new generation, carrying its collection
    /// forward from the previous one if it was there.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantViolation::DuplicateEndpoint`] if `endpoint` was
    /// already registered with this builder.
    pub fn register_endpoint(&mut self, endpoint: EndpointId) -> Result<()> {
        if self.next.collections.contains_key(&endpoint) {
            return Err(InvariantViolation::DuplicateEndpoint { endpoint }
                .raise()
                .into());
        }

        let carried = self
            .prev
            .and_then(|prev| prev.collections.get(&endpoint))
            .map(Arc::clone);
        let collection = match carried {
            Some(collection) => {
                self.carried += 1;
                collection
            }
            None => Arc::new(TimeSeriesCollection::new(
                endpoint.clone(),
                self.next.config.reaping_threshold,
                Arc::clone(&self.next.stats),
            )),
        };
        self.next.collections.insert(endpoint, collection);
        Ok(())
    }

    /// Finishes the new generation.
    ///
    /// Every collection of the previous generation that was not carried
    /// forward is closed, then each of its series is closed, then the
    /// series are requeued in the pool as configured by
    /// [`StoreConfig::departed_placement`].
    pub fn build(self) -> Store {
        let Some(prev) = self.prev else {
            tracing::debug!(
                endpoints = self.next.collections.len(),
                "built first store generation"
            );
            return self.next;
        };

        let mut departed = Vec::new();
        let mut closed = 0;
        for (endpoint, collection) in &prev.collections {
            if self.next.collections.contains_key(endpoint) {
                continue;
            }
            collection.close();
            let series = collection.all();
            for s in &series {
                s.close();
            }
            departed.extend(series);
            closed += 1;
        }

        match self.next.config.departed_placement {
            ReclaimPlacement::Front => self.next.pool.move_to_front(&departed),
            ReclaimPlacement::Back => self.next.pool.move_to_back(&departed),
        }

        tracing::debug!(
            carried = self.carried,
            created = self.next.collections.len() - self.carried,
            closed,
            departed_series = departed.len(),
            "rotated store generation"
        );

        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Kind, MetricInfo, Unit, Value};
    use crate::query::Record;

    fn endpoint(name: &str) -> EndpointId {
        EndpointId::new(name)
    }

    fn metric(path: &str, value: i64) -> Metric {
        Metric::new(MetricInfo::new(path, "", Unit::None, Kind::Int, 64), value)
    }

    fn store_with(config: StoreConfig, endpoints: &[&str]) -> Store {
        let mut builder = StoreBuilder::new(config).unwrap();
        for e in endpoints {
            builder.register_endpoint(endpoint(e)).unwrap();
        }
        builder.build()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = StoreConfig {
            total_page_count: 0,
            max_values_per_page: 4,
            reaping_threshold: 2,
            departed_placement: ReclaimPlacement::Front,
        };
        assert!(matches!(Store::new(config), Err(RotaError::Config(_))));
    }

    #[test]
    fn test_three_pages_of_two() {
        let store = store_with(StoreConfig::new(3, 2).unwrap(), &["e"]);
        let e = endpoint("e");

        for i in 1..=3 {
            assert!(store.add(&e, f64::from(i), &metric("/m", i64::from(i))).unwrap());
        }
        let series = &store.collection(&e).unwrap().all()[0];
        assert_eq!(series.page_lengths(), vec![2, 1]);
        assert_eq!(store.pool().spare_count(), 1);

        assert!(!store.add(&e, 2.0, &metric("/m", 9)).unwrap());
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn test_unknown_endpoint() {
        let store = store_with(StoreConfig::new(4, 2).unwrap(), &["e"]);
        let missing = endpoint("missing");

        let err = store.add(&missing, 1.0, &metric("/m", 1)).unwrap_err();
        assert!(matches!(err, RotaError::UnknownEndpoint { .. }));
        assert!(!err.is_invariant_violation());

        let mut records: Vec<Record> = Vec::new();
        store.by_endpoint(&missing, Window::all(), &mut records);
        assert!(records.is_empty());
        assert!(store.iterators(&missing).is_empty());
    }

    #[test]
    fn test_duplicate_endpoint_is_violation() {
        let mut builder = StoreBuilder::new(StoreConfig::new(4, 2).unwrap()).unwrap();
        builder.register_endpoint(endpoint("e")).unwrap();
        let err = builder.register_endpoint(endpoint("e")).unwrap_err();
        assert!(matches!(
            err,
            RotaError::Invariant(InvariantViolation::DuplicateEndpoint { .. })
        ));
    }

    #[test]
    fn test_add_batch_counts_and_filters() {
        let store = store_with(StoreConfig::new(8, 4).unwrap(), &["e"]);
        let e = endpoint("e");
        let batch = [metric("/a", 1), metric("/b", 1), metric("/skip", 1)];

        let applied = store
            .add_batch(&e, 1.0, &batch, |m| m.info.path() != "/skip")
            .unwrap();
        assert_eq!(applied, 2);

        // Same values again at a later time: nothing new.
        let applied = store.add_batch(&e, 2.0, &batch, |_| true).unwrap();
        assert_eq!(applied, 1);
    }

    #[test]
    fn test_queries_route_by_endpoint() {
        let store = store_with(StoreConfig::new(8, 4).unwrap(), &["a", "b"]);
        store.add(&endpoint("a"), 1.0, &metric("/cpu", 1)).unwrap();
        store.add(&endpoint("b"), 2.0, &metric("/cpu", 2)).unwrap();
        store.add(&endpoint("b"), 3.0, &metric("/mem", 3)).unwrap();

        let mut records: Vec<Record> = Vec::new();
        store.by_name_and_endpoint("/cpu", &endpoint("b"), Window::all(), &mut records);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, Value::Int(2));

        let mut records: Vec<Record> = Vec::new();
        store.by_endpoint(&endpoint("b"), Window::new(0.0, 3.0), &mut records);
        assert_eq!(records.len(), 1);

        let mut records: Vec<Record> = Vec::new();
        store.latest_by_endpoint(&endpoint("b"), &mut records);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_visit_all_endpoints_in_order() {
        struct Collect(Vec<String>);
        impl Visitor for Collect {
            type Error = ();
            fn visit(&mut self, _: &Store, endpoint: &EndpointId) -> std::result::Result<(), ()> {
                self.0.push(endpoint.to_string());
                Ok(())
            }
        }

        let store = store_with(StoreConfig::new(4, 2).unwrap(), &["b", "a"]);
        let mut visitor = Collect(Vec::new());
        store.visit_all_endpoints(&mut visitor).unwrap();
        assert_eq!(visitor.0, vec!["a", "b"]);
        assert_eq!(store.endpoints(), vec![endpoint("a"), endpoint("b")]);
    }

    #[test]
    fn test_visit_stops_on_error() {
        struct FailFirst(usize);
        impl Visitor for FailFirst {
            type Error = String;
            fn visit(&mut self, _: &Store, e: &EndpointId) -> std::result::Result<(), String> {
                self.0 += 1;
                Err(e.to_string())
            }
        }

        let store = store_with(StoreConfig::new(4, 2).unwrap(), &["a", "b"]);
        let mut visitor = FailFirst(0);
        assert_eq!(store.visit_all_endpoints(&mut visitor), Err("a".to_string()));
        assert_eq!(visitor.0, 1);
    }

    #[test]
    fn test_rotation_carries_collections() {
        let store = store_with(StoreConfig::new(8, 2).unwrap(), &["a"]);
        store.add(&endpoint("a"), 1.0, &metric("/m", 1)).unwrap();

        let mut builder = store.new_builder();
        builder.register_endpoint(endpoint("a")).unwrap();
        builder.register_endpoint(endpoint("b")).unwrap();
        let next = builder.build();

        assert!(Arc::ptr_eq(
            store.collection(&endpoint("a")).unwrap(),
            next.collection(&endpoint("a")).unwrap()
        ));
        assert!(Arc::ptr_eq(store.pool(), next.pool()));
        assert!(Arc::ptr_eq(store.stats(), next.stats()));
        assert_eq!(next.collection(&endpoint("b")).unwrap().len(), 0);
    }

    #[test]
    fn test_rotation_reuses_departed_pages_first() {
        let store = store_with(StoreConfig::new(4, 1).unwrap(), &["live", "gone"]);
        let (live, gone) = (endpoint("live"), endpoint("gone"));
        for i in 1..=3 {
            store.add(&live, f64::from(i), &metric("/m", i64::from(i))).unwrap();
        }
        store.add(&gone, 1.0, &metric("/m", 1)).unwrap();
        // Live holds three pages (one over threshold and queued), gone one.
        assert_eq!(store.pool().spare_count(), 0);
        assert_eq!(store.pool().len(), 1);

        let mut builder = store.new_builder();
        builder.register_endpoint(live.clone()).unwrap();
        let next = builder.build();
        let gone_coll = store.collection(&gone).unwrap();
        assert!(gone_coll.is_closed());
        assert_eq!(next.pool().len(), 2);

        // The next page comes from the departed endpoint, not from live.
        next.add(&live, 4.0, &metric("/m", 4)).unwrap();
        assert_eq!(gone_coll.all()[0].page_count(), 0);
        let live_series = &next.collection(&live).unwrap().all()[0];
        assert_eq!(live_series.page_count(), 4);
    }

    #[test]
    fn test_rotation_back_placement() {
        let config = StoreConfig::new(4, 1)
            .unwrap()
            .with_departed_placement(ReclaimPlacement::Back);
        let store = store_with(config, &["live", "gone"]);
        let (live, gone) = (endpoint("live"), endpoint("gone"));
        for i in 1..=3 {
            store.add(&live, f64::from(i), &metric("/m", i64::from(i))).unwrap();
        }
        store.add(&gone, 1.0, &metric("/m", 1)).unwrap();

        let mut builder = store.new_builder();
        builder.register_endpoint(live.clone()).unwrap();
        let next = builder.build();

        // Live's queued page goes first; the departed page waits behind it.
        next.add(&live, 4.0, &metric("/m", 4)).unwrap();
        let gone_series = &store.collection(&gone).unwrap().all()[0];
        assert_eq!(gone_series.page_count(), 1);
        let live_series = &next.collection(&live).unwrap().all()[0];
        assert_eq!(live_series.samples()[0].timestamp, 2.0);
    }

    #[test]
    fn test_writes_to_departed_endpoint_are_dropped() {
        let store = store_with(StoreConfig::new(4, 2).unwrap(), &["gone"]);
        let gone = endpoint("gone");
        store.add(&gone, 1.0, &metric("/m", 1)).unwrap();

        let next = store.new_builder().build();
        assert!(!next.contains_endpoint(&gone));

        // A writer still holding the old generation sees a closed series.
        assert!(!store.add(&gone, 2.0, &metric("/m", 2)).unwrap());
        assert!(!store.add(&gone, 2.0, &metric("/other", 2)).unwrap());
        assert_eq!(next.pool().spare_count(), 3);
    }

    #[test]
    fn test_snapshot_reports_pool_gauges() {
        let store = store_with(StoreConfig::new(4, 2).unwrap(), &["e"]);
        let e = endpoint("e");
        store.add(&e, 1.0, &metric("/m", 1)).unwrap();
        store.add(&e, 2.0, &metric("/m", 2)).unwrap();
        store.add(&e, 3.0, &metric("/m", 3)).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.total_pages, 4);
        assert_eq!(snapshot.spare_pages, 2);
        assert_eq!(snapshot.available_pages, 2);
        assert_eq!(snapshot.value_count, 3);
        assert!((snapshot.page_utilization - 0.75).abs() < f64::EPSILON);
        assert_eq!(snapshot.pages_per_metric.count, 1);
    }
}

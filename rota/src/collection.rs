//! All time series of one endpoint.
//!
//! A [`TimeSeriesCollection`] owns the metric registry and the series map of
//! a single endpoint. Collections are shared by identity across store
//! generations for as long as their endpoint stays registered; once a
//! rotation drops the endpoint the collection is closed and its series hand
//! their pages back to the pool.
//!
//! # Locking
//!
//! The collection lock guards the registry, the series map and the closed
//! flag. It is never held while calling into the pool or into a series:
//! writes look the series up, release the lock, then run the series write
//! protocol; reads copy the matching series out, release the lock, then
//! fetch from each.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{InvariantViolation, Result};
use crate::iterator::DrainIterator;
use crate::metric::{EndpointId, Metric, MetricInfo, Value};
use crate::pool::{PagePool, Reclaimable};
use crate::query::{Appender, Window};
use crate::registry::{MetricId, MetricRegistry};
use crate::series::{AddOutcome, TimeSeries};
use crate::stats::StoreStats;

/// Series of one endpoint, keyed by metric id.
#[derive(Debug)]
pub struct TimeSeriesCollection {
    endpoint: EndpointId,
    reaping_threshold: usize,
    stats: Arc<StoreStats>,
    state: Mutex<CollectionState>,
}

#[derive(Debug, Default)]
struct CollectionState {
    registry: MetricRegistry,
    /// Ordered by id so reads visit series in registration order.
    series: BTreeMap<MetricId, Arc<TimeSeries>>,
    closed: bool,
}

impl TimeSeriesCollection {
    /// Creates an empty, open collection.
    pub fn new(endpoint: EndpointId, reaping_threshold: usize, stats: Arc<StoreStats>) -> Self {
        Self {
            endpoint,
            reaping_threshold,
            stats,
            state: Mutex::new(CollectionState::default()),
        }
    }

    /// Endpoint this collection belongs to.
    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    /// Interns `info` and returns its series, if one exists yet.
    pub fn lookup(
        &self,
        info: &MetricInfo,
    ) -> (MetricId, Arc<MetricInfo>, Option<Arc<TimeSeries>>) {
        let mut state = self.state.lock();
        let (id, info) = state.registry.register(info);
        let series = state.series.get(&id).cloned();
        (id, info, series)
    }

    /// Registers a freshly built series under `id`.
    ///
    /// Returns `Ok(false)` if the collection has been closed; the caller
    /// then owns the orphaned series and must release its pages.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantViolation::DuplicateSeries`] if `id` already has a
    /// series, which means two writers raced on the same metric.
    pub fn add_time_series(&self, id: MetricId, series: &Arc<TimeSeries>) -> Result<bool> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(false);
        }
        if state.series.contains_key(&id) {
            return Err(InvariantViolation::DuplicateSeries {
                path: series.info().path().to_string(),
            }
            .raise()
            .into());
        }
        state.series.insert(id, Arc::clone(series));
        Ok(true)
    }

    /// Stores one reading taken at `timestamp`.
    ///
    /// Returns `Ok(false)` if the sample was not stored: the timestamp is
    /// not newer than the series' latest, the value repeats the latest, or
    /// the collection or series has been closed.
    ///
    /// # Errors
    ///
    /// Returns an [`InvariantViolation`] if the pool is exhausted or the
    /// single-writer-per-series contract was broken.
    pub fn add(&self, timestamp: f64, metric: &Metric, pool: &PagePool) -> Result<bool> {
        let (id, info, series) = self.lookup(&metric.info);
        match series {
            Some(series) => Self::add_to_series(&series, timestamp, metric.value.clone(), pool),
            None => self.add_new_series(id, info, timestamp, metric.value.clone(), pool),
        }
    }

    fn add_to_series(
        series: &Arc<TimeSeries>,
        timestamp: f64,
        value: Value,
        pool: &PagePool,
    ) -> Result<bool> {
        let (need_to_add, need_page) = series.need_to_add(timestamp, &value);
        if !need_to_add {
            return Ok(false);
        }

        let page = if need_page { Some(pool.get()?) } else { None };
        let outcome = match series.add(timestamp, value, page) {
            Ok(outcome) => outcome,
            Err(rejected) => {
                if let Some(page) = rejected.page {
                    pool.give_back(page);
                }
                return Err(rejected.violation.into());
            }
        };
        match outcome {
            AddOutcome::Added {
                eligible_for_reaping,
            } => {
                if eligible_for_reaping {
                    pool.add(Reclaimable::Series(Arc::clone(series)));
                }
                Ok(true)
            }
            AddOutcome::Closed(page) => {
                if let Some(page) = page {
                    tracing::warn!(
                        path = series.info().path(),
                        "series closed while adding; returning page to pool"
                    );
                    pool.give_back(page);
                }
                Ok(false)
            }
        }
    }

    fn add_new_series(
        &self,
        id: MetricId,
        info: Arc<MetricInfo>,
        timestamp: f64,
        value: Value,
        pool: &PagePool,
    ) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }

        let mut page = pool.get()?;
        page.add(timestamp, value);
        let series = Arc::new(TimeSeries::new(
            id,
            info,
            page,
            self.reaping_threshold,
            Arc::clone(&self.stats),
        ));

        let registered = self.add_time_series(id, &series);
        if let Ok(true) = registered {
            return Ok(true);
        }

        // Lost to a close or to another writer: tear the orphan down.
        series.close();
        if let Some(page) = series.reap()? {
            tracing::warn!(
                endpoint = %self.endpoint,
                path = series.info().path(),
                "series not registered; returning page to pool"
            );
            pool.give_back(page);
        }
        registered
    }

    /// Appends samples of every series whose path is exactly `name`.
    pub fn by_name<A: Appender + ?Sized>(&self, name: &str, window: Window, sink: &mut A) {
        if window.is_empty() {
            return;
        }
        let series: Vec<_> = {
            let state = self.state.lock();
            state
                .registry
                .by_path(name)
                .iter()
                .filter_map(|id| state.series.get(id).cloned())
                .collect()
        };
        self.fetch_each(&series, window, sink);
    }

    /// Appends samples of every series whose path starts with `prefix`.
    pub fn by_prefix<A: Appender + ?Sized>(&self, prefix: &str, window: Window, sink: &mut A) {
        if window.is_empty() {
            return;
        }
        let series: Vec<_> = self
            .all()
            .into_iter()
            .filter(|s| s.info().path().starts_with(prefix))
            .collect();
        self.fetch_each(&series, window, sink);
    }

    /// Appends the newest sample of every series.
    pub fn latest<A: Appender + ?Sized>(&self, sink: &mut A) {
        for series in self.all() {
            series.fetch_latest(&self.endpoint, sink);
        }
    }

    /// Snapshot of every series, in registration order.
    pub fn all(&self) -> Vec<Arc<TimeSeries>> {
        self.state.lock().series.values().cloned().collect()
    }

    /// One drain cursor per series.
    pub fn iterators(&self) -> Vec<DrainIterator> {
        self.all().into_iter().map(DrainIterator::new).collect()
    }

    /// Closes the collection so no further series can join it. Existing
    /// series are closed separately.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Returns `true` once the collection has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of series.
    pub fn len(&self) -> usize {
        self.state.lock().series.len()
    }

    /// Returns `true` if no series exist.
    pub fn is_empty(&self) -> bool {
        self.state.lock().series.is_empty()
    }

    fn fetch_each<A: Appender + ?Sized>(
        &self,
        series: &[Arc<TimeSeries>],
        window: Window,
        sink: &mut A,
    ) {
        for s in series {
            s.fetch(&self.endpoint, window, sink);
        }
    }
}

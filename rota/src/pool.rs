//! Fixed-size page pool with cooperative reclamation.
//!
//! Every page the store will ever use is allocated when the pool is built.
//! After that, pages are handed out by reclaiming the oldest entry of a FIFO
//! queue of reclaimable sources:
//!
//! - a spare page, which yields itself
//! - a time series past its reaping threshold, which yields its oldest page
//!
//! A live series is queued once for each page it holds beyond the
//! threshold, so reclaiming never takes a series below it. Reclaiming takes
//! the series' own lock and never the pool's, so the pool lock is never held
//! while a series lock is taken.
//!
//! # Exhaustion
//!
//! The pool size is a fixed deployment parameter. Running out of sources is
//! reported as [`InvariantViolation::PoolExhausted`] rather than retried.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{InvariantViolation, Result};
use crate::page::Page;
use crate::series::TimeSeries;

/// Source the pool can take a page from.
#[derive(Debug)]
pub(crate) enum Reclaimable {
    /// A free page.
    Spare(Page),
    /// A series holding pages beyond its reaping threshold, or a closed
    /// series giving up everything.
    Series(Arc<TimeSeries>),
}

impl Reclaimable {
    fn is_series(&self, series: &HashSet<*const TimeSeries>) -> bool {
        match self {
            Self::Spare(_) => false,
            Self::Series(s) => series.contains(&Arc::as_ptr(s)),
        }
    }
}

/// Bounded pool of pre-allocated pages.
#[derive(Debug)]
pub struct PagePool {
    queue: Mutex<VecDeque<Reclaimable>>,
    total_pages: usize,
    page_capacity: usize,
}

impl PagePool {
    /// Allocates `total_pages` spare pages of `page_capacity` samples each.
    pub fn new(total_pages: usize, page_capacity: usize) -> Self {
        let queue = (0..total_pages)
            .map(|_| Reclaimable::Spare(Page::with_capacity(page_capacity)))
            .collect();
        Self {
            queue: Mutex::new(queue),
            total_pages,
            page_capacity,
        }
    }

    /// Takes a cleared page, reclaiming from the front of the queue.
    ///
    /// Series that turn out to have nothing left (closed and already
    /// drained) are skipped.
    ///
    /// # Errors
    ///
    /// - [`InvariantViolation::PoolExhausted`] if the queue runs dry
    /// - [`InvariantViolation::PartialPageReaped`] if a live series was
    ///   queued more often than it holds surplus pages
    pub(crate) fn get(&self) -> Result<Page> {
        loop {
            let source = self.pop()?;
            let page = match source {
                Reclaimable::Spare(page) => Some(page),
                Reclaimable::Series(series) => series.reap()?,
            };
            if let Some(mut page) = page {
                page.clear();
                return Ok(page);
            }
        }
    }

    /// Queues a source at the back, behind everything already queued.
    pub(crate) fn add(&self, source: Reclaimable) {
        self.queue.lock().push_back(source);
    }

    /// Queues a source at the front, undoing a [`get`](Self::get) whose page
    /// went unused.
    pub(crate) fn add_front(&self, source: Reclaimable) {
        self.queue.lock().push_front(source);
    }

    /// Returns an unused page to the front of the queue.
    pub(crate) fn give_back(&self, page: Page) {
        self.add_front(Reclaimable::Spare(page));
    }

    /// Requeues `series` at the front of the queue, once per page each
    /// holds, so their pages are reclaimed before anything queued earlier.
    ///
    /// Existing queue entries for these series are dropped first. The
    /// series keep their relative order.
    pub(crate) fn move_to_front(&self, series: &[Arc<TimeSeries>]) {
        let counts = Self::page_counts(series);
        let targets = counts.iter().map(|(s, _)| Arc::as_ptr(s)).collect();

        let mut queue = self.queue.lock();
        queue.retain(|source| !source.is_series(&targets));
        for (s, count) in counts.iter().rev() {
            for _ in 0..*count {
                queue.push_front(Reclaimable::Series(Arc::clone(s)));
            }
        }
    }

    /// Like [`move_to_front`](Self::move_to_front), but requeues at the back.
    pub(crate) fn move_to_back(&self, series: &[Arc<TimeSeries>]) {
        let counts = Self::page_counts(series);
        let targets = counts.iter().map(|(s, _)| Arc::as_ptr(s)).collect();

        let mut queue = self.queue.lock();
        queue.retain(|source| !source.is_series(&targets));
        for (s, count) in &counts {
            for _ in 0..*count {
                queue.push_back(Reclaimable::Series(Arc::clone(s)));
            }
        }
    }

    /// Number of queued sources: pages obtainable without evicting a live
    /// series below its threshold.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Number of free pages owned by the pool itself.
    pub fn spare_count(&self) -> usize {
        self.queue
            .lock()
            .iter()
            .filter(|source| matches!(source, Reclaimable::Spare(_)))
            .count()
    }

    /// Pages allocated at construction.
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Capacity of each page.
    pub fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    fn pop(&self) -> Result<Reclaimable> {
        self.queue
            .lock()
            .pop_front()
            .ok_or_else(|| InvariantViolation::PoolExhausted.raise().into())
    }

    /// Page counts, deduplicated, in input order. Taken before the pool lock
    /// since each count locks its series.
    fn page_counts(series: &[Arc<TimeSeries>]) -> Vec<(Arc<TimeSeries>, usize)> {
        let mut seen = HashSet::new();
        series
            .iter()
            .filter(|s| seen.insert(Arc::as_ptr(s)))
            .map(|s| (Arc::clone(s), s.page_count()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RotaError;
    use crate::metric::{Kind, MetricInfo, Unit, Value};
    use crate::registry::MetricRegistry;
    use crate::series::AddOutcome;
    use crate::stats::StoreStats;

    /// Builds a series owning `pages` full pages taken from `pool`, queueing
    /// it the way the collection does.
    fn series_with_pages(pool: &PagePool, path: &str, pages: usize) -> Arc<TimeSeries> {
        let mut registry = MetricRegistry::new();
        let (id, info) =
            registry.register(&MetricInfo::new(path, "", Unit::None, Kind::Int, 64));

        let mut first = pool.get().unwrap();
        first.add(0.0, Value::Int(0));
        let series = Arc::new(TimeSeries::new(
            id,
            info,
            first,
            2,
            Arc::new(StoreStats::new()),
        ));

        // Fill until the newest page is full and another would be needed.
        let mut ts = 0i64;
        loop {
            ts += 1;
            let value = Value::Int(ts);
            let (_, need_page) = series.need_to_add(ts as f64, &value);
            let page = if need_page {
                if series.page_count() == pages {
                    break;
                }
                Some(pool.get().unwrap())
            } else {
                None
            };
            if let AddOutcome::Added {
                eligible_for_reaping: true,
            } = series.add(ts as f64, value, page).unwrap()
            {
                pool.add(Reclaimable::Series(Arc::clone(&series)));
            }
        }
        series
    }

    #[test]
    fn test_get_hands_out_spares_first() {
        let pool = PagePool::new(3, 4);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.spare_count(), 3);

        let page = pool.get().unwrap();
        assert!(page.is_empty());
        assert_eq!(page.capacity(), 4);
        assert_eq!(pool.spare_count(), 2);
    }

    #[test]
    fn test_exhaustion_is_violation() {
        let pool = PagePool::new(1, 4);
        let _page = pool.get().unwrap();
        assert!(matches!(
            pool.get(),
            Err(RotaError::Invariant(InvariantViolation::PoolExhausted))
        ));
    }

    #[test]
    fn test_give_back_goes_to_front() {
        let pool = PagePool::new(2, 4);
        let mut page = pool.get().unwrap();
        page.add(1.0, Value::Int(1));
        pool.give_back(page);

        // The returned page comes out first, cleared.
        let page = pool.get().unwrap();
        assert!(page.is_empty());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_reclaims_from_series_past_threshold() {
        let pool = PagePool::new(4, 2);
        let series = series_with_pages(&pool, "/m", 3);
        assert_eq!(series.page_count(), 3);
        // One spare left plus one queue entry for the series.
        assert_eq!(pool.spare_count(), 1);
        assert_eq!(pool.len(), 2);

        let _spare = pool.get().unwrap();
        let reclaimed = pool.get().unwrap();
        assert!(reclaimed.is_empty());
        assert_eq!(series.page_count(), 2);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_skips_drained_closed_series() {
        let pool = PagePool::new(3, 2);
        let series = series_with_pages(&pool, "/m", 1);
        series.close();
        pool.add_front(Reclaimable::Series(Arc::clone(&series)));
        pool.add_front(Reclaimable::Series(Arc::clone(&series)));

        // First entry yields the only page, second finds nothing and is
        // skipped, then a spare is handed out.
        let _ = pool.get().unwrap();
        assert_eq!(series.page_count(), 0);
        let _ = pool.get().unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_move_to_front_orders_by_input() {
        let pool = PagePool::new(6, 1);
        let a = series_with_pages(&pool, "/a", 2);
        let b = series_with_pages(&pool, "/b", 1);
        a.close();
        b.close();
        assert_eq!(pool.len(), 3);

        pool.move_to_front(&[Arc::clone(&b), Arc::clone(&a)]);
        assert_eq!(pool.len(), 3 + 3);

        // b's page, then both of a's, before any spare.
        pool.get().unwrap();
        assert_eq!(b.page_count(), 0);
        pool.get().unwrap();
        pool.get().unwrap();
        assert_eq!(a.page_count(), 0);
        assert_eq!(pool.spare_count(), 3);
    }

    #[test]
    fn test_move_to_front_replaces_existing_entries() {
        let pool = PagePool::new(5, 1);
        let series = series_with_pages(&pool, "/m", 3);
        // Queued once, for the page beyond the threshold.
        assert_eq!(pool.len(), 3);

        series.close();
        pool.move_to_front(&[Arc::clone(&series), Arc::clone(&series)]);
        assert_eq!(pool.len(), 2 + 3);
    }

    #[test]
    fn test_move_to_back() {
        let pool = PagePool::new(3, 1);
        let series = series_with_pages(&pool, "/m", 1);
        series.close();

        pool.move_to_back(&[Arc::clone(&series)]);
        assert_eq!(pool.len(), 3);
        // Spares come out first.
        pool.get().unwrap();
        pool.get().unwrap();
        assert_eq!(series.page_count(), 1);
        pool.get().unwrap();
        assert_eq!(series.page_count(), 0);
    }
}

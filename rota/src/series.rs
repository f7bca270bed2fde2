//! Per-metric time series.
//!
//! A [`TimeSeries`] is the history of one metric on one endpoint: an ordered
//! run of pages, oldest first, where every page but the newest is full. It
//! also carries the read pointer used by [`DrainIterator`] and a counter of
//! samples written but not yet drained.
//!
//! # Write Protocol
//!
//! Writers never hold a series lock while asking the pool for a page, since
//! the pool may need to lock another series to reclaim one. Instead:
//!
//! 1. [`TimeSeries::need_to_add`] reports whether the sample is new and
//!    whether it needs a fresh page
//! 2. The caller gets a page from the pool only if told to
//! 3. `add` re-checks under the lock and appends
//!
//! Only one writer per series may run this protocol at a time. If the state
//! moves between steps 1 and 3, `add` reports
//! [`InvariantViolation::ConcurrentWriters`].
//!
//! # Lifecycle
//!
//! A series is open until its collection is dropped during rotation; then it
//! is closed for good. A closed series accepts no writes but keeps giving up
//! pages, partial ones included, until it holds none.
//!
//! [`DrainIterator`]: crate::iterator::DrainIterator

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use thiserror::Error;

use crate::error::{InvariantViolation, Result, RotaError};
use crate::iterator::ReadPointer;
use crate::metric::{EndpointId, MetricInfo, Value};
use crate::page::{Page, Sample};
use crate::query::{Appender, Record, Window};
use crate::registry::MetricId;
use crate::stats::StoreStats;

/// Result of [`TimeSeries::add`].
#[derive(Debug)]
pub(crate) enum AddOutcome {
    /// The sample was stored.
    Added {
        /// The series now holds more pages than the reaping threshold and
        /// must be queued in the pool as a reclaim source.
        eligible_for_reaping: bool,
    },
    /// The series was closed; the sample was dropped and the unused page,
    /// if one was supplied, is handed back.
    Closed(Option<Page>),
}

/// A [`TimeSeries::add`] that broke the write protocol. The supplied page,
/// if any, was not used and comes back with the violation.
#[derive(Error, Debug)]
#[error("{violation}")]
pub(crate) struct RejectedAdd {
    pub(crate) violation: InvariantViolation,
    pub(crate) page: Option<Page>,
}

impl From<RejectedAdd> for RotaError {
    fn from(rejected: RejectedAdd) -> Self {
        rejected.violation.into()
    }
}

/// One metric's history on one endpoint.
#[derive(Debug)]
pub struct TimeSeries {
    id: MetricId,
    info: Arc<MetricInfo>,
    reaping_threshold: usize,
    stats: Arc<StoreStats>,
    state: Mutex<SeriesState>,
}

#[derive(Debug)]
struct SeriesState {
    /// Owned pages, oldest first.
    pages: VecDeque<Page>,
    /// Sequence number of `pages[0]`.
    base_seq: u64,
    ptr: ReadPointer,
    /// Samples written but not yet committed by a drain.
    pending: usize,
    closed: bool,
}

impl SeriesState {
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    fn need_to_add(&self, timestamp: f64, value: &Value) -> (bool, bool) {
        if self.closed {
            return (false, false);
        }
        let Some(newest) = self.pages.back() else {
            return (false, false);
        };
        let Some(latest) = newest.latest() else {
            return (false, false);
        };
        // NaN timestamps are never newer.
        if !(timestamp > latest.timestamp) || *value == latest.value {
            return (false, false);
        }
        (true, newest.is_full())
    }
}

impl TimeSeries {
    /// Creates an open series whose first page already holds its first
    /// sample.
    pub fn new(
        id: MetricId,
        info: Arc<MetricInfo>,
        first_page: Page,
        reaping_threshold: usize,
        stats: Arc<StoreStats>,
    ) -> Self {
        let pending = first_page.len();
        stats.series_created(pending);
        stats.values_added(pending);

        Self {
            id,
            info,
            reaping_threshold,
            stats,
            state: Mutex::new(SeriesState {
                pages: VecDeque::from([first_page]),
                base_seq: 0,
                ptr: ReadPointer::new(0),
                pending,
                closed: false,
            }),
        }
    }

    /// Registry id of the metric.
    pub fn id(&self) -> MetricId {
        self.id
    }

    /// Identity of the metric.
    pub fn info(&self) -> &Arc<MetricInfo> {
        &self.info
    }

    /// Reports whether a sample would be stored and whether storing it
    /// requires a fresh page.
    ///
    /// Returns `(false, false)` if the series is closed, if `timestamp` is
    /// not newer than the latest sample, or if `value` equals the latest
    /// value.
    pub fn need_to_add(&self, timestamp: f64, value: &Value) -> (bool, bool) {
        self.state.lock().need_to_add(timestamp, value)
    }

    /// Appends a sample.
    ///
    /// Must follow a [`need_to_add`](Self::need_to_add) that returned
    /// `(true, needs_page)`, with `page` supplied iff `needs_page`.
    ///
    /// # Errors
    ///
    /// Returns a [`RejectedAdd`] carrying the unused page if an open series
    /// has no pages ([`InvariantViolation::DrainedSeries`]) or no longer
    /// agrees with the earlier check
    /// ([`InvariantViolation::ConcurrentWriters`]).
    pub(crate) fn add(
        &self,
        timestamp: f64,
        value: Value,
        page: Option<Page>,
    ) -> std::result::Result<AddOutcome, RejectedAdd> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(AddOutcome::Closed(page));
        }
        if state.pages.is_empty() {
            return Err(RejectedAdd {
                violation: InvariantViolation::DrainedSeries {
                    path: self.info.path().to_string(),
                }
                .raise(),
                page,
            });
        }

        let (need_to_add, need_page) = state.need_to_add(timestamp, &value);
        if !need_to_add || need_page != page.is_some() {
            return Err(RejectedAdd {
                violation: InvariantViolation::ConcurrentWriters {
                    path: self.info.path().to_string(),
                }
                .raise(),
                page,
            });
        }

        let mut eligible_for_reaping = false;
        if let Some(page) = page {
            let old_pages = state.pages.len();
            state.pages.push_back(page);
            self.stats.page_added(old_pages);
            eligible_for_reaping = state.pages.len() > self.reaping_threshold;
        }

        if let Some(newest) = state.pages.back_mut() {
            newest.add(timestamp, value);
        }
        self.stats.pending_changed(state.pending, state.pending + 1);
        state.pending += 1;
        self.stats.values_added(1);

        Ok(AddOutcome::Added {
            eligible_for_reaping,
        })
    }

    /// Gives up the oldest page for reuse.
    ///
    /// Returns `Ok(None)` once the series holds no pages.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantViolation::PartialPageReaped`] if the series is
    /// open and its oldest page is not full. The series is left unchanged.
    pub(crate) fn reap(&self) -> Result<Option<Page>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(front) = state.pages.front() else {
            return Ok(None);
        };
        let front_len = front.len();

        if !state.closed && !front.is_full() {
            return Err(InvariantViolation::PartialPageReaped {
                path: self.info.path().to_string(),
                len: front_len,
                capacity: front.capacity(),
            }
            .raise()
            .into());
        }

        let old_pages = state.pages.len();
        state.ptr.pop_first_page(state.base_seq, front_len);
        let Some(page) = state.pages.pop_front() else {
            return Ok(None);
        };
        state.base_seq += 1;

        // Closed series are being torn down, not evicted.
        if !state.closed
            && let Some(latest) = page.latest()
        {
            self.stats.evicted(latest.timestamp);
        }
        self.stats.values_removed(page.len());
        self.stats.page_removed(old_pages, state.pending);

        tracing::trace!(
            path = self.info.path(),
            samples = page.len(),
            closed = state.closed,
            "reaped page"
        );

        Ok(Some(page))
    }

    /// Appends samples inside `window` to `sink`, newest first.
    pub fn fetch<A: Appender + ?Sized>(
        &self,
        endpoint: &EndpointId,
        window: Window,
        sink: &mut A,
    ) {
        if window.is_empty() {
            return;
        }
        let state = self.state.lock();
        for page in state.pages.iter().rev() {
            if !page.fetch(window, endpoint, &self.info, sink) {
                break;
            }
        }
    }

    /// Appends the newest sample, if any, to `sink`.
    pub fn fetch_latest<A: Appender + ?Sized>(&self, endpoint: &EndpointId, sink: &mut A) {
        let state = self.state.lock();
        if let Some(latest) = state.pages.back().and_then(Page::latest) {
            sink.append(Record {
                endpoint: endpoint.clone(),
                info: Arc::clone(&self.info),
                timestamp: latest.timestamp,
                value: latest.value.clone(),
            });
        }
    }

    /// Returns undrained samples from the read pointer and how many were
    /// reclaimed before being drained.
    pub fn fetch_from_position(&self) -> (Vec<Sample>, usize) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.ptr.values(&state.pages, state.base_seq)
    }

    /// Acknowledges `advances` drained (or skipped) samples.
    pub fn advance_position(&self, advances: usize) {
        let mut state = self.state.lock();
        state.ptr.advance(advances);
        let pending = state.pending.saturating_sub(advances);
        // A series with no pages has already left the distribution.
        if !state.pages.is_empty() {
            self.stats.pending_changed(state.pending, pending);
        }
        state.pending = pending;
    }

    /// Closes the series. Irreversible.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Returns `true` once the series has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of pages owned.
    pub fn page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Number of samples stored.
    pub fn len(&self) -> usize {
        self.state.lock().pages.iter().map(Page::len).sum()
    }

    /// Returns `true` if no samples are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples written but not yet committed by a drain.
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    /// Copy of every stored sample, oldest first.
    pub fn samples(&self) -> Vec<Sample> {
        let state = self.state.lock();
        state
            .pages
            .iter()
            .flat_map(|page| page.samples().iter().cloned())
            .collect()
    }

    /// Sizes of the owned pages, oldest first.
    pub fn page_lengths(&self) -> Vec<usize> {
        self.state.lock().pages.iter().map(Page::len).collect()
    }
}

//! Incremental, resumable draining of a time series.
//!
//! Each series keeps a read pointer recording how much of it has been
//! durably handed off downstream. A [`DrainIterator`] reads from that
//! position and only moves it when [`DrainIterator::commit`] is called, so a
//! drain that dies before committing re-reads the same samples next time
//! instead of losing them.
//!
//! Pages can be reclaimed out from under the pointer. When that happens the
//! pointer's offset goes negative, recording how many samples vanished
//! before they were read, and the next drain reports them as skipped.
//!
//! # Example
//!
//! ```rust
//! use rota::{EndpointId, Metric, MetricInfo, Store, StoreBuilder, StoreConfig};
//! use rota::metric::{Kind, Unit};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = EndpointId::new("web1:6910");
//! let mut builder = StoreBuilder::new(StoreConfig::new(16, 4)?)?;
//! builder.register_endpoint(endpoint.clone())?;
//! let store = builder.build();
//!
//! let info = MetricInfo::new("/requests", "Requests", Unit::None, Kind::Uint, 64);
//! store.add(&endpoint, 1.0, &Metric::new(info.clone(), 10u64))?;
//! store.add(&endpoint, 2.0, &Metric::new(info, 11u64))?;
//!
//! for mut iter in store.iterators(&endpoint) {
//!     let batch: Vec<_> = iter.by_ref().collect();
//!     assert_eq!(batch.len(), 2);
//!     // ...hand the batch to the persistent store, then:
//!     iter.commit();
//! }
//!
//! // Everything was committed; nothing left to drain.
//! assert!(store.iterators(&endpoint).into_iter().all(|mut i| i.next().is_none()));
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use crate::metric::{MetricInfo, Value};
use crate::page::{Page, Sample};
use crate::series::TimeSeries;

/// Position of the next undrained sample in a series.
///
/// Pages are named by sequence number rather than by reference: the series
/// numbers its pages in append order and tracks the number of its front
/// page, so reclaiming the front never leaves the pointer dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadPointer {
    page_seq: u64,
    offset: i64,
}

impl ReadPointer {
    /// Points at the first sample of page `page_seq`.
    pub(crate) fn new(page_seq: u64) -> Self {
        Self {
            page_seq,
            offset: 0,
        }
    }

    /// Moves the pointer forward by `count` samples.
    pub(crate) fn advance(&mut self, count: usize) {
        self.offset = self.offset.saturating_add(to_i64(count));
    }

    /// Must be called before the front page (`front_seq`, holding
    /// `front_len` samples) is removed from the series.
    pub(crate) fn pop_first_page(&mut self, front_seq: u64, front_len: usize) {
        if self.page_seq == front_seq {
            self.offset -= to_i64(front_len);
            self.page_seq += 1;
        }
    }

    /// Returns the samples from the pointer onwards within its current page,
    /// plus how many samples were reclaimed before being read.
    ///
    /// Walks forward over pages that filled since the last read. Returns
    /// nothing once the pointer is past the newest sample.
    pub(crate) fn values(
        &mut self,
        pages: &VecDeque<Page>,
        base_seq: u64,
    ) -> (Vec<Sample>, usize) {
        let Some(mut index) = self
            .page_seq
            .checked_sub(base_seq)
            .and_then(|i| usize::try_from(i).ok())
        else {
            return (Vec::new(), 0);
        };
        if index >= pages.len() {
            return (Vec::new(), 0);
        }

        while self.offset >= to_i64(pages[index].len()) && index + 1 < pages.len() {
            self.offset -= to_i64(pages[index].len());
            self.page_seq += 1;
            index += 1;
        }

        let samples = pages[index].samples();
        match usize::try_from(self.offset) {
            Ok(offset) if offset >= samples.len() => (Vec::new(), 0),
            Ok(offset) => (samples[offset..].to_vec(), 0),
            Err(_) => {
                let skipped = usize::try_from(self.offset.unsigned_abs()).unwrap_or(usize::MAX);
                (samples.to_vec(), skipped)
            }
        }
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// One sample handed out by a [`DrainIterator`].
#[derive(Debug, Clone, PartialEq)]
pub struct DrainedSample {
    /// Sample timestamp in seconds.
    pub timestamp: f64,
    /// Sample value.
    pub value: Value,
    /// Samples evicted before being drained, immediately preceding this one.
    pub skipped: usize,
}

/// Cursor draining one time series.
///
/// Reads a batch from the series' read pointer when created. Iterating pops
/// samples off that batch; [`commit`](Self::commit) acknowledges everything
/// popped so far.
#[derive(Debug)]
pub struct DrainIterator {
    series: Arc<TimeSeries>,
    values: std::vec::IntoIter<Sample>,
    skipped: usize,
    advances: usize,
}

impl DrainIterator {
    /// Snapshots the undrained samples of `series`.
    pub fn new(series: Arc<TimeSeries>) -> Self {
        let (values, skipped) = series.fetch_from_position();
        Self {
            series,
            values: values.into_iter(),
            skipped,
            advances: 0,
        }
    }

    /// Moves the series' read pointer past every sample returned so far.
    pub fn commit(&mut self) {
        if self.advances > 0 {
            self.series.advance_position(self.advances);
            self.advances = 0;
        }
    }

    /// Samples (read or skipped) returned but not yet committed.
    pub fn uncommitted(&self) -> usize {
        self.advances
    }

    /// The series being drained.
    pub fn series(&self) -> &Arc<TimeSeries> {
        &self.series
    }

    /// Identity of the metric being drained.
    pub fn info(&self) -> &Arc<MetricInfo> {
        self.series.info()
    }
}

impl Iterator for DrainIterator {
    type Item = DrainedSample;

    fn next(&mut self) -> Option<Self::Item> {
        let sample = self.values.next()?;
        let skipped = std::mem::take(&mut self.skipped);
        self.advances += skipped + 1;
        Some(DrainedSample {
            timestamp: sample.timestamp,
            value: sample.value,
            skipped,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.values.size_hint()
    }
}

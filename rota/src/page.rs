//! Fixed-capacity pages of samples.
//!
//! A [`Page`] is the unit of allocation in the store. All pages are created
//! once, when the pool is built, and then cycle between the pool (free) and
//! exactly one time series (owned) for the rest of the process. A page is
//! append-only while owned and keeps its samples in strictly increasing
//! timestamp order, so range lookups are binary searches.

use std::sync::Arc;

use crate::metric::{EndpointId, MetricInfo, Value};
use crate::query::{Appender, Record, Window};

/// A timestamped value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    /// The value observed.
    pub value: Value,
}

impl Sample {
    /// Creates a sample.
    pub fn new(timestamp: f64, value: impl Into<Value>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

/// Append-only run of samples with a fixed capacity.
#[derive(Debug)]
pub struct Page {
    samples: Vec<Sample>,
    capacity: usize,
}

impl Page {
    /// Allocates an empty page holding up to `capacity` samples.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a sample.
    ///
    /// The caller guarantees the page is not full and that `timestamp` is
    /// newer than the latest sample.
    pub fn add(&mut self, timestamp: f64, value: Value) {
        debug_assert!(!self.is_full(), "add to a full page");
        debug_assert!(
            self.latest().is_none_or(|s| s.timestamp < timestamp),
            "timestamps must strictly increase within a page"
        );
        self.samples.push(Sample { timestamp, value });
    }

    /// Drops all samples, keeping the allocation.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Returns `true` if the page holds `capacity` samples.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if the page holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples the page can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The newest sample, if any.
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// The oldest sample, if any.
    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    /// All samples, oldest first.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Index of the first sample with `timestamp >= ts`, or `len()` if none.
    pub fn first_index_at_or_after(&self, ts: f64) -> usize {
        self.samples.partition_point(|s| s.timestamp < ts)
    }

    /// Index of the first sample with `timestamp > ts`, or `len()` if none.
    pub fn first_index_after(&self, ts: f64) -> usize {
        self.samples.partition_point(|s| s.timestamp <= ts)
    }

    /// Appends the samples inside `window` to `sink`, newest first.
    ///
    /// Returns `true` if an older page may still hold samples inside the
    /// window, i.e. the caller should keep walking backwards.
    pub(crate) fn fetch<A: Appender + ?Sized>(
        &self,
        window: Window,
        endpoint: &EndpointId,
        info: &Arc<MetricInfo>,
        sink: &mut A,
    ) -> bool {
        let end = self.first_index_at_or_after(window.end);
        let start = self.first_index_at_or_after(window.start);

        for sample in self.samples[start..end.max(start)].iter().rev() {
            sink.append(Record {
                endpoint: endpoint.clone(),
                info: Arc::clone(info),
                timestamp: sample.timestamp,
                value: sample.value.clone(),
            });
        }

        self.first().is_none_or(|s| s.timestamp > window.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Kind, Unit};

    fn page_with(timestamps: &[f64]) -> Page {
        let mut page = Page::with_capacity(8);
        for &ts in timestamps {
            page.add(ts, Value::Float(ts * 10.0));
        }
        page
    }

    fn fetch(page: &Page, window: Window) -> (Vec<f64>, bool) {
        let endpoint = EndpointId::new("e");
        let info = Arc::new(MetricInfo::new("/m", "", Unit::None, Kind::Float, 64));
        let mut records: Vec<Record> = Vec::new();
        let keep_going = page.fetch(window, &endpoint, &info, &mut records);
        (records.iter().map(|r| r.timestamp).collect(), keep_going)
    }

    #[test]
    fn test_add_until_full() {
        let mut page = Page::with_capacity(2);
        assert!(page.is_empty());
        assert!(!page.is_full());

        page.add(1.0, Value::Int(1));
        page.add(2.0, Value::Int(2));
        assert!(page.is_full());
        assert_eq!(page.len(), 2);
        assert_eq!(page.latest(), Some(&Sample::new(2.0, 2i64)));
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut page = page_with(&[1.0, 2.0]);
        page.clear();
        assert!(page.is_empty());
        assert_eq!(page.capacity(), 8);
        assert!(page.latest().is_none());
    }

    #[test]
    fn test_binary_search_bounds() {
        let page = page_with(&[10.0, 20.0, 30.0]);

        assert_eq!(page.first_index_at_or_after(5.0), 0);
        assert_eq!(page.first_index_at_or_after(20.0), 1);
        assert_eq!(page.first_index_at_or_after(25.0), 2);
        assert_eq!(page.first_index_at_or_after(35.0), 3);

        assert_eq!(page.first_index_after(5.0), 0);
        assert_eq!(page.first_index_after(20.0), 2);
        assert_eq!(page.first_index_after(30.0), 3);
    }

    #[test]
    fn test_fetch_half_open_descending() {
        let page = page_with(&[10.0, 20.0, 30.0, 40.0]);

        let (timestamps, keep_going) = fetch(&page, Window::new(20.0, 40.0));
        assert_eq!(timestamps, vec![30.0, 20.0]);
        assert!(!keep_going);
    }

    #[test]
    fn test_fetch_signals_older_pages() {
        let page = page_with(&[10.0, 20.0]);

        // Window reaches before the first sample: older pages may match.
        let (timestamps, keep_going) = fetch(&page, Window::new(5.0, 15.0));
        assert_eq!(timestamps, vec![10.0]);
        assert!(keep_going);

        // Window entirely newer than the page.
        let (timestamps, keep_going) = fetch(&page, Window::new(25.0, 35.0));
        assert!(timestamps.is_empty());
        assert!(!keep_going);

        // Window entirely older than the page.
        let (timestamps, keep_going) = fetch(&page, Window::new(1.0, 5.0));
        assert!(timestamps.is_empty());
        assert!(keep_going);
    }
}

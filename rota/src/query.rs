//! Query types for reading samples back out of the store.
//!
//! Queries name an endpoint, a set of series (exact path, path prefix or
//! all) and a half-open [`Window`]. Matching samples are delivered as
//! [`Record`]s into an [`Appender`] sink, newest first within each series.
//! Series are visited in registration order.
//!
//! # Example Usage
//!
//! ```rust
//! use rota::{EndpointId, Metric, MetricInfo, Record, Store, StoreBuilder, StoreConfig, Window};
//! use rota::metric::{Kind, Unit};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = EndpointId::new("web1:6910");
//! let mut builder = StoreBuilder::new(StoreConfig::new(16, 4)?)?;
//! builder.register_endpoint(endpoint.clone())?;
//! let store = builder.build();
//!
//! let info = MetricInfo::new("/proc/load", "Load average", Unit::None, Kind::Float, 64);
//! store.add(&endpoint, 10.0, &Metric::new(info.clone(), 0.5))?;
//! store.add(&endpoint, 20.0, &Metric::new(info, 0.7))?;
//!
//! let mut records: Vec<Record> = Vec::new();
//! store.by_name_and_endpoint("/proc/load", &endpoint, Window::new(0.0, 15.0), &mut records);
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].timestamp, 10.0);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::metric::{EndpointId, MetricInfo, Value};

/// Half-open time window `[start, end)` in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    /// Inclusive lower bound.
    pub start: f64,
    /// Exclusive upper bound.
    pub end: f64,
}

impl Window {
    /// Creates a window.
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// A window covering every finite timestamp.
    pub fn all() -> Self {
        Self {
            start: f64::NEG_INFINITY,
            end: f64::INFINITY,
        }
    }

    /// Returns `true` if no timestamp can fall inside the window.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn is_empty(&self) -> bool {
        // Written so that NaN bounds also count as empty.
        !(self.start < self.end)
    }

    /// Returns `true` if `timestamp` lies inside the window.
    pub fn contains(&self, timestamp: f64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

/// One sample returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Endpoint the sample came from.
    pub endpoint: EndpointId,
    /// Metric the sample belongs to.
    pub info: Arc<MetricInfo>,
    /// Sample timestamp in seconds.
    pub timestamp: f64,
    /// Sample value.
    pub value: Value,
}

/// Sink receiving query results.
pub trait Appender {
    /// Receives one record.
    fn append(&mut self, record: Record);
}

impl Appender for Vec<Record> {
    fn append(&mut self, record: Record) {
        self.push(record);
    }
}

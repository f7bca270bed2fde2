//! # rota
//!
//! Paged in-memory time-series store with a bounded page pool and
//! generation rotation.
//!
//! rota holds the recent history of metrics scraped from many endpoints in a
//! fixed memory budget. Every page the store will ever use is allocated up
//! front; when the budget is spent, the oldest pages of the longest series
//! are recycled. A separate writer drains samples to durable storage through
//! resumable cursors while queries read the in-memory window.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Bounded memory: the page count is fixed by configuration, not data volume
//! - Writes never block on allocation and never take two locks at once
//! - Samples evicted before being drained are counted, not silently lost
//! - Endpoints come and go by rotating the store; departed endpoints give
//!   their pages back first
//!
//! ## Quick Start
//!
//! ```rust
//! use rota::{EndpointId, Metric, MetricInfo, Record, StoreBuilder, StoreConfig, Window};
//! use rota::metric::{Kind, Unit};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // 1,000 pages of 60 samples each
//! let mut builder = StoreBuilder::new(StoreConfig::new(1_000, 60)?)?;
//! let host = EndpointId::new("web1:6910");
//! builder.register_endpoint(host.clone())?;
//! let store = builder.build();
//!
//! // Ingest one collection pass
//! let cpu = MetricInfo::new("/sys/cpu/user", "User CPU", Unit::None, Kind::Float, 64);
//! store.add(&host, 1_640_000_000.0, &Metric::new(cpu.clone(), 0.25))?;
//! store.add(&host, 1_640_000_060.0, &Metric::new(cpu, 0.5))?;
//!
//! // Query it back, newest first
//! let mut records: Vec<Record> = Vec::new();
//! store.by_prefix_and_endpoint("/sys/", &host, Window::all(), &mut records);
//! assert_eq!(records.len(), 2);
//! assert_eq!(records[0].timestamp, 1_640_000_060.0);
//!
//! // Drain it to durable storage
//! for mut iter in store.iterators(&host) {
//!     let batch: Vec<_> = iter.by_ref().collect();
//!     assert_eq!(batch.len(), 2);
//!     iter.commit();
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Store`]: one generation; endpoint to collection map over a shared pool
//! - [`StoreBuilder`]: produces the next generation and reclaims departed
//!   endpoints
//! - [`TimeSeriesCollection`]: every series of one endpoint
//! - [`TimeSeries`]: one metric's pages, oldest first
//! - [`PagePool`]: fixed set of pages plus the reclaim queue
//! - [`DrainIterator`]: resumable cursor with explicit commit
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`store`]: Store lifecycle, ingestion, queries, rotation
//! - [`collection`]: Per-endpoint series map
//! - [`series`]: Per-metric page chain and write protocol
//! - [`pool`]: Page pool and reclamation
//! - [`page`]: Fixed-capacity sample pages
//! - [`iterator`]: Drain cursors and the read pointer
//! - [`registry`]: Metric identity interning
//! - [`metric`]: Metric identity and value types
//! - [`query`]: Query windows, records and sinks
//! - [`config`]: Store configuration
//! - [`stats`]: Shared counters and gauge snapshots
//! - `exporter`: Prometheus collector (feature `prometheus`)
//! - [`error`]: Error types

pub mod collection;
pub mod config;
pub mod error;
#[cfg(feature = "prometheus")]
pub mod exporter;
pub mod iterator;
pub mod metric;
pub mod page;
pub mod pool;
pub mod query;
pub mod registry;
pub mod series;
pub mod stats;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use collection::TimeSeriesCollection;
pub use config::{ReclaimPlacement, StoreConfig};
pub use error::{ConfigError, InvariantViolation, Result, RotaError};
#[cfg(feature = "prometheus")]
pub use exporter::StoreCollector;
pub use iterator::{DrainIterator, DrainedSample};
pub use metric::{EndpointId, Metric, MetricInfo, Value};
pub use pool::PagePool;
pub use query::{Appender, Record, Window};
pub use series::TimeSeries;
pub use stats::{StoreSnapshot, StoreStats};
pub use store::{Store, StoreBuilder, Visitor};

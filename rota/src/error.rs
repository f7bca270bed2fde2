//! Error types for the rota paged time-series store.
//!
//! Errors come in two classes:
//!
//! - [`InvariantViolation`]: the single-writer-per-series or fixed-capacity
//!   contracts were broken upstream. These abort the offending operation and
//!   must never be absorbed by the caller.
//! - Ordinary errors ([`ConfigError`], [`RotaError::UnknownEndpoint`]) that a
//!   caller can reasonably handle.
//!
//! Expected non-events (out-of-order writes, duplicate values, empty query
//! windows, evicted samples) are not errors at all; they surface as `false`
//! return values, empty results or skip counts.

use thiserror::Error;

use crate::metric::EndpointId;

/// The main error type for all rota operations.
#[derive(Error, Debug)]
pub enum RotaError {
    /// A store invariant was broken. Not recoverable.
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    /// Store configuration was rejected.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A write was routed to an endpoint the current generation does not hold.
    #[error("endpoint '{endpoint}' is not registered in this store")]
    UnknownEndpoint {
        /// The endpoint that was not found.
        endpoint: EndpointId,
    },

    /// Registering or unregistering the Prometheus collector failed.
    #[cfg(feature = "prometheus")]
    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl RotaError {
    /// Returns `true` if this error reports a broken store invariant.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

/// Programming or concurrency-discipline errors.
///
/// Each variant means the store was driven in a way its locking protocol
/// does not allow (two writers on one series, a pool sized too small for the
/// working set). The operation that detects one is aborted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// The page pool has no reclaimable source left.
    #[error("no more pages left: make pages smaller, add memory, or both")]
    PoolExhausted,

    /// A series changed state between the add check and the add itself.
    #[error("multiple writers are adding to time series '{path}'")]
    ConcurrentWriters {
        /// Metric path of the series.
        path: String,
    },

    /// An open series lost all of its pages.
    #[error("time series '{path}' has no pages but was never closed")]
    DrainedSeries {
        /// Metric path of the series.
        path: String,
    },

    /// An open series was asked to give up a page that is not full.
    #[error("open time series '{path}' asked to give up a partial page ({len}/{capacity})")]
    PartialPageReaped {
        /// Metric path of the series.
        path: String,
        /// Samples on the page.
        len: usize,
        /// Page capacity.
        capacity: usize,
    },

    /// A second series was registered for a metric that already has one.
    #[error("multiple writers are adding time series '{path}' to one collection")]
    DuplicateSeries {
        /// Metric path of the series.
        path: String,
    },

    /// An endpoint was registered twice in the same builder.
    #[error("endpoint '{endpoint}' already registered")]
    DuplicateEndpoint {
        /// The endpoint registered twice.
        endpoint: EndpointId,
    },
}

impl InvariantViolation {
    /// Logs the violation and returns it, for use at the point of detection.
    pub(crate) fn raise(self) -> Self {
        tracing::error!(violation = %self, "store invariant violated");
        self
    }
}

/// Errors raised while validating a [`StoreConfig`](crate::config::StoreConfig).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The pool must hold at least one page.
    #[error("invalid total_page_count: {count} (must be > 0)")]
    InvalidPageCount {
        /// The rejected count.
        count: usize,
    },

    /// Pages must hold at least one sample.
    #[error("invalid max_values_per_page: {count} (must be > 0)")]
    InvalidPageCapacity {
        /// The rejected capacity.
        count: usize,
    },

    /// A live series must keep at least its newest page.
    #[error("invalid reaping_threshold: {threshold} (must be >= 1)")]
    InvalidReapingThreshold {
        /// The rejected threshold.
        threshold: usize,
    },
}

/// Type alias for `Result<T, RotaError>`.
pub type Result<T> = std::result::Result<T, RotaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_violation_is_flagged() {
        let err: RotaError = InvariantViolation::PoolExhausted.into();
        assert!(err.is_invariant_violation());

        let err: RotaError = ConfigError::InvalidPageCount { count: 0 }.into();
        assert!(!err.is_invariant_violation());
    }

    #[test]
    fn test_error_messages() {
        let err = InvariantViolation::PartialPageReaped {
            path: "/proc/cpu".to_string(),
            len: 3,
            capacity: 8,
        };
        assert_eq!(
            err.to_string(),
            "open time series '/proc/cpu' asked to give up a partial page (3/8)"
        );

        let err = RotaError::UnknownEndpoint {
            endpoint: EndpointId::new("web1:6910"),
        };
        assert_eq!(
            err.to_string(),
            "endpoint 'web1:6910' is not registered in this store"
        );
    }
}

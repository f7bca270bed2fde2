//! Store configuration.
//!
//! A [`StoreConfig`] fixes the page budget for the lifetime of the process:
//! how many pages exist, how many samples each page holds, how many pages a
//! live series keeps before the pool may reclaim from it, and where pages of
//! departed endpoints are requeued on rotation. Every store generation built
//! from a store shares its configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default number of pages a live series keeps before it becomes reapable.
pub const DEFAULT_REAPING_THRESHOLD: usize = 2;

/// Configuration for a paged store.
///
/// # Example
///
/// ```rust
/// use rota::config::{ReclaimPlacement, StoreConfig};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = StoreConfig::new(10_000, 60)?;
/// assert_eq!(config.reaping_threshold, 2);
/// assert_eq!(config.departed_placement, ReclaimPlacement::Front);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Number of pages allocated up front. The pool never grows past this.
    pub total_page_count: usize,

    /// Capacity of every page, in samples.
    pub max_values_per_page: usize,

    /// Page count a live series may hold before each further page makes it
    /// a reclaim source in the pool.
    #[serde(default = "default_reaping_threshold")]
    pub reaping_threshold: usize,

    /// Where pages of endpoints dropped during rotation are requeued.
    #[serde(default)]
    pub departed_placement: ReclaimPlacement,
}

fn default_reaping_threshold() -> usize {
    DEFAULT_REAPING_THRESHOLD
}

impl StoreConfig {
    /// Creates a validated configuration with default reaping settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either size is zero.
    pub fn new(total_page_count: usize, max_values_per_page: usize) -> Result<Self> {
        let config = Self {
            total_page_count,
            max_values_per_page,
            reaping_threshold: DEFAULT_REAPING_THRESHOLD,
            departed_placement: ReclaimPlacement::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the reaping threshold.
    pub fn with_reaping_threshold(mut self, threshold: usize) -> Self {
        self.reaping_threshold = threshold;
        self
    }

    /// Sets where pages of departed endpoints are requeued.
    pub fn with_departed_placement(mut self, placement: ReclaimPlacement) -> Self {
        self.departed_placement = placement;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidPageCount`] if `total_page_count` is zero
    /// - [`ConfigError::InvalidPageCapacity`] if `max_values_per_page` is zero
    /// - [`ConfigError::InvalidReapingThreshold`] if `reaping_threshold` is zero
    pub fn validate(&self) -> Result<()> {
        if self.total_page_count == 0 {
            return Err(ConfigError::InvalidPageCount {
                count: self.total_page_count,
            }
            .into());
        }

        if self.max_values_per_page == 0 {
            return Err(ConfigError::InvalidPageCapacity {
                count: self.max_values_per_page,
            }
            .into());
        }

        // A live series always needs its newest page to append into.
        if self.reaping_threshold == 0 {
            return Err(ConfigError::InvalidReapingThreshold {
                threshold: self.reaping_threshold,
            }
            .into());
        }

        Ok(())
    }

    /// Total number of samples the store can hold at once.
    pub fn sample_capacity(&self) -> usize {
        self.total_page_count.saturating_mul(self.max_values_per_page)
    }
}

/// Queue position for pages reclaimed from departed endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimPlacement {
    /// Reuse departed pages before anything already queued.
    #[default]
    Front,
    /// Queue departed pages behind everything already queued.
    Back,
}

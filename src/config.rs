//! Pool and reclaimer configuration options

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of instances a pool keeps when no size is configured.
pub const DEFAULT_POOL_SIZE: usize = 100;

/// Interval between two reclaimer sweeps when none is configured.
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for object pool behavior
///
/// # Examples
///
/// ```
/// use reclaim_pool::PoolConfiguration;
///
/// let config = PoolConfiguration::new()
///     .with_size(16)
///     .with_prepopulate(false)
///     .with_name("sessions");
///
/// assert_eq!(config.size, 16);
/// assert!(!config.prepopulate);
/// assert_eq!(config.name.as_deref(), Some("sessions"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Maximum number of instances held in the available set. Checkouts beyond
    /// this are constructed on demand and dropped again on recycle.
    pub size: usize,

    /// Fill the available set with `size` fresh instances at construction
    pub prepopulate: bool,

    /// Name used in log events and metric labels
    pub name: Option<String>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            prepopulate: true,
            name: None,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool size
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Enable or disable pre-population
    pub fn with_prepopulate(mut self, prepopulate: bool) -> Self {
        self.prepopulate = prepopulate;
        self
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Configuration for the background reclaimer
///
/// # Examples
///
/// ```
/// use reclaim_pool::ReclaimerConfig;
/// use std::time::Duration;
///
/// let config = ReclaimerConfig::new().with_interval(Duration::from_millis(250));
/// assert_eq!(config.interval, Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReclaimerConfig {
    /// Time slept between sweeps
    pub interval: Duration,

    /// Name given to the reclaimer OS thread
    pub thread_name: String,
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECLAIM_INTERVAL,
            thread_name: "pool-reclaimer".to_string(),
        }
    }
}

impl ReclaimerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

//! # reclaim_pool
//!
//! Bounded, thread-safe object pool that tolerates callers who forget to
//! give objects back.
//!
//! ## Features
//!
//! - `create` never blocks: an empty pool constructs a fresh instance
//! - `recycle` re-initializes the instance and keeps at most `size` of them
//! - Checkouts are tracked weakly, so an object dropped without a recycle
//!   does not pin pool capacity forever
//! - A [`Reclaimer`] detects those recycle violations, logs them and
//!   rebuilds the missing instances, on a thread, a tokio task or on demand
//! - Simple [`PojoFactory`] and [`SingletonFactory`] behind the same
//!   [`Factory`] trait
//! - Metrics snapshots with Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use reclaim_pool::{ObjectPool, PoolConfiguration, Reclaimer, ReclaimerConfig};
//!
//! let reclaimer = Reclaimer::new(ReclaimerConfig::default());
//! let pool = ObjectPool::builder(String::new)
//!     .with_configuration(PoolConfiguration::new().with_size(8))
//!     .with_initializer(|s: &mut String| s.clear())
//!     .build()
//!     .unwrap();
//! reclaimer.register(&pool);
//!
//! let mut greeting = pool.create().unwrap();
//! greeting.push_str("hello");
//! pool.recycle(greeting);
//!
//! assert_eq!(pool.available_count(), 8);
//! ```

mod config;
mod errors;
mod factory;
mod lock;
mod metrics;
mod pool;
mod reclaimer;

pub use config::{DEFAULT_POOL_SIZE, DEFAULT_RECLAIM_INTERVAL, PoolConfiguration, ReclaimerConfig};
pub use errors::{BoxError, PoolError, PoolResult};
pub use factory::{Factory, PojoFactory, SingletonFactory, TargetType};
pub use lock::{LockKey, PoolId};
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{Initializer, ObjectPool, ObjectPoolBuilder, PooledObject};
pub use reclaimer::{PollOutcome, PoolSweep, Reclaimer, SweepReport};

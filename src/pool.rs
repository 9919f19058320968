//! Core object pool implementation

use crate::config::PoolConfiguration;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::factory::{self, Constructor, Factory, TargetType};
use crate::lock::{Lease, LockKey, LockReference, PoolId, ReferenceQueue};
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::reclaimer::{PollOutcome, Reclaimable};

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, trace, warn};

/// Resets an instance before it re-enters the available set.
///
/// Calls are serialized per pool, so an initializer may keep mutable state.
pub trait Initializer<T>: Send {
    fn initialize(&mut self, object: &mut T);
}

impl<T, F> Initializer<T> for F
where
    F: FnMut(&mut T) + Send,
{
    fn initialize(&mut self, object: &mut T) {
        self(object)
    }
}

/// An object checked out of an [`ObjectPool`].
///
/// Hand it back with [`ObjectPool::recycle`]. Dropping it instead is a
/// recycle violation: the value is destroyed and the reclaimer later builds a
/// replacement.
pub struct PooledObject<T> {
    value: T,
    lease: Arc<Lease>,
}

impl<T> PooledObject<T> {
    /// Tracking key assigned at checkout
    pub fn key(&self) -> LockKey {
        self.lease.key()
    }
}

impl<T> Deref for PooledObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> DerefMut for PooledObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for PooledObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledObject")
            .field("key", &self.key())
            .field("value", &self.value)
            .finish()
    }
}

struct PoolState<T> {
    available: VecDeque<T>,
    locked: HashMap<LockKey, LockReference>,
}

pub(crate) struct PoolCore<T> {
    id: PoolId,
    name: Option<String>,
    size: usize,
    constructor: Constructor<T>,
    initializer: Option<Mutex<Box<dyn Initializer<T>>>>,
    state: Mutex<PoolState<T>>,
    queue: Arc<ReferenceQueue>,
    next_serial: AtomicU64,
    metrics: MetricsTracker,
}

impl<T: Send + 'static> PoolCore<T> {
    fn construct(&self) -> PoolResult<T> {
        let value = (self.constructor)().map_err(PoolError::construction::<T>)?;
        MetricsTracker::bump(&self.metrics.constructed);
        Ok(value)
    }

    fn initialize(&self, object: &mut T) {
        if let Some(initializer) = &self.initializer {
            initializer.lock().initialize(object);
        }
    }

    fn populate(&self) -> PoolResult<()> {
        for _ in 0..self.size {
            let value = self.construct()?;
            self.state.lock().available.push_back(value);
        }
        Ok(())
    }

    fn create(&self) -> PoolResult<PooledObject<T>> {
        let key = LockKey::new(self.id, self.next_serial.fetch_add(1, Ordering::Relaxed));

        // An available instance moves into the tracking map under one lock.
        {
            let mut state = self.state.lock();
            if let Some(value) = state.available.pop_front() {
                let lease = Lease::new(key, &self.queue);
                state.locked.insert(key, LockReference::new(&lease));
                drop(state);
                MetricsTracker::bump(&self.metrics.checkouts);
                return Ok(PooledObject { value, lease });
            }
        }

        debug!(
            pool = %self.id,
            target = std::any::type_name::<T>(),
            size = self.size,
            "Pool empty, constructing overflow instance"
        );
        let value = self.construct()?;

        let lease = Lease::new(key, &self.queue);
        self.state.lock().locked.insert(key, LockReference::new(&lease));
        MetricsTracker::bump(&self.metrics.checkouts);

        Ok(PooledObject { value, lease })
    }

    fn recycle(&self, object: PooledObject<T>) {
        let PooledObject { mut value, lease } = object;
        let target = LockReference::new(&lease);
        let key = target.key();

        let matched = {
            let mut state = self.state.lock();
            if state.locked.get(&key).is_some_and(|record| *record == target) {
                state.locked.remove(&key);
                true
            } else {
                false
            }
        };

        if !matched {
            MetricsTracker::bump(&self.metrics.unmatched_recycles);
            trace!(pool = %self.id, ?key, "Recycled object has no tracking record, ignoring");
            return;
        }

        lease.disarm();
        drop(lease);

        if self.state.lock().available.len() >= self.size {
            self.drop_over_capacity(key);
            return;
        }

        self.initialize(&mut value);

        // Capacity may have been taken while the initializer ran.
        let rejected = {
            let mut state = self.state.lock();
            if state.available.len() < self.size {
                state.available.push_back(value);
                None
            } else {
                Some(value)
            }
        };

        match rejected {
            None => MetricsTracker::bump(&self.metrics.recycled),
            Some(value) => {
                drop(value);
                self.drop_over_capacity(key);
            }
        }
    }

    fn drop_over_capacity(&self, key: LockKey) {
        MetricsTracker::bump(&self.metrics.over_capacity_drops);
        trace!(pool = %self.id, ?key, size = self.size, "Pool full, dropping recycled object");
    }

    fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.available.len(), state.locked.len())
    }
}

impl<T: Send + 'static> Reclaimable for PoolCore<T> {
    fn pool_id(&self) -> PoolId {
        self.id
    }

    fn target_type(&self) -> TargetType {
        TargetType::of::<T>()
    }

    fn poll(&self) -> PollOutcome {
        let mut outcome = PollOutcome::default();
        let mut can_construct = true;

        while let Some(key) = self.queue.poll() {
            outcome.reclaimed += 1;

            let has_room = {
                let mut state = self.state.lock();
                state.locked.remove(&key);
                state.available.len() < self.size
            };

            if !has_room || !can_construct {
                continue;
            }

            match self.construct() {
                Ok(fresh) => {
                    let mut state = self.state.lock();
                    if state.available.len() < self.size {
                        state.available.push_back(fresh);
                        outcome.replenished += 1;
                        MetricsTracker::bump(&self.metrics.replenished);
                    }
                }
                Err(err) => {
                    error!(
                        pool = %self.id,
                        target = std::any::type_name::<T>(),
                        error = %err,
                        "Failed to replenish pool after recycle violation"
                    );
                    can_construct = false;
                }
            }
        }

        if outcome.reclaimed > 0 {
            self.metrics
                .recycle_violations
                .fetch_add(outcome.reclaimed, Ordering::Relaxed);
            warn!(
                pool = %self.id,
                name = self.name.as_deref().unwrap_or_default(),
                target = std::any::type_name::<T>(),
                reclaimed = outcome.reclaimed,
                replenished = outcome.replenished,
                "Recycle violation: pooled objects dropped without being recycled"
            );
        }

        outcome
    }
}

/// Bounded pool of reusable instances of one target type
///
/// `create` never waits: when nothing is available a fresh instance is
/// constructed. `recycle` puts an instance back only while fewer than `size`
/// are available; beyond that it is dropped. Checkouts that are dropped
/// without a recycle are detected by a [`Reclaimer`](crate::Reclaimer) the
/// pool is registered with.
///
/// # Examples
///
/// ```
/// use reclaim_pool::{ObjectPool, PoolConfiguration};
///
/// let pool = ObjectPool::builder(Vec::<u8>::new)
///     .with_configuration(PoolConfiguration::new().with_size(2))
///     .with_initializer(|buf: &mut Vec<u8>| buf.clear())
///     .build()
///     .unwrap();
///
/// let mut buf = pool.create().unwrap();
/// buf.extend_from_slice(b"hello");
/// pool.recycle(buf);
///
/// assert_eq!(pool.available_count(), 2);
/// assert!(pool.create().unwrap().is_empty());
/// ```
pub struct ObjectPool<T> {
    inner: Arc<PoolCore<T>>,
}

impl<T> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> ObjectPool<T> {
    /// Start building a pool around an infallible constructor
    pub fn builder<F>(constructor: F) -> ObjectPoolBuilder<T>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        ObjectPoolBuilder::new(factory::infallible(constructor))
    }

    /// Start building a pool around a fallible constructor
    pub fn try_builder<F, E>(constructor: F) -> ObjectPoolBuilder<T>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        ObjectPoolBuilder::new(factory::constructor(constructor))
    }

    /// Create a pool without an initializer
    pub fn new<F>(constructor: F, config: PoolConfiguration) -> PoolResult<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::builder(constructor).with_configuration(config).build()
    }

    /// Check out an instance, constructing one if none is available.
    ///
    /// Fails only when the constructor fails.
    pub fn create(&self) -> PoolResult<PooledObject<T>> {
        self.inner.create()
    }

    /// Return an instance to the pool.
    ///
    /// `None`, objects from other pools, and recycles while the pool is full
    /// are absorbed silently.
    pub fn recycle(&self, object: impl Into<Option<PooledObject<T>>>) {
        if let Some(object) = object.into() {
            self.inner.recycle(object);
        }
    }

    pub fn target_type(&self) -> TargetType {
        TargetType::of::<T>()
    }

    /// Drain this pool's abandoned checkouts now, as a reclaimer sweep would.
    pub fn reclaim(&self) -> PollOutcome {
        self.inner.poll()
    }

    pub fn id(&self) -> PoolId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn available_count(&self) -> usize {
        self.inner.state.lock().available.len()
    }

    /// Tracked checkouts, including dropped ones not yet reclaimed
    pub fn outstanding_count(&self) -> usize {
        self.inner.state.lock().locked.len()
    }

    pub fn get_metrics(&self) -> PoolMetrics {
        let (available, outstanding) = self.inner.counts();
        self.inner
            .metrics
            .get_metrics(outstanding, available, self.inner.size)
    }

    pub(crate) fn core(&self) -> &Arc<PoolCore<T>> {
        &self.inner
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("size", &self.inner.size)
            .field("target", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: Send + 'static> Factory for ObjectPool<T> {
    type Object = PooledObject<T>;

    fn target_type(&self) -> TargetType {
        TargetType::of::<T>()
    }

    fn create(&self) -> PoolResult<PooledObject<T>> {
        self.inner.create()
    }

    fn recycle(&self, object: Option<PooledObject<T>>) {
        if let Some(object) = object {
            self.inner.recycle(object);
        }
    }
}

/// Builder for [`ObjectPool`]
pub struct ObjectPoolBuilder<T> {
    constructor: Constructor<T>,
    config: PoolConfiguration,
    initializer: Option<Box<dyn Initializer<T>>>,
}

impl<T: Send + 'static> ObjectPoolBuilder<T> {
    fn new(constructor: Constructor<T>) -> Self {
        Self {
            constructor,
            config: PoolConfiguration::default(),
            initializer: None,
        }
    }

    pub fn with_configuration(mut self, config: PoolConfiguration) -> Self {
        self.config = config;
        self
    }

    /// Set the initializer run on every recycled instance
    pub fn with_initializer<I>(mut self, initializer: I) -> Self
    where
        I: Initializer<T> + 'static,
    {
        self.initializer = Some(Box::new(initializer));
        self
    }

    /// Build the pool, pre-populating it unless disabled.
    pub fn build(self) -> PoolResult<ObjectPool<T>> {
        let PoolConfiguration {
            size,
            prepopulate,
            name,
        } = self.config;

        let core = PoolCore {
            id: PoolId::next(),
            name,
            size,
            constructor: self.constructor,
            initializer: self.initializer.map(Mutex::new),
            state: Mutex::new(PoolState {
                available: VecDeque::with_capacity(size),
                locked: HashMap::new(),
            }),
            queue: Arc::new(ReferenceQueue::new()),
            next_serial: AtomicU64::new(0),
            metrics: MetricsTracker::new(),
        };

        if prepopulate {
            core.populate()?;
        }

        Ok(ObjectPool {
            inner: Arc::new(core),
        })
    }
}

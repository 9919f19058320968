//! Background reclamation of abandoned checkouts
//!
//! A [`Reclaimer`] holds weak registrations of any number of pools. Every
//! sweep drains each pool's reference queue, drops the stale tracking records
//! and rebuilds instances until the pool is back at its configured size. It
//! is an ordinary value: the application creates one, registers pools with
//! it and decides whether it runs on a dedicated thread, on a tokio task, or
//! only when [`Reclaimer::sweep`] is called.

use crate::config::ReclaimerConfig;
use crate::errors::{PoolError, PoolResult};
use crate::factory::TargetType;
use crate::lock::PoolId;
use crate::pool::{ObjectPool, PoolCore};

use crossbeam::channel::{self, RecvTimeoutError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A pool as seen by the reclaimer
pub(crate) trait Reclaimable: Send + Sync {
    fn pool_id(&self) -> PoolId;

    fn target_type(&self) -> TargetType;

    /// Drain the reference queue and restore capacity
    fn poll(&self) -> PollOutcome;
}

/// Result of polling one pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Checkouts found dropped without a recycle
    pub reclaimed: usize,

    /// Fresh instances added to the available set
    pub replenished: usize,
}

impl PollOutcome {
    pub fn is_violation(&self) -> bool {
        self.reclaimed > 0
    }
}

/// Outcome for one pool within a sweep
#[derive(Debug, Clone, Copy)]
pub struct PoolSweep {
    pub pool: PoolId,
    pub target: TargetType,
    pub outcome: PollOutcome,
}

/// Result of one reclaimer sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Every live pool visited
    pub pools: Vec<PoolSweep>,

    /// Registrations removed because their pool no longer exists
    pub released: usize,

    /// Pools whose poll panicked, usually in a constructor
    pub panicked: usize,
}

impl SweepReport {
    /// Pools that had at least one recycle violation
    pub fn violations(&self) -> usize {
        self.pools.iter().filter(|p| p.outcome.is_violation()).count()
    }

    pub fn total_reclaimed(&self) -> usize {
        self.pools.iter().map(|p| p.outcome.reclaimed).sum()
    }

    pub fn outcome(&self, pool: PoolId) -> Option<PollOutcome> {
        self.pools.iter().find(|p| p.pool == pool).map(|p| p.outcome)
    }
}

#[derive(Default)]
struct Registry {
    pools: DashMap<PoolId, Weak<dyn Reclaimable>>,
    sweeping: Mutex<()>,
}

impl Registry {
    fn sweep(&self) -> SweepReport {
        let _sweeping = self.sweeping.lock();

        // Snapshot so registrations made during the sweep never wait on it.
        let entries: Vec<(PoolId, Weak<dyn Reclaimable>)> = self
            .pools
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut report = SweepReport::default();
        for (id, registration) in entries {
            match registration.upgrade() {
                Some(pool) => match panic::catch_unwind(AssertUnwindSafe(|| pool.poll())) {
                    Ok(outcome) => report.pools.push(PoolSweep {
                        pool: pool.pool_id(),
                        target: pool.target_type(),
                        outcome,
                    }),
                    Err(_) => {
                        report.panicked += 1;
                        warn!(
                            pool = %id,
                            target = %pool.target_type(),
                            "Pool poll panicked, skipping it for this sweep"
                        );
                    }
                },
                None => {
                    self.pools.remove(&id);
                    report.released += 1;
                    debug!(pool = %id, "Pool dropped, releasing registration");
                }
            }
        }
        report
    }
}

enum Worker {
    Thread {
        stop: channel::Sender<()>,
        handle: std::thread::JoinHandle<()>,
    },
    Task {
        stop: tokio::sync::oneshot::Sender<()>,
        handle: tokio::task::JoinHandle<()>,
    },
}

/// Shared service that repairs pools after recycle violations
///
/// # Examples
///
/// ```
/// use reclaim_pool::{ObjectPool, PoolConfiguration, Reclaimer, ReclaimerConfig};
///
/// let reclaimer = Reclaimer::new(ReclaimerConfig::default());
/// let pool = ObjectPool::new(String::new, PoolConfiguration::new().with_size(2)).unwrap();
/// reclaimer.register(&pool);
///
/// // A checkout that is never recycled
/// drop(pool.create().unwrap());
///
/// let report = reclaimer.sweep();
/// assert_eq!(report.violations(), 1);
/// assert_eq!(pool.available_count(), 2);
/// ```
pub struct Reclaimer {
    config: ReclaimerConfig,
    registry: Arc<Registry>,
    worker: Mutex<Option<Worker>>,
}

impl Reclaimer {
    pub fn new(config: ReclaimerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::default()),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ReclaimerConfig {
        &self.config
    }

    /// Register a pool. Returns `false` if it was already registered.
    pub fn register<T: Send + 'static>(&self, pool: &ObjectPool<T>) -> bool {
        let core: Weak<PoolCore<T>> = Arc::downgrade(pool.core());
        let registration: Weak<dyn Reclaimable> = core;
        match self.registry.pools.entry(pool.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(registration);
                debug!(pool = %pool.id(), target = %pool.target_type(), "Pool registered with reclaimer");
                true
            }
        }
    }

    /// Remove a pool's registration. Returns `false` if it was not registered.
    pub fn deregister<T: Send + 'static>(&self, pool: &ObjectPool<T>) -> bool {
        self.registry.pools.remove(&pool.id()).is_some()
    }

    pub fn registered_count(&self) -> usize {
        self.registry.pools.len()
    }

    /// Run one sweep over every registered pool on the calling thread.
    pub fn sweep(&self) -> SweepReport {
        self.registry.sweep()
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Sweep periodically on a dedicated OS thread.
    pub fn start(&self) -> PoolResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(PoolError::ReclaimerRunning);
        }
        let interval = self.checked_interval()?;

        let (stop, stopped) = channel::bounded::<()>(1);
        let registry = Arc::clone(&self.registry);
        let handle = std::thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            registry.sweep();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        info!(
            interval_ms = interval.as_millis() as u64,
            thread = %self.config.thread_name,
            "Reclaimer started"
        );
        *worker = Some(Worker::Thread { stop, handle });
        Ok(())
    }

    /// Sweep periodically on a task of the current tokio runtime.
    ///
    /// Sweeps run on the blocking pool since constructors may block.
    pub fn start_async(&self) -> PoolResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(PoolError::ReclaimerRunning);
        }
        let period = self.checked_interval()?;

        let (stop, mut stopped) = tokio::sync::oneshot::channel::<()>();
        let registry = Arc::clone(&self.registry);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        let registry = Arc::clone(&registry);
                        if let Err(err) = tokio::task::spawn_blocking(move || registry.sweep()).await {
                            warn!(error = %err, "Reclaimer sweep failed");
                        }
                    }
                }
            }
        });

        info!(interval_ms = period.as_millis() as u64, "Reclaimer task started");
        *worker = Some(Worker::Task { stop, handle });
        Ok(())
    }

    /// Stop the background worker.
    ///
    /// A worker thread is joined. A tokio task is only signalled; use
    /// [`Reclaimer::shutdown_async`] to wait for it.
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        match worker {
            Some(Worker::Thread { stop, handle }) => {
                let _ = stop.send(());
                if handle.join().is_err() {
                    warn!("Reclaimer thread panicked");
                }
                info!("Reclaimer stopped");
            }
            Some(Worker::Task { stop, handle }) => {
                let _ = stop.send(());
                drop(handle);
                info!("Reclaimer task signalled to stop");
            }
            None => {}
        }
    }

    /// Stop the background worker and wait for it to finish.
    pub async fn shutdown_async(&self) {
        let worker = self.worker.lock().take();
        match worker {
            Some(Worker::Task { stop, handle }) => {
                let _ = stop.send(());
                if let Err(err) = handle.await {
                    warn!(error = %err, "Reclaimer task failed");
                }
                info!("Reclaimer stopped");
            }
            Some(Worker::Thread { stop, handle }) => {
                let _ = stop.send(());
                match tokio::task::spawn_blocking(move || handle.join()).await {
                    Ok(Ok(())) => info!("Reclaimer stopped"),
                    _ => warn!("Reclaimer thread panicked"),
                }
            }
            None => {}
        }
    }

    fn checked_interval(&self) -> PoolResult<std::time::Duration> {
        if self.config.interval.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "reclaimer interval must be greater than zero".to_string(),
            ));
        }
        Ok(self.config.interval)
    }
}

impl Default for Reclaimer {
    fn default() -> Self {
        Self::new(ReclaimerConfig::default())
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reclaimer")
            .field("config", &self.config)
            .field("registered", &self.registered_count())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfiguration;
    use std::time::{Duration, Instant};
    use tracing_test::traced_test;

    fn fast() -> ReclaimerConfig {
        ReclaimerConfig::new().with_interval(Duration::from_millis(10))
    }

    fn pool_of(size: usize) -> ObjectPool<String> {
        ObjectPool::new(String::new, PoolConfiguration::new().with_size(size)).unwrap()
    }

    fn leak_all(pool: &ObjectPool<String>) {
        let held: Vec<_> = (0..pool.size()).map(|_| pool.create().unwrap()).collect();
        drop(held);
    }

    #[test]
    fn test_registration_is_idempotent() {
        let reclaimer = Reclaimer::default();
        let pool = pool_of(1);

        assert!(reclaimer.register(&pool));
        assert!(!reclaimer.register(&pool));
        assert!(!reclaimer.register(&pool.clone()));
        assert_eq!(reclaimer.registered_count(), 1);

        assert!(reclaimer.deregister(&pool));
        assert!(!reclaimer.deregister(&pool));
        assert_eq!(reclaimer.registered_count(), 0);
    }

    #[traced_test]
    #[test]
    fn test_sweep_heals_leaks_and_logs_once() {
        let reclaimer = Reclaimer::default();
        let pool = ObjectPool::builder(String::new)
            .with_configuration(PoolConfiguration::new().with_size(2))
            .with_initializer(|_: &mut String| {})
            .build()
            .unwrap();
        reclaimer.register(&pool);

        leak_all(&pool);
        assert_eq!(pool.available_count(), 0);

        let report = reclaimer.sweep();
        assert_eq!(pool.available_count(), 2);
        assert_eq!(report.violations(), 1);
        assert_eq!(
            report.outcome(pool.id()),
            Some(PollOutcome { reclaimed: 2, replenished: 2 })
        );

        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|line| line.contains("Recycle violation")).count() {
                1 => Ok(()),
                n => Err(format!("expected one recycle violation, saw {n}")),
            }
        });
    }

    #[traced_test]
    #[test]
    fn test_clean_pools_are_quiet() {
        let reclaimer = Reclaimer::default();
        let pool = pool_of(2);
        reclaimer.register(&pool);

        let obj = pool.create().unwrap();
        pool.recycle(obj);

        let report = reclaimer.sweep();
        assert_eq!(report.violations(), 0);
        assert_eq!(report.total_reclaimed(), 0);
        assert!(!logs_contain("Recycle violation"));
    }

    #[test]
    fn test_sweep_visits_every_pool() {
        let reclaimer = Reclaimer::default();
        let leaky = pool_of(2);
        let tidy = pool_of(3);
        reclaimer.register(&leaky);
        reclaimer.register(&tidy);

        leak_all(&leaky);

        let report = reclaimer.sweep();
        assert_eq!(report.pools.len(), 2);
        assert_eq!(report.violations(), 1);
        assert_eq!(report.total_reclaimed(), 2);
        assert_eq!(report.outcome(tidy.id()), Some(PollOutcome::default()));
        assert!(report.pools.iter().all(|p| p.target.is::<String>()));
    }

    #[test]
    fn test_dropped_pool_is_released() {
        let reclaimer = Reclaimer::default();
        let pool = pool_of(1);
        reclaimer.register(&pool);
        drop(pool);

        let report = reclaimer.sweep();
        assert_eq!(report.released, 1);
        assert!(report.pools.is_empty());
        assert_eq!(reclaimer.registered_count(), 0);
    }

    #[test]
    fn test_background_thread_heals_and_stops() {
        let reclaimer = Reclaimer::new(fast());
        let pool = pool_of(2);
        reclaimer.register(&pool);

        reclaimer.start().unwrap();
        assert!(reclaimer.is_running());
        assert!(matches!(reclaimer.start(), Err(PoolError::ReclaimerRunning)));

        leak_all(&pool);

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.available_count() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pool.available_count(), 2);

        reclaimer.shutdown();
        assert!(!reclaimer.is_running());

        // Restartable after shutdown.
        reclaimer.start().unwrap();
        reclaimer.shutdown();
    }

    /// Constructor that succeeds `ok_calls` times, then fails or panics.
    fn flaky_pool(ok_calls: usize, panics: bool) -> ObjectPool<String> {
        let calls = std::sync::atomic::AtomicUsize::new(0);
        ObjectPool::try_builder(move || {
            if calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < ok_calls {
                Ok(String::new())
            } else if panics {
                panic!("constructor exploded");
            } else {
                Err("backing store unavailable")
            }
        })
        .with_configuration(PoolConfiguration::new().with_size(ok_calls))
        .build()
        .unwrap()
    }

    #[traced_test]
    #[test]
    fn test_replenish_failure_stops_pool_but_not_sweep() {
        let reclaimer = Reclaimer::default();
        let broken = flaky_pool(2, false);
        let healthy = pool_of(2);
        reclaimer.register(&broken);
        reclaimer.register(&healthy);

        leak_all(&broken);
        leak_all(&healthy);

        let report = reclaimer.sweep();
        assert_eq!(
            report.outcome(broken.id()),
            Some(PollOutcome { reclaimed: 2, replenished: 0 })
        );
        assert_eq!(
            report.outcome(healthy.id()),
            Some(PollOutcome { reclaimed: 2, replenished: 2 })
        );
        assert_eq!(broken.available_count(), 0);
        assert_eq!(broken.outstanding_count(), 0);
        assert_eq!(healthy.available_count(), 2);

        logs_assert(|lines: &[&str]| {
            let failures = lines
                .iter()
                .filter(|line| line.contains("ERROR") && line.contains("Failed to replenish"))
                .count();
            let violations = lines.iter().filter(|line| line.contains("Recycle violation")).count();
            match (failures, violations) {
                // One failure per cycle: the second key is not retried.
                (1, 2) => Ok(()),
                other => Err(format!("expected (1 failure, 2 violations), saw {other:?}")),
            }
        });
    }

    #[test]
    fn test_sweep_survives_panicking_constructor() {
        let reclaimer = Reclaimer::default();
        let bad = flaky_pool(1, true);
        let good = pool_of(1);
        reclaimer.register(&bad);
        reclaimer.register(&good);

        drop(bad.create().unwrap());
        drop(good.create().unwrap());

        let report = reclaimer.sweep();
        assert_eq!(report.panicked, 1);
        assert_eq!(report.outcome(bad.id()), None);
        assert_eq!(report.outcome(good.id()), Some(PollOutcome { reclaimed: 1, replenished: 1 }));
        assert_eq!(good.available_count(), 1);

        // Nothing left to drain, so the next sweep is clean.
        assert_eq!(reclaimer.sweep().panicked, 0);
    }

    #[test]
    fn test_background_thread_survives_panicking_constructor() {
        let reclaimer = Reclaimer::new(fast());
        let bad = flaky_pool(1, true);
        let good = pool_of(1);
        reclaimer.register(&bad);
        reclaimer.register(&good);
        reclaimer.start().unwrap();

        let wait_for_good = || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while good.available_count() < 1 && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            good.available_count()
        };

        drop(bad.create().unwrap());
        drop(good.create().unwrap());
        assert_eq!(wait_for_good(), 1);

        // The worker is still sweeping after the panic.
        drop(good.create().unwrap());
        assert_eq!(wait_for_good(), 1);
        assert!(reclaimer.is_running());

        reclaimer.shutdown();
    }

    #[test]
    fn test_zero_interval_rejected() {
        let reclaimer = Reclaimer::new(ReclaimerConfig::new().with_interval(Duration::ZERO));
        assert!(matches!(reclaimer.start(), Err(PoolError::InvalidConfiguration(_))));
        assert!(!reclaimer.is_running());
    }

    #[test]
    fn test_start_async_requires_runtime() {
        let reclaimer = Reclaimer::new(fast());
        assert!(matches!(reclaimer.start_async(), Err(PoolError::NoRuntime)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_task_heals_and_stops() {
        let reclaimer = Reclaimer::new(fast());
        let pool = pool_of(3);
        reclaimer.register(&pool);
        reclaimer.start_async().unwrap();

        leak_all(&pool);

        let healed = tokio::time::timeout(Duration::from_secs(5), async {
            while pool.available_count() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(healed.is_ok());

        reclaimer.shutdown_async().await;
        assert!(!reclaimer.is_running());
    }
}

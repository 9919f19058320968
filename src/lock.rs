//! Weak tracking of checked-out instances
//!
//! Every checkout owns a [`Lease`] through an `Arc`. The pool keeps only a
//! [`LockReference`] holding a `Weak` to that lease, so the tracker can tell
//! whether a checkout is still alive without being the reason it stays alive.
//! A lease that is dropped while still armed (its checkout was never
//! recycled) posts its key to the pool's [`ReferenceQueue`], where the
//! reclaimer picks it up.

use crossbeam::queue::SegQueue;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique pool identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(u64);

impl PoolId {
    pub(crate) fn next() -> Self {
        PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool-{}", self.0)
    }
}

/// Key of a tracking record, fixed when the checkout is handed out.
///
/// Stays valid after the checkout is gone, so a late `recycle` or a drained
/// queue entry can still find its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey {
    pool: PoolId,
    serial: u64,
}

impl LockKey {
    pub(crate) fn new(pool: PoolId, serial: u64) -> Self {
        Self { pool, serial }
    }

    pub fn pool(&self) -> PoolId {
        self.pool
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

/// Queue of keys whose leases were dropped without a recycle
#[derive(Default)]
pub(crate) struct ReferenceQueue {
    keys: SegQueue<LockKey>,
}

impl ReferenceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, key: LockKey) {
        self.keys.push(key);
    }

    pub fn poll(&self) -> Option<LockKey> {
        self.keys.pop()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Liveness token carried by a checked-out object.
pub(crate) struct Lease {
    key: LockKey,
    armed: AtomicBool,
    queue: Weak<ReferenceQueue>,
}

impl Lease {
    pub fn new(key: LockKey, queue: &Arc<ReferenceQueue>) -> Arc<Self> {
        Arc::new(Self {
            key,
            armed: AtomicBool::new(true),
            queue: Arc::downgrade(queue),
        })
    }

    pub fn key(&self) -> LockKey {
        self.key
    }

    /// Stop the lease from reporting itself as abandoned on drop.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.armed.load(Ordering::Acquire)
            && let Some(queue) = self.queue.upgrade()
        {
            queue.push(self.key);
        }
    }
}

/// Tracking record for one outstanding checkout.
///
/// Two records are equal only while both leases are alive and are the same
/// lease. A record whose lease is gone is equal to nothing, itself included.
pub(crate) struct LockReference {
    key: LockKey,
    referent: Weak<Lease>,
}

impl LockReference {
    pub fn new(lease: &Arc<Lease>) -> Self {
        Self {
            key: lease.key(),
            referent: Arc::downgrade(lease),
        }
    }

    pub fn key(&self) -> LockKey {
        self.key
    }

    pub fn get(&self) -> Option<Arc<Lease>> {
        self.referent.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.referent.strong_count() > 0
    }
}

impl PartialEq for LockReference {
    fn eq(&self, other: &Self) -> bool {
        match (self.get(), other.get()) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
            _ => false,
        }
    }
}

impl fmt::Debug for LockReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockReference")
            .field("key", &self.key)
            .field("alive", &self.is_alive())
            .finish()
    }
}

//! Factories that hand out instances of a target type
//!
//! [`ObjectPool`](crate::ObjectPool) is the pooled factory. The two simpler
//! factories here build a fresh instance per call or share one instance.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use crate::errors::{BoxError, PoolError, PoolResult};

/// Runtime descriptor of the type a factory produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetType {
    id: TypeId,
    name: &'static str,
}

impl TargetType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this descriptor names `T`
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Creates and recycles objects of one target type
pub trait Factory: Send + Sync {
    /// What `create` hands out
    type Object;

    fn target_type(&self) -> TargetType;

    fn create(&self) -> PoolResult<Self::Object>;

    /// Give an object back. Never fails; `None` is ignored.
    fn recycle(&self, object: Option<Self::Object>);
}

pub(crate) type Constructor<T> = Box<dyn Fn() -> Result<T, BoxError> + Send + Sync>;

pub(crate) fn constructor<T, F, E>(f: F) -> Constructor<T>
where
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
    E: Into<BoxError>,
{
    Box::new(move || f().map_err(Into::into))
}

pub(crate) fn infallible<T, F>(f: F) -> Constructor<T>
where
    F: Fn() -> T + Send + Sync + 'static,
{
    Box::new(move || Ok(f()))
}

/// Factory that constructs a new instance on every call
///
/// # Examples
///
/// ```
/// use reclaim_pool::{Factory, PojoFactory};
///
/// let factory = PojoFactory::new(|| vec![0u8; 4]);
/// let buf = factory.create().unwrap();
/// assert_eq!(buf.len(), 4);
/// factory.recycle(Some(buf));
/// ```
pub struct PojoFactory<T> {
    constructor: Constructor<T>,
}

impl<T: 'static> PojoFactory<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            constructor: infallible(f),
        }
    }

    pub fn try_new<F, E>(f: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            constructor: constructor(f),
        }
    }
}

impl<T: Send + 'static> Factory for PojoFactory<T> {
    type Object = T;

    fn target_type(&self) -> TargetType {
        TargetType::of::<T>()
    }

    fn create(&self) -> PoolResult<T> {
        (self.constructor)().map_err(PoolError::construction::<T>)
    }

    fn recycle(&self, _object: Option<T>) {}
}

/// Factory that hands out one shared instance
pub struct SingletonFactory<T> {
    instance: Arc<T>,
}

impl<T: 'static> SingletonFactory<T> {
    pub fn new(instance: T) -> Self {
        Self {
            instance: Arc::new(instance),
        }
    }

    /// Build the shared instance up front
    pub fn try_new<F, E>(f: F) -> PoolResult<Self>
    where
        F: FnOnce() -> Result<T, E>,
        E: Into<BoxError>,
    {
        let instance = f().map_err(|e| PoolError::construction::<T>(e.into()))?;
        Ok(Self::new(instance))
    }
}

impl<T: Send + Sync + 'static> Factory for SingletonFactory<T> {
    type Object = Arc<T>;

    fn target_type(&self) -> TargetType {
        TargetType::of::<T>()
    }

    fn create(&self) -> PoolResult<Arc<T>> {
        Ok(Arc::clone(&self.instance))
    }

    fn recycle(&self, _object: Option<Arc<T>>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_target_type() {
        let target = TargetType::of::<String>();
        assert!(target.is::<String>());
        assert!(!target.is::<&str>());
        assert_eq!(target.to_string(), std::any::type_name::<String>());
        assert_eq!(target, TargetType::of::<String>());
    }

    #[test]
    fn test_pojo_factory_builds_each_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let factory = PojoFactory::new(move || counter.fetch_add(1, Ordering::SeqCst));

        assert_eq!(factory.create().unwrap(), 0);
        assert_eq!(factory.create().unwrap(), 1);
        factory.recycle(None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(factory.target_type().is::<usize>());
    }

    #[test]
    fn test_pojo_factory_propagates_failure() {
        let factory = PojoFactory::<u8>::try_new(|| Err("no device"));
        let err = factory.create().unwrap_err();
        assert!(err.is_construction());
    }

    #[test]
    fn test_singleton_shares_instance() {
        let factory = SingletonFactory::new(String::from("config"));
        let a = factory.create().unwrap();
        let b = factory.create().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        factory.recycle(Some(a));
        assert!(factory.target_type().is::<String>());
    }

    #[test]
    fn test_singleton_try_new_failure() {
        let result = SingletonFactory::<u8>::try_new(|| Err("broken"));
        assert!(result.is_err());
    }
}

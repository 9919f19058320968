//! Error types for the object pool

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error produced by a fallible constructor.
pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    /// The constructor for the target type failed. This is a configuration
    /// defect and is never retried.
    #[error("failed to construct an instance of {target}: {source}")]
    Construction {
        target: &'static str,
        #[source]
        source: Arc<dyn StdError + Send + Sync>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Reclaimer is already running")]
    ReclaimerRunning,

    #[error("No tokio runtime is available to host the reclaimer task")]
    NoRuntime,

    #[error("Failed to spawn reclaimer thread: {0}")]
    Spawn(String),

    #[error("Metrics export failed: {0}")]
    Metrics(String),
}

impl PoolError {
    pub(crate) fn construction<T>(source: BoxError) -> Self {
        PoolError::Construction {
            target: std::any::type_name::<T>(),
            source: Arc::from(source),
        }
    }

    /// Whether this error came from the target type's constructor.
    pub fn is_construction(&self) -> bool {
        matches!(self, PoolError::Construction { .. })
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_error_names_target() {
        let err = PoolError::construction::<Vec<u8>>("disk full".into());
        assert!(err.is_construction());

        let message = err.to_string();
        assert!(message.contains(std::any::type_name::<Vec<u8>>()));
        assert!(message.contains("disk full"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = PoolError::Spawn("no threads left".to_string());
        let copy = err.clone();
        assert_eq!(copy.to_string(), "Failed to spawn reclaimer thread: no threads left");
        assert!(!copy.is_construction());
    }
}

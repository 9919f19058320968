//! Metrics collection and export for object pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "metrics")]
use crate::errors::{PoolError, PoolResult};

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use reclaim_pool::{ObjectPool, PoolConfiguration};
///
/// let pool = ObjectPool::new(|| 0u32, PoolConfiguration::new().with_size(3)).unwrap();
///
/// let obj = pool.create().unwrap();
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.total_checkouts, 1);
/// assert_eq!(metrics.outstanding_objects, 1);
/// pool.recycle(obj);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Objects handed out by `create`
    pub total_checkouts: usize,

    /// Instances built by the constructor, for any reason
    pub total_constructed: usize,

    /// Objects returned to the available set by `recycle`
    pub total_recycled: usize,

    /// Recycled objects dropped because the pool was full
    pub over_capacity_drops: usize,

    /// Recycle calls with no matching tracking record
    pub unmatched_recycles: usize,

    /// Checkouts dropped without being recycled
    pub recycle_violations: usize,

    /// Instances built by the reclaimer to restore capacity
    pub replenished: usize,

    /// Current outstanding checkouts
    pub outstanding_objects: usize,

    /// Current available objects
    pub available_objects: usize,

    /// Outstanding checkouts relative to the pool size
    pub utilization: f64,

    /// Configured pool size
    pub max_capacity: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_checkouts".to_string(), self.total_checkouts.to_string());
        metrics.insert("total_constructed".to_string(), self.total_constructed.to_string());
        metrics.insert("total_recycled".to_string(), self.total_recycled.to_string());
        metrics.insert("over_capacity_drops".to_string(), self.over_capacity_drops.to_string());
        metrics.insert("unmatched_recycles".to_string(), self.unmatched_recycles.to_string());
        metrics.insert("recycle_violations".to_string(), self.recycle_violations.to_string());
        metrics.insert("replenished".to_string(), self.replenished.to_string());
        metrics.insert("outstanding_objects".to_string(), self.outstanding_objects.to_string());
        metrics.insert("available_objects".to_string(), self.available_objects.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("max_capacity".to_string(), self.max_capacity.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use reclaim_pool::{MetricsExporter, ObjectPool, PoolConfiguration};
    /// use std::collections::HashMap;
    ///
    /// let pool = ObjectPool::new(String::new, PoolConfiguration::new().with_size(3)).unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&pool.get_metrics(), "my_pool", Some(&tags)).unwrap();
    /// assert!(output.contains("objectpool_objects_available"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> PoolResult<String> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};

        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());
        if let Some(tags) = tags {
            labels.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let registry = Registry::new_custom(Some("objectpool".to_string()), Some(labels))
            .map_err(metrics_error)?;

        let gauges = [
            ("objects_outstanding", "Current outstanding checkouts", metrics.outstanding_objects),
            ("objects_available", "Current available objects", metrics.available_objects),
            ("capacity", "Configured pool size", metrics.max_capacity),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::new(name, help).map_err(metrics_error)?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge)).map_err(metrics_error)?;
        }

        let utilization = Gauge::new("utilization", "Pool utilization ratio").map_err(metrics_error)?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization)).map_err(metrics_error)?;

        let counters = [
            ("checkouts_total", "Total objects handed out", metrics.total_checkouts),
            ("constructed_total", "Total instances constructed", metrics.total_constructed),
            ("recycled_total", "Total objects recycled into the pool", metrics.total_recycled),
            ("over_capacity_drops_total", "Recycled objects dropped at capacity", metrics.over_capacity_drops),
            ("unmatched_recycles_total", "Recycles without a tracking record", metrics.unmatched_recycles),
            ("recycle_violations_total", "Checkouts dropped without recycle", metrics.recycle_violations),
            ("replenished_total", "Instances rebuilt by the reclaimer", metrics.replenished),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::new(name, help).map_err(metrics_error)?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter)).map_err(metrics_error)?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(metrics_error)
    }
}

#[cfg(feature = "metrics")]
fn metrics_error(err: impl std::fmt::Display) -> PoolError {
    PoolError::Metrics(err.to_string())
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub checkouts: AtomicUsize,
    pub constructed: AtomicUsize,
    pub recycled: AtomicUsize,
    pub over_capacity_drops: AtomicUsize,
    pub unmatched_recycles: AtomicUsize,
    pub recycle_violations: AtomicUsize,
    pub replenished: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, outstanding: usize, available: usize, capacity: usize) -> PoolMetrics {
        let utilization = if capacity > 0 {
            outstanding as f64 / capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_checkouts: self.checkouts.load(Ordering::Relaxed),
            total_constructed: self.constructed.load(Ordering::Relaxed),
            total_recycled: self.recycled.load(Ordering::Relaxed),
            over_capacity_drops: self.over_capacity_drops.load(Ordering::Relaxed),
            unmatched_recycles: self.unmatched_recycles.load(Ordering::Relaxed),
            recycle_violations: self.recycle_violations.load(Ordering::Relaxed),
            replenished: self.replenished.load(Ordering::Relaxed),
            outstanding_objects: outstanding,
            available_objects: available,
            utilization,
            max_capacity: capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_export() {
        let tracker = MetricsTracker::new();
        MetricsTracker::bump(&tracker.checkouts);
        MetricsTracker::bump(&tracker.checkouts);
        MetricsTracker::bump(&tracker.recycle_violations);

        let metrics = tracker.get_metrics(1, 3, 4);
        assert_eq!(metrics.total_checkouts, 2);
        assert_eq!(metrics.recycle_violations, 1);
        assert_eq!(metrics.utilization, 0.25);

        let exported = metrics.export();
        assert_eq!(exported["total_checkouts"], "2");
        assert_eq!(exported["utilization"], "0.25");
        assert_eq!(exported["max_capacity"], "4");
    }

    #[test]
    fn test_zero_capacity_utilization() {
        let metrics = MetricsTracker::new().get_metrics(5, 0, 0);
        assert_eq!(metrics.utilization, 0.0);
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_output() {
        let tracker = MetricsTracker::new();
        MetricsTracker::bump(&tracker.recycle_violations);
        let metrics = tracker.get_metrics(2, 1, 3);

        let output = MetricsExporter::export_prometheus(&metrics, "widgets", None).unwrap();
        assert!(output.contains("# TYPE objectpool_objects_outstanding gauge"));
        assert!(output.contains("objectpool_objects_outstanding{pool=\"widgets\"} 2"));
        assert!(output.contains("objectpool_recycle_violations_total{pool=\"widgets\"} 1"));
    }
}

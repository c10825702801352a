//! Metrics collection and reporting

use crate::error::Result;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec,
    HistogramVec, Registry,
};

/// Global metrics registry
pub static METRICS_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Tasks dispatched, labeled by terminal outcome
pub static TASKS_DISPATCHED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "orion_tasks_dispatched_total",
        "Total number of tasks dispatched to devices",
        &["outcome", "priority"]
    )
    .unwrap()
});

/// Task execution duration histogram
pub static TASK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "orion_task_duration_seconds",
        "Task execution duration in seconds",
        &["priority"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap()
});

/// Active tasks gauge, labeled by Orion state
pub static ACTIVE_TASKS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "orion_active_tasks",
        "Number of tasks currently running",
        &["orion_state"]
    )
    .unwrap()
});

/// Modification-barrier wait duration histogram
pub static BARRIER_WAIT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "orion_barrier_wait_seconds",
        "Time spent waiting on the modification synchronizer",
        &["outcome"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]
    )
    .unwrap()
});

/// Error counter
pub static ERROR_COUNTER: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "orion_errors_total",
        "Total number of errors",
        &["error_type", "severity"]
    )
    .unwrap()
});

/// Initialize all metrics
pub fn init_metrics() -> Result<()> {
    METRICS_REGISTRY.register(Box::new(TASKS_DISPATCHED.clone()))?;
    METRICS_REGISTRY.register(Box::new(TASK_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(ACTIVE_TASKS.clone()))?;
    METRICS_REGISTRY.register(Box::new(BARRIER_WAIT_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(ERROR_COUNTER.clone()))?;

    Ok(())
}

/// Metrics collector trait, implemented once and shared behind an `Arc`
/// by the orchestrator engine and the modification synchronizer.
pub trait MetricsCollector: Send + Sync {
    fn record_task_dispatch(&self, outcome: &str, priority: &str, duration_secs: f64);
    fn set_active_tasks(&self, orion_state: &str, count: f64);
    fn record_barrier_wait(&self, outcome: &str, duration_secs: f64);
    fn record_error(&self, error_type: &str, severity: &str);
}

/// Default metrics collector implementation
#[derive(Clone, Default)]
pub struct DefaultMetricsCollector;

impl MetricsCollector for DefaultMetricsCollector {
    fn record_task_dispatch(&self, outcome: &str, priority: &str, duration_secs: f64) {
        TASKS_DISPATCHED
            .with_label_values(&[outcome, priority])
            .inc();
        TASK_DURATION
            .with_label_values(&[priority])
            .observe(duration_secs);
    }

    fn set_active_tasks(&self, orion_state: &str, count: f64) {
        ACTIVE_TASKS.with_label_values(&[orion_state]).set(count);
    }

    fn record_barrier_wait(&self, outcome: &str, duration_secs: f64) {
        BARRIER_WAIT_DURATION
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    fn record_error(&self, error_type: &str, severity: &str) {
        ERROR_COUNTER.with_label_values(&[error_type, severity]).inc();
    }
}

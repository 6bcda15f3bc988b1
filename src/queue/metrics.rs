//! Queue Metrics
//!
//! Sink contracts, the provider that builds them per queue name, and the
//! facade that turns queue lifecycle events into sink calls.
//!
//! Every facade call happens with the queue lock held, so sinks must be
//! cheap and must not block.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use log::warn;

use crate::queue::clock::Clock;

/// Monotonically increasing count
pub trait CounterMetric: Send + Sync {
    fn inc(&self);
}

/// Value that moves up and down by one
pub trait GaugeMetric: Send + Sync {
    fn inc(&self);
    fn dec(&self);
}

/// Value that is replaced wholesale
pub trait SettableGaugeMetric: Send + Sync {
    fn set(&self, value: f64);
}

/// Distribution of observed values
pub trait HistogramMetric: Send + Sync {
    fn observe(&self, value: f64);
}

/// Builds the sinks for a named queue
///
/// All durations handed to the sinks are in seconds.
pub trait MetricsProvider: Send + Sync {
    /// Current queue depth
    fn new_depth_metric(&self, name: &str) -> Arc<dyn GaugeMetric>;

    /// Total number of adds handled by the queue
    fn new_adds_metric(&self, name: &str) -> Arc<dyn CounterMetric>;

    /// How long an item waits between becoming dirty and being handed out
    fn new_latency_metric(&self, name: &str) -> Arc<dyn HistogramMetric>;

    /// How long processing an item takes
    fn new_work_duration_metric(&self, name: &str) -> Arc<dyn HistogramMetric>;

    /// Summed age of all in-flight items
    fn new_unfinished_work_seconds_metric(&self, name: &str) -> Arc<dyn SettableGaugeMetric>;

    /// Age of the longest-running in-flight item
    fn new_longest_running_processor_seconds_metric(
        &self,
        name: &str,
    ) -> Arc<dyn SettableGaugeMetric>;

    /// Total number of retries. Not driven by the plain work queue.
    fn new_retries_metric(&self, name: &str) -> Arc<dyn CounterMetric>;

    /// Whether this provider discards everything
    ///
    /// Queues skip metrics, and the reporter thread, entirely when it does.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Sink that ignores every call
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetric;

impl CounterMetric for NoopMetric {
    fn inc(&self) {}
}

impl GaugeMetric for NoopMetric {
    fn inc(&self) {}
    fn dec(&self) {}
}

impl SettableGaugeMetric for NoopMetric {
    fn set(&self, _value: f64) {}
}

impl HistogramMetric for NoopMetric {
    fn observe(&self, _value: f64) {}
}

/// Provider whose sinks ignore every call
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsProvider;

impl MetricsProvider for NoopMetricsProvider {
    fn new_depth_metric(&self, _name: &str) -> Arc<dyn GaugeMetric> {
        Arc::new(NoopMetric)
    }

    fn new_adds_metric(&self, _name: &str) -> Arc<dyn CounterMetric> {
        Arc::new(NoopMetric)
    }

    fn new_latency_metric(&self, _name: &str) -> Arc<dyn HistogramMetric> {
        Arc::new(NoopMetric)
    }

    fn new_work_duration_metric(&self, _name: &str) -> Arc<dyn HistogramMetric> {
        Arc::new(NoopMetric)
    }

    fn new_unfinished_work_seconds_metric(&self, _name: &str) -> Arc<dyn SettableGaugeMetric> {
        Arc::new(NoopMetric)
    }

    fn new_longest_running_processor_seconds_metric(
        &self,
        _name: &str,
    ) -> Arc<dyn SettableGaugeMetric> {
        Arc::new(NoopMetric)
    }

    fn new_retries_metric(&self, _name: &str) -> Arc<dyn CounterMetric> {
        Arc::new(NoopMetric)
    }

    fn is_noop(&self) -> bool {
        true
    }
}

static GLOBAL_PROVIDER: OnceLock<Arc<dyn MetricsProvider>> = OnceLock::new();

/// Install the process-wide metrics provider
///
/// Only the first call takes effect. Queues created before the call keep
/// the no-op provider they were built with.
pub fn set_provider(provider: Arc<dyn MetricsProvider>) {
    if GLOBAL_PROVIDER.set(provider).is_err() {
        warn!("Work queue metrics provider already set, ignoring replacement");
    }
}

/// The process-wide metrics provider, no-op until [`set_provider`] is called
pub fn global_provider() -> Arc<dyn MetricsProvider> {
    match GLOBAL_PROVIDER.get() {
        Some(provider) => Arc::clone(provider),
        None => Arc::new(NoopMetricsProvider),
    }
}

/// Queue lifecycle hooks, invoked under the queue lock
pub trait QueueMetrics<T>: Send {
    /// Item became dirty
    fn add(&mut self, item: &T);

    /// Item was handed to a worker
    fn get(&mut self, item: &T);

    /// Worker finished with the item
    fn done(&mut self, item: &T);

    /// Periodic report of in-flight work
    fn update_unfinished_work(&mut self);

    /// Whether every hook is a no-op
    fn is_noop(&self) -> bool {
        false
    }
}

/// Facade used when metrics are disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoQueueMetrics;

impl<T> QueueMetrics<T> for NoQueueMetrics {
    fn add(&mut self, _item: &T) {}
    fn get(&mut self, _item: &T) {}
    fn done(&mut self, _item: &T) {}
    fn update_unfinished_work(&mut self) {}

    fn is_noop(&self) -> bool {
        true
    }
}

/// Facade that feeds the sinks built by a [`MetricsProvider`]
pub struct DefaultQueueMetrics<T> {
    clock: Arc<dyn Clock>,

    depth: Arc<dyn GaugeMetric>,
    adds: Arc<dyn CounterMetric>,
    latency: Arc<dyn HistogramMetric>,
    work_duration: Arc<dyn HistogramMetric>,
    unfinished_work_seconds: Arc<dyn SettableGaugeMetric>,
    longest_running_processor: Arc<dyn SettableGaugeMetric>,

    /// When each queued item last became dirty
    add_times: HashMap<T, Instant>,
    /// When each in-flight item was handed out
    processing_start_times: HashMap<T, Instant>,
}

impl<T> DefaultQueueMetrics<T> {
    pub fn new(name: &str, provider: &dyn MetricsProvider, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            depth: provider.new_depth_metric(name),
            adds: provider.new_adds_metric(name),
            latency: provider.new_latency_metric(name),
            work_duration: provider.new_work_duration_metric(name),
            unfinished_work_seconds: provider.new_unfinished_work_seconds_metric(name),
            longest_running_processor: provider
                .new_longest_running_processor_seconds_metric(name),
            add_times: HashMap::new(),
            processing_start_times: HashMap::new(),
        }
    }

    fn since_in_seconds(&self, start: Instant) -> f64 {
        self.clock.now().saturating_duration_since(start).as_secs_f64()
    }
}

impl<T> QueueMetrics<T> for DefaultQueueMetrics<T>
where
    T: Eq + Hash + Clone + Send,
{
    fn add(&mut self, item: &T) {
        self.adds.inc();
        self.depth.inc();
        if !self.add_times.contains_key(item) {
            let now = self.clock.now();
            self.add_times.insert(item.clone(), now);
        }
    }

    fn get(&mut self, item: &T) {
        self.depth.dec();
        let now = self.clock.now();
        self.processing_start_times.insert(item.clone(), now);
        if let Some(start) = self.add_times.remove(item) {
            self.latency.observe(self.since_in_seconds(start));
        }
    }

    fn done(&mut self, item: &T) {
        if let Some(start) = self.processing_start_times.remove(item) {
            self.work_duration.observe(self.since_in_seconds(start));
        }
    }

    fn update_unfinished_work(&mut self) {
        let mut total = 0.0;
        let mut oldest = 0.0;
        for start in self.processing_start_times.values() {
            let age = self.since_in_seconds(*start);
            total += age;
            if age > oldest {
                oldest = age;
            }
        }
        self.unfinished_work_seconds.set(total);
        self.longest_running_processor.set(oldest);
    }
}

/// Build the facade for a queue
///
/// Unnamed queues and no-op providers get [`NoQueueMetrics`].
pub fn new_queue_metrics<T>(
    name: Option<&str>,
    provider: &dyn MetricsProvider,
    clock: Arc<dyn Clock>,
) -> Box<dyn QueueMetrics<T>>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    match name {
        Some(name) if !name.is_empty() && !provider.is_noop() => {
            Box::new(DefaultQueueMetrics::new(name, provider, clock))
        }
        _ => Box::new(NoQueueMetrics),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::clock::FakeClock;

    #[test]
    fn test_unnamed_queue_gets_noop_metrics() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
        let metrics = new_queue_metrics::<u32>(None, &NoopMetricsProvider, Arc::clone(&clock));
        assert!(metrics.is_noop());

        let metrics = new_queue_metrics::<u32>(Some(""), &NoopMetricsProvider, clock);
        assert!(metrics.is_noop());
    }

    #[test]
    fn test_noop_provider_gets_noop_metrics() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
        let metrics = new_queue_metrics::<u32>(Some("named"), &NoopMetricsProvider, clock);
        assert!(metrics.is_noop());
    }

    #[test]
    fn test_global_provider_defaults_to_noop() {
        // Nothing in the unit tests installs a global provider.
        assert!(global_provider().is_noop());
    }
}

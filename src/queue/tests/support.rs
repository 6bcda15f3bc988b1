//! Shared helpers for the queue tests

use std::hash::Hash;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::queue::clock::FakeClock;
use crate::queue::metrics::{
    CounterMetric, GaugeMetric, HistogramMetric, MetricsProvider, QueueMetrics,
    SettableGaugeMetric,
};
use crate::queue::WorkQueue;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Block until the reporter thread has registered its ticker
pub fn wait_for_waiters(clock: &FakeClock) {
    while !clock.has_waiters() {
        thread::sleep(Duration::from_millis(1));
    }
}

/// Check the structural invariants of the queue state
pub fn assert_invariants<T>(queue: &WorkQueue<T>)
where
    T: Eq + Hash + Clone + Send + 'static,
{
    let state = queue.shared.state.lock();
    let mut seen = std::collections::HashSet::new();
    for item in &state.queue {
        assert!(state.dirty.contains(item), "queued item is not dirty");
        assert!(!state.processing.contains(item), "queued item is in flight");
        assert!(seen.insert(item), "item queued twice");
    }
}

#[derive(Default)]
struct TestMetricValues {
    inc: i64,
    dec: i64,
    set: f64,
    observed_value: f64,
    observed_count: usize,
}

/// Sink recording every call, optionally signalling each one
#[derive(Default)]
pub struct TestMetric {
    values: Mutex<TestMetricValues>,
    notify: Mutex<Option<Sender<()>>>,
}

impl TestMetric {
    pub fn gauge_value(&self) -> f64 {
        let values = self.values.lock();
        if values.set != 0.0 {
            values.set
        } else {
            (values.inc - values.dec) as f64
        }
    }

    pub fn observation_value(&self) -> f64 {
        self.values.lock().observed_value
    }

    pub fn observation_count(&self) -> usize {
        self.values.lock().observed_count
    }

    pub fn notify_on(&self, sender: Option<Sender<()>>) {
        *self.notify.lock() = sender;
    }

    fn notify(&self) {
        if let Some(sender) = self.notify.lock().as_ref() {
            let _ = sender.send(());
        }
    }
}

impl CounterMetric for TestMetric {
    fn inc(&self) {
        self.values.lock().inc += 1;
        self.notify();
    }
}

impl GaugeMetric for TestMetric {
    fn inc(&self) {
        self.values.lock().inc += 1;
        self.notify();
    }

    fn dec(&self) {
        self.values.lock().dec += 1;
        self.notify();
    }
}

impl SettableGaugeMetric for TestMetric {
    fn set(&self, value: f64) {
        self.values.lock().set = value;
        self.notify();
    }
}

impl HistogramMetric for TestMetric {
    fn observe(&self, value: f64) {
        {
            let mut values = self.values.lock();
            values.observed_value = value;
            values.observed_count += 1;
        }
        self.notify();
    }
}

/// Provider handing out the same recording sinks for every queue name
#[derive(Default)]
pub struct TestMetricsProvider {
    pub depth: Arc<TestMetric>,
    pub adds: Arc<TestMetric>,
    pub latency: Arc<TestMetric>,
    pub duration: Arc<TestMetric>,
    pub unfinished: Arc<TestMetric>,
    pub longest: Arc<TestMetric>,
    pub retries: Arc<TestMetric>,
}

impl MetricsProvider for TestMetricsProvider {
    fn new_depth_metric(&self, _name: &str) -> Arc<dyn GaugeMetric> {
        self.depth.clone()
    }

    fn new_adds_metric(&self, _name: &str) -> Arc<dyn CounterMetric> {
        self.adds.clone()
    }

    fn new_latency_metric(&self, _name: &str) -> Arc<dyn HistogramMetric> {
        self.latency.clone()
    }

    fn new_work_duration_metric(&self, _name: &str) -> Arc<dyn HistogramMetric> {
        self.duration.clone()
    }

    fn new_unfinished_work_seconds_metric(&self, _name: &str) -> Arc<dyn SettableGaugeMetric> {
        self.unfinished.clone()
    }

    fn new_longest_running_processor_seconds_metric(
        &self,
        _name: &str,
    ) -> Arc<dyn SettableGaugeMetric> {
        self.longest.clone()
    }

    fn new_retries_metric(&self, _name: &str) -> Arc<dyn CounterMetric> {
        self.retries.clone()
    }
}

#[derive(Default)]
pub struct HookCounts {
    pub added: usize,
    pub gotten: usize,
    pub finished: usize,
}

/// Facade counting hook invocations and signalling each report
pub struct RecordingMetrics {
    pub counts: Arc<Mutex<HookCounts>>,
    pub update_called: Sender<()>,
}

impl<T> QueueMetrics<T> for RecordingMetrics {
    fn add(&mut self, _item: &T) {
        self.counts.lock().added += 1;
    }

    fn get(&mut self, _item: &T) {
        self.counts.lock().gotten += 1;
    }

    fn done(&mut self, _item: &T) {
        self.counts.lock().finished += 1;
    }

    fn update_unfinished_work(&mut self) {
        let _ = self.update_called.send(());
    }
}

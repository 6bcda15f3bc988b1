//! Work Queue Engine
//!
//! A FIFO of keys with deduplication and at-most-one-in-flight delivery.
//!
//! Every key is in one of four states:
//!
//! - absent
//! - queued: dirty and waiting in the pending order
//! - in flight: handed out by [`WorkQueue::get`], not yet [`WorkQueue::done`]
//! - in flight and dirty: re-added while a worker holds it
//!
//! Adding a key that is already dirty is a no-op. Adding a key that is in
//! flight only marks it dirty; [`WorkQueue::done`] then puts it back at the
//! tail of the pending order, so it is never handed to two workers at once.
//!
//! All state sits behind a single `parking_lot::Mutex` paired with one
//! `Condvar`. [`WorkQueue::get`] is the only call that parks.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::queue::clock::{Clock, RealClock};
use crate::queue::config::QueueConfig;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::metrics::{self, MetricsProvider, NoQueueMetrics, QueueMetrics};
use crate::queue::reporter::{self, Reporter};

/// The work queue contract
pub trait Interface<T>: Send + Sync {
    /// Mark `item` as needing processing
    fn add(&self, item: T);

    /// Number of items waiting to be handed out. Advisory only.
    fn len(&self) -> usize;

    /// Whether no items are waiting. Advisory only.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until an item is available; `None` once the queue has shut down
    fn get(&self) -> Option<T>;

    /// Mark `item` as finished
    fn done(&self, item: &T);

    /// Stop accepting items and release blocked `get` callers
    fn shut_down(&self);

    /// Stop accepting items and block until all admitted work is done
    fn shut_down_with_drain(&self);

    /// Whether shutdown has been requested
    fn shutting_down(&self) -> bool;
}

/// State guarded by the queue lock
pub(crate) struct State<T> {
    /// Keys waiting for a worker, in the order they became dirty
    pub(crate) queue: VecDeque<T>,
    /// Keys that need processing, queued or in flight
    pub(crate) dirty: HashSet<T>,
    /// Keys currently held by a worker
    pub(crate) processing: HashSet<T>,
    pub(crate) shutting_down: bool,
    pub(crate) drain: bool,
    pub(crate) metrics: Box<dyn QueueMetrics<T>>,
}

/// Lock and condition variable shared with the reporter thread
pub(crate) struct Shared<T> {
    pub(crate) state: Mutex<State<T>>,
    pub(crate) cond: Condvar,
}

/// Deduplicating FIFO work queue
///
/// Share it between producers and workers with an `Arc`. A typical worker:
///
/// ```
/// use workqueue::WorkQueue;
///
/// let queue: WorkQueue<String> = WorkQueue::new();
/// queue.add("pod/a".to_string());
/// queue.shut_down();
///
/// while let Some(key) = queue.get() {
///     // process key
///     queue.done(&key);
/// }
/// ```
pub struct WorkQueue<T> {
    name: Option<String>,
    pub(crate) shared: Arc<Shared<T>>,
    reporter: Option<Reporter>,
}

impl<T> WorkQueue<T>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    /// Create an unnamed queue without metrics
    pub fn new() -> Self {
        Self::unstarted(None, Box::new(NoQueueMetrics))
    }

    /// Create a named queue reporting to the global metrics provider
    pub fn with_name(name: impl Into<String>) -> QueueResult<Self> {
        Self::builder().name(name).build()
    }

    /// Create a queue from a configuration, using the global metrics provider
    pub fn with_config(config: QueueConfig) -> QueueResult<Self> {
        Self::builder().config(config).build()
    }

    /// Start building a queue with explicit collaborators
    pub fn builder() -> WorkQueueBuilder<T> {
        WorkQueueBuilder::new()
    }

    fn unstarted(name: Option<String>, metrics: Box<dyn QueueMetrics<T>>) -> Self {
        let state = State {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            shutting_down: false,
            drain: false,
            metrics,
        };

        Self {
            name,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                cond: Condvar::new(),
            }),
            reporter: None,
        }
    }

    /// Assemble a queue, starting the reporter unless metrics are disabled
    pub(crate) fn from_parts(
        name: Option<String>,
        clock: Arc<dyn Clock>,
        metrics: Box<dyn QueueMetrics<T>>,
        update_period: Duration,
    ) -> QueueResult<Self> {
        let reporting = !metrics.is_noop();
        let mut queue = Self::unstarted(name, metrics);

        if reporting {
            let reporter_name = queue.name.as_deref().unwrap_or("unnamed").to_string();
            let started = reporter::spawn(
                &reporter_name,
                Arc::clone(&queue.shared),
                clock,
                update_period,
            )
            .map_err(|e| {
                QueueError::operation_failed(format!(
                    "Failed to start unfinished work reporter for queue '{}': {}",
                    reporter_name, e
                ))
            })?;
            queue.reporter = Some(started);
        }

        debug!(
            "Created work queue '{}' (metrics: {})",
            queue.display_name(),
            reporting
        );
        Ok(queue)
    }

    /// Name the queue's metrics are registered under
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether an unfinished-work reporter thread was started
    pub fn has_reporter(&self) -> bool {
        self.reporter.is_some()
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    /// Mark `item` as needing processing
    ///
    /// Dropped silently once the queue is shutting down. Adding an item that
    /// is already dirty does nothing. Adding an item that is in flight marks
    /// it dirty so it is handed out again after its `done`.
    pub fn add(&self, item: T) {
        let mut state = self.shared.state.lock();
        if state.shutting_down {
            trace!("Queue '{}' is shutting down, dropping add", self.display_name());
            return;
        }
        if state.dirty.contains(&item) {
            return;
        }

        state.metrics.add(&item);
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            trace!(
                "Queue '{}' marked an in-flight item dirty",
                self.display_name()
            );
            return;
        }

        state.queue.push_back(item);
        self.shared.cond.notify_one();
    }

    /// Number of items waiting to be handed out
    ///
    /// This is a snapshot that may be stale as soon as it is returned; do
    /// not base flow-control decisions on it.
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Whether no items are waiting. Same caveats as [`WorkQueue::len`].
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until an item is available and hand it out
    ///
    /// Returns `None` once the queue is shutting down and the pending order
    /// is empty; workers should exit their loop then. Items admitted before
    /// shutdown are still handed out first. There is no timeout.
    pub fn get(&self) -> Option<T> {
        let mut state = self.shared.state.lock();
        while state.queue.is_empty() && !state.shutting_down {
            self.shared.cond.wait(&mut state);
        }

        let item = state.queue.pop_front()?;
        state.metrics.get(&item);
        state.dirty.remove(&item);
        state.processing.insert(item.clone());
        Some(item)
    }

    /// Mark `item` as finished
    ///
    /// If it was re-added while in flight it goes back to the tail of the
    /// pending order. Calling this for an item that is not in flight is a
    /// no-op.
    pub fn done(&self, item: &T) {
        let mut state = self.shared.state.lock();
        if !state.processing.remove(item) {
            trace!(
                "Queue '{}' ignoring done for an item that is not in flight",
                self.display_name()
            );
            return;
        }
        state.metrics.done(item);

        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            if state.drain {
                // A drain waiter shares the condvar and could swallow a
                // single wakeup meant for a worker.
                self.shared.cond.notify_all();
            } else {
                self.shared.cond.notify_one();
            }
        } else if state.processing.is_empty() {
            self.shared.cond.notify_all();
        }
    }

    /// Stop accepting items and wake every blocked `get`
    ///
    /// Does not wait for in-flight work. Queued items are still handed out
    /// until the pending order is empty.
    pub fn shut_down(&self) {
        let mut state = self.shared.state.lock();
        if !state.shutting_down {
            debug!("Shutting down work queue '{}'", self.display_name());
        }
        state.drain = false;
        state.shutting_down = true;
        self.shared.cond.notify_all();
    }

    /// Stop accepting items and block until every admitted item is done
    ///
    /// Workers keep receiving queued items until the backlog is gone. The
    /// wait ends once both the pending order and the in-flight set are
    /// empty, or when a plain [`WorkQueue::shut_down`] cancels the drain.
    /// Never call this from a worker that still holds an item.
    pub fn shut_down_with_drain(&self) {
        let mut state = self.shared.state.lock();
        debug!("Draining work queue '{}'", self.display_name());
        state.drain = true;
        state.shutting_down = true;
        self.shared.cond.notify_all();

        while state.drain && (!state.queue.is_empty() || !state.processing.is_empty()) {
            self.shared.cond.wait(&mut state);
        }
        if state.drain {
            debug!("Work queue '{}' drained", self.display_name());
        } else {
            debug!("Drain of work queue '{}' cancelled by shutdown", self.display_name());
        }
    }

    /// Whether shutdown has been requested
    pub fn shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Interface<T> for WorkQueue<T>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    fn add(&self, item: T) {
        WorkQueue::add(self, item)
    }

    fn len(&self) -> usize {
        WorkQueue::len(self)
    }

    fn get(&self) -> Option<T> {
        WorkQueue::get(self)
    }

    fn done(&self, item: &T) {
        WorkQueue::done(self, item)
    }

    fn shut_down(&self) {
        WorkQueue::shut_down(self)
    }

    fn shut_down_with_drain(&self) {
        WorkQueue::shut_down_with_drain(self)
    }

    fn shutting_down(&self) -> bool {
        WorkQueue::shutting_down(self)
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.name)
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

impl<T> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.drain = false;
            state.shutting_down = true;
            self.shared.cond.notify_all();
        }
        // The reporter takes the queue lock on each tick, so it is stopped
        // only after the lock above is released.
        if let Some(reporter) = self.reporter.take() {
            reporter.stop();
        }
    }
}

/// Builder for queues with an explicit metrics provider, clock or period
pub struct WorkQueueBuilder<T> {
    config: QueueConfig,
    update_period: Option<Duration>,
    metrics_provider: Option<Arc<dyn MetricsProvider>>,
    clock: Option<Arc<dyn Clock>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> WorkQueueBuilder<T>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            update_period: None,
            metrics_provider: None,
            clock: None,
            _marker: PhantomData,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Name the metric sinks are registered under
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Interval between unfinished-work reports, overriding the configuration
    pub fn update_period(mut self, period: Duration) -> Self {
        self.update_period = Some(period);
        self
    }

    /// Metrics provider to use instead of the global one
    pub fn metrics_provider(mut self, provider: Arc<dyn MetricsProvider>) -> Self {
        self.metrics_provider = Some(provider);
        self
    }

    /// Clock to use instead of the wall clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> QueueResult<WorkQueue<T>> {
        self.config.validate()?;
        let update_period = self
            .update_period
            .unwrap_or_else(|| self.config.update_period());
        if update_period.is_zero() {
            return Err(QueueError::invalid_config(
                "unfinished work update period must be greater than 0",
            ));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(RealClock::new()));
        let provider = self.metrics_provider.unwrap_or_else(metrics::global_provider);
        let queue_metrics = metrics::new_queue_metrics(
            self.config.name.as_deref(),
            provider.as_ref(),
            Arc::clone(&clock),
        );

        WorkQueue::from_parts(self.config.name, clock, queue_metrics, update_period)
    }
}

impl<T> Default for WorkQueueBuilder<T>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

//! Work Queue for Control Loops
//!
//! Producers report "this key needs processing" with [`WorkQueue::add`];
//! workers pull keys with [`WorkQueue::get`], process them and report back
//! with [`WorkQueue::done`]. A key is never handed to two workers at once,
//! and re-adding a key while it is being processed causes exactly one more
//! delivery after it is done.
//!
//! # Architecture
//!
//! - **WorkQueue**: the engine, one lock and one condition variable
//! - **QueueMetrics**: lifecycle hooks feeding a [`MetricsProvider`]
//! - **Reporter**: background thread reporting the age of in-flight work
//! - **Clock**: injectable time source, with a fake for tests
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//! use workqueue::WorkQueue;
//!
//! let queue = Arc::new(WorkQueue::<u64>::new());
//!
//! let worker = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || {
//!         let mut processed = 0;
//!         while let Some(key) = queue.get() {
//!             processed += key;
//!             queue.done(&key);
//!         }
//!         processed
//!     })
//! };
//!
//! for key in 1..=4 {
//!     queue.add(key);
//! }
//! queue.shut_down_with_drain();
//! assert_eq!(worker.join().unwrap(), 10);
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
mod reporter;
pub mod work_queue;

// Re-export main types for convenience
pub use clock::{Clock, FakeClock, RealClock, Ticker};
pub use config::{QueueConfig, DEFAULT_UNFINISHED_WORK_UPDATE_PERIOD};
pub use error::{QueueError, QueueResult};
pub use metrics::{
    set_provider, CounterMetric, GaugeMetric, HistogramMetric, MetricsProvider,
    NoopMetricsProvider, SettableGaugeMetric,
};
pub use work_queue::{Interface, WorkQueue, WorkQueueBuilder};

#[cfg(test)]
mod tests;

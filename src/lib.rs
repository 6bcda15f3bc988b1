//! Deduplicating work queue for control loops.
//!
//! See [`queue`] for the model and an example.

pub mod queue;

pub use queue::{
    Clock, FakeClock, Interface, MetricsProvider, QueueConfig, QueueError, QueueResult,
    RealClock, WorkQueue, WorkQueueBuilder,
};

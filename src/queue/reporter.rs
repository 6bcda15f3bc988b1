//! Unfinished-Work Reporter
//!
//! Background thread that periodically reports how long in-flight items
//! have been running. It shares the queue lock, so each tick does O(in-flight)
//! work and nothing else.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender};
use log::{debug, trace, warn};

use crate::queue::clock::Clock;
use crate::queue::work_queue::Shared;

/// Handle on a running reporter thread
pub(crate) struct Reporter {
    name: String,
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl Reporter {
    /// Wake the reporter immediately and wait for it to exit
    ///
    /// The queue must already be shutting down.
    pub(crate) fn stop(self) {
        drop(self.stop);
        if self.thread.join().is_err() {
            warn!("Unfinished work reporter for queue '{}' panicked", self.name);
        }
    }
}

/// Start the reporter thread for a queue
pub(crate) fn spawn<T>(
    name: &str,
    shared: Arc<Shared<T>>,
    clock: Arc<dyn Clock>,
    period: Duration,
) -> io::Result<Reporter>
where
    T: Send + 'static,
{
    let thread_name = format!("workqueue-{}-unfinished", name);
    let queue_name = name.to_string();
    let (stop, stopped) = crossbeam_channel::bounded(0);

    let thread = thread::Builder::new()
        .name(thread_name)
        .spawn(move || run(&queue_name, &shared, clock.as_ref(), period, &stopped))?;

    Ok(Reporter {
        name: name.to_string(),
        stop,
        thread,
    })
}

/// Report on every tick until the queue shuts down or the handle is stopped
///
/// The ticker is created here rather than by the caller so that a fake
/// clock only reports a waiter once this thread is about to block on it.
fn run<T>(
    name: &str,
    shared: &Shared<T>,
    clock: &dyn Clock,
    period: Duration,
    stopped: &Receiver<()>,
) {
    let mut ticker = clock.new_ticker(period);
    debug!("Unfinished work reporter started for queue '{}' every {:?}", name, period);

    loop {
        select! {
            recv(ticker.ticks()) -> tick => {
                if tick.is_err() {
                    debug!("Unfinished work ticker for queue '{}' disconnected", name);
                    break;
                }
            }
            recv(stopped) -> _ => break,
        }

        let mut state = shared.state.lock();
        if state.shutting_down {
            break;
        }
        state.metrics.update_unfinished_work();
        trace!(
            "Reported unfinished work for queue '{}' ({} in flight)",
            name,
            state.processing.len()
        );
    }

    ticker.stop();
    debug!("Unfinished work reporter stopped for queue '{}'", name);
}

//! Time Sources
//!
//! The queue and its unfinished-work reporter never read the system clock
//! directly. They go through [`Clock`], which supplies the current instant
//! and periodic tickers. [`RealClock`] is backed by `Instant::now()` and
//! `crossbeam_channel::tick`; [`FakeClock`] is advanced by hand so tests can
//! assert exact elapsed durations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

/// Source of the current time and of periodic tickers
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Create a ticker delivering an instant every `period`
    fn new_ticker(&self, period: Duration) -> Box<dyn Ticker>;
}

/// A stoppable stream of tick events
pub trait Ticker: Send {
    /// Channel the ticks are delivered on
    fn ticks(&self) -> &Receiver<Instant>;

    /// Stop delivering ticks. Idempotent.
    fn stop(&mut self);
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct RealClock;

impl RealClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn new_ticker(&self, period: Duration) -> Box<dyn Ticker> {
        Box::new(RealTicker {
            receiver: crossbeam_channel::tick(period),
        })
    }
}

struct RealTicker {
    receiver: Receiver<Instant>,
}

impl Ticker for RealTicker {
    fn ticks(&self) -> &Receiver<Instant> {
        &self.receiver
    }

    fn stop(&mut self) {
        // Dropping the tick receiver stops crossbeam's timer.
        self.receiver = crossbeam_channel::never();
    }
}

/// Manually advanced clock for deterministic tests
///
/// Cloning a `FakeClock` yields another handle onto the same time line.
#[derive(Clone)]
pub struct FakeClock {
    state: Arc<Mutex<FakeClockState>>,
}

struct FakeClockState {
    now: Instant,
    next_id: u64,
    waiters: Vec<FakeWaiter>,
}

struct FakeWaiter {
    id: u64,
    target: Instant,
    period: Duration,
    sender: Sender<Instant>,
}

impl FakeClock {
    /// Create a fake clock starting at the current wall-clock instant
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Create a fake clock starting at `start`
    pub fn starting_at(start: Instant) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeClockState {
                now: start,
                next_id: 0,
                waiters: Vec::new(),
            })),
        }
    }

    /// Advance the clock by `step`, firing any tickers that came due
    pub fn step(&self, step: Duration) {
        let mut state = self.state.lock();
        let target = state.now + step;
        Self::set_time_locked(&mut state, target);
    }

    /// Move the clock to `time`, firing any tickers that came due
    pub fn set_time(&self, time: Instant) {
        let mut state = self.state.lock();
        Self::set_time_locked(&mut state, time);
    }

    /// Whether any ticker is currently waiting on this clock
    ///
    /// Tests poll this before stepping so the first tick is not raced
    /// against the reporter registering its ticker.
    pub fn has_waiters(&self) -> bool {
        !self.state.lock().waiters.is_empty()
    }

    fn set_time_locked(state: &mut FakeClockState, time: Instant) {
        state.now = time;
        state.waiters.retain_mut(|waiter| {
            if waiter.target > time {
                return true;
            }
            // At most one tick per step; a full channel drops the tick like
            // a slow reader of a real ticker would.
            match waiter.sender.try_send(time) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => return false,
            }
            if waiter.period.is_zero() {
                return true;
            }
            while waiter.target <= time {
                waiter.target += waiter.period;
            }
            true
        });
    }

    fn remove_waiter(&self, id: u64) {
        self.state.lock().waiters.retain(|waiter| waiter.id != id);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.state.lock().now
    }

    fn new_ticker(&self, period: Duration) -> Box<dyn Ticker> {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            let target = state.now + period;
            state.waiters.push(FakeWaiter {
                id,
                target,
                period,
                sender,
            });
            id
        };
        Box::new(FakeTicker {
            id,
            clock: self.clone(),
            receiver,
            stopped: false,
        })
    }
}

struct FakeTicker {
    id: u64,
    clock: FakeClock,
    receiver: Receiver<Instant>,
    stopped: bool,
}

impl Ticker for FakeTicker {
    fn ticks(&self) -> &Receiver<Instant> {
        &self.receiver
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.clock.remove_waiter(self.id);
        }
    }
}

impl Drop for FakeTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_clock_step_advances_now() {
        let start = Instant::now();
        let clock = FakeClock::starting_at(start);

        clock.step(Duration::from_micros(50));
        assert_eq!(clock.now().duration_since(start), Duration::from_micros(50));

        clock.set_time(start + Duration::from_secs(2));
        assert_eq!(clock.now().duration_since(start), Duration::from_secs(2));
    }

    #[test]
    fn test_fake_ticker_fires_when_due() {
        let clock = FakeClock::new();
        let ticker = clock.new_ticker(Duration::from_millis(10));
        assert!(clock.has_waiters());

        clock.step(Duration::from_millis(5));
        assert!(ticker.ticks().try_recv().is_err());

        clock.step(Duration::from_millis(5));
        assert_eq!(ticker.ticks().try_recv().ok(), Some(clock.now()));
    }

    #[test]
    fn test_fake_ticker_fires_once_per_step() {
        let clock = FakeClock::new();
        let ticker = clock.new_ticker(Duration::from_millis(1));

        clock.step(Duration::from_secs(3600));
        assert!(ticker.ticks().try_recv().is_ok());
        assert!(ticker.ticks().try_recv().is_err());

        // Deadline moved past the new time, so the next step fires again.
        clock.step(Duration::from_millis(1));
        assert!(ticker.ticks().try_recv().is_ok());
    }

    #[test]
    fn test_stopped_ticker_is_unregistered() {
        let clock = FakeClock::new();
        let mut ticker = clock.new_ticker(Duration::from_millis(1));
        ticker.stop();
        assert!(!clock.has_waiters());

        clock.step(Duration::from_millis(5));
        assert!(ticker.ticks().try_recv().is_err());
    }

    #[test]
    fn test_dropped_ticker_is_unregistered() {
        let clock = FakeClock::new();
        let ticker = clock.new_ticker(Duration::from_millis(1));
        drop(ticker);
        assert!(!clock.has_waiters());
    }

    #[test]
    fn test_real_ticker_stop() {
        let clock = RealClock::new();
        let mut ticker = clock.new_ticker(Duration::from_millis(1));
        assert!(ticker.ticks().recv_timeout(Duration::from_secs(1)).is_ok());

        ticker.stop();
        assert!(ticker.ticks().recv_timeout(Duration::from_millis(20)).is_err());
    }
}

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between actions. A call inside the window is dropped,
/// not deferred.
#[derive(Debug)]
pub struct Debouncer {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// True if the caller may act now; records the time when it may
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock();
        match *last {
            Some(at) if now.duration_since(at) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Time until the next call may act; zero when it may act now
    pub fn remaining(&self) -> Duration {
        match *self.last.lock() {
            Some(at) => self.interval.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    pub fn reset(&self) {
        *self.last.lock() = None;
    }
}

use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Enforces a minimum delay between two consecutive requests.
///
/// A bucket of size one: idle time is not saved up, so two requests issued
/// after a long pause are still spaced by the full interval.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Blocks until the interval has elapsed since the previous call, then
    /// records this call as the last one.
    pub fn wait(&self) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.interval {
                let pause = self.interval - elapsed;
                log::debug!("throttling for {pause:?}");
                thread::sleep(pause);
            }
        }
        *last = Some(Instant::now());
    }
}

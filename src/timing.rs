use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;

/// Largest single sleep inside [`pause`]; bounds how long a stop request
/// can go unnoticed.
const PAUSE_STEP: Duration = Duration::from_millis(10);

/// Monotonic time source plus a blocking sleep.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, d: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, d: Duration) {
        thread::sleep(d);
    }
}

/// Sleep for `d` in short steps. Returns `false` if `cancel` fired first.
pub fn pause(clock: &dyn Clock, d: Duration, cancel: &CancelToken) -> bool {
    let mut remaining = d;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return false;
        }
        let step = remaining.min(PAUSE_STEP);
        clock.sleep(step);
        remaining -= step;
    }
    !cancel.is_cancelled()
}

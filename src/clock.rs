use std::thread;
use std::time::{Duration, Instant};

/// Monotonic millisecond time source for the cooperative loop.
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&self, ms: u64);

    fn sleep(&self, duration: Duration) {
        self.sleep_ms(duration.as_millis() as u64);
    }
}

/// Milliseconds since the clock was created. ESP-IDF backs `Instant` with esp_timer.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn sleep_ms(&self, ms: u64) {
        (**self).sleep_ms(ms)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;

    use super::Clock;

    /// Simulated clock: time only moves when told to, or when something sleeps.
    #[derive(Default)]
    pub struct ManualClock {
        now: Cell<u64>,
    }

    impl ManualClock {
        pub fn at(ms: u64) -> Self {
            Self { now: Cell::new(ms) }
        }

        pub fn advance(&self, ms: u64) {
            self.now.set(self.now.get() + ms);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.now.get()
        }

        fn sleep_ms(&self, ms: u64) {
            self.advance(ms);
        }
    }
}

//! Pacing of external provider calls.
//!
//! Limiters block (sleep) until the next call is allowed. Time comes from a
//! [`Clock`] so pacing can be exercised against a [`FakeClock`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

pub trait Clock {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
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

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually advanced clock. Sleeping advances time instantly and is recorded.
#[derive(Default)]
pub struct FakeClock {
    now: Cell<Duration>,
    sleeps: RefCell<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps.borrow().iter().sum()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
    }
}

pub trait RateLimiter {
    /// Block until one call is permitted. Returns the time spent waiting.
    fn acquire(&mut self) -> Duration;
}

/// At most one call per `interval`, measured between call starts.
pub struct FixedIntervalGate {
    interval: Duration,
    last_call: Option<Duration>,
    clock: Rc<dyn Clock>,
}

impl FixedIntervalGate {
    pub fn new(interval: Duration, clock: Rc<dyn Clock>) -> Self {
        Self {
            interval,
            last_call: None,
            clock,
        }
    }
}

impl RateLimiter for FixedIntervalGate {
    fn acquire(&mut self) -> Duration {
        let mut waited = Duration::ZERO;
        if let Some(last) = self.last_call {
            let elapsed = self.clock.now().saturating_sub(last);
            if elapsed < self.interval {
                waited = self.interval - elapsed;
                self.clock.sleep(waited);
            }
        }
        self.last_call = Some(self.clock.now());
        waited
    }
}

/// Token bucket: bursts up to `capacity`, refilled at `rate_per_second`.
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Duration,
    clock: Rc<dyn Clock>,
}

impl TokenBucket {
    pub fn new(capacity: u32, rate_per_second: f64, clock: Rc<dyn Clock>) -> Self {
        let last_refill = clock.now();
        Self {
            capacity: capacity.max(1) as f64,
            tokens: capacity.max(1) as f64,
            refill_rate: rate_per_second.max(f64::MIN_POSITIVE),
            last_refill,
            clock,
        }
    }

    fn refill(&mut self) {
        let now = self.clock.now();
        let elapsed = now.saturating_sub(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    pub fn time_until_available(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }
}

impl RateLimiter for TokenBucket {
    fn acquire(&mut self) -> Duration {
        self.refill();
        let wait = self.time_until_available();
        if !wait.is_zero() {
            self.clock.sleep(wait);
            self.refill();
        }
        // Float rounding can leave the bucket a hair under one token.
        self.tokens = (self.tokens - 1.0).max(0.0);
        wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake() -> (Rc<FakeClock>, Rc<dyn Clock>) {
        let fake = Rc::new(FakeClock::new());
        let clock: Rc<dyn Clock> = fake.clone();
        (fake, clock)
    }

    #[test]
    fn gate_first_call_is_free() {
        let (fake, clock) = fake();
        let mut gate = FixedIntervalGate::new(Duration::from_secs(10), clock);
        assert_eq!(gate.acquire(), Duration::ZERO);
        assert!(fake.sleeps().is_empty());
    }

    #[test]
    fn gate_enforces_cooldown_between_calls() {
        let (fake, clock) = fake();
        let mut gate = FixedIntervalGate::new(Duration::from_secs(10), clock);
        gate.acquire();
        fake.advance(Duration::from_secs(3));
        assert_eq!(gate.acquire(), Duration::from_secs(7));
        assert_eq!(gate.acquire(), Duration::from_secs(10));
        assert_eq!(fake.total_slept(), Duration::from_secs(17));
    }

    #[test]
    fn gate_does_not_sleep_after_long_idle() {
        let (fake, clock) = fake();
        let mut gate = FixedIntervalGate::new(Duration::from_secs(10), clock);
        gate.acquire();
        fake.advance(Duration::from_secs(60));
        assert_eq!(gate.acquire(), Duration::ZERO);
    }

    #[test]
    fn bucket_allows_burst_then_paces() {
        let (fake, clock) = fake();
        let mut bucket = TokenBucket::new(2, 1.0, clock);
        assert_eq!(bucket.acquire(), Duration::ZERO);
        assert_eq!(bucket.acquire(), Duration::ZERO);
        let waited = bucket.acquire();
        assert!((waited.as_secs_f64() - 1.0).abs() < 1e-9);
        assert_eq!(fake.sleeps().len(), 1);
    }

    #[test]
    fn bucket_refills_over_time() {
        let (fake, clock) = fake();
        let mut bucket = TokenBucket::new(1, 0.5, clock);
        bucket.acquire();
        fake.advance(Duration::from_secs(2));
        assert_eq!(bucket.acquire(), Duration::ZERO);
    }
}

use parking_lot::{Condvar, Mutex};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Monotonic microseconds since the first call in this process.
pub fn now_us() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    i64::try_from(epoch.elapsed().as_micros()).unwrap_or(i64::MAX)
}

/// Cancellable sleep used for all dispatcher waits (pre-roll delay, interval
/// gap, bulb exposure hold).
///
/// Any thread may `cancel()` a sleep in progress; the cancellation latches
/// until the next `arm()`, so a Stop that lands between two dispatcher sleeps
/// still aborts the sequence instead of getting lost.
#[derive(Debug, Default)]
pub struct SleepGate {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl SleepGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear a latched cancellation before a new shooting sequence.
    pub fn arm(&self) {
        *self.cancelled.lock() = false;
    }

    /// Wake the current (or next) sleeper with a cancellation.
    pub fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.condvar.notify_all();
    }

    /// Sleep for approximately `duration_us`. Returns `true` when the full
    /// duration elapsed, `false` when cancelled. Spurious wakeups re-feed the
    /// remaining time, so the effective wait is never shortened by them.
    pub fn sleep_us(&self, duration_us: i64) -> bool {
        let mut cancelled = self.cancelled.lock();
        if *cancelled {
            *cancelled = false;
            return false;
        }
        if duration_us <= 0 {
            return true;
        }

        let deadline = Instant::now() + Duration::from_micros(duration_us as u64);
        loop {
            if self.condvar.wait_until(&mut cancelled, deadline).timed_out() {
                return true;
            }
            if *cancelled {
                *cancelled = false;
                return false;
            }
        }
    }
}

const RING_CAPACITY: usize = 32;

/// Ring of recent shutter-latency residuals: measured exposure minus
/// requested exposure, in microseconds. The running average is subtracted
/// from the next bulb sleep so software-timed exposures self-correct for SDK
/// call latency.
#[derive(Debug)]
pub struct LatencyRing {
    samples: [i64; RING_CAPACITY],
    start: usize,
    len: usize,
}

impl LatencyRing {
    pub fn new() -> Self {
        Self {
            samples: [0; RING_CAPACITY],
            start: 0,
            len: 0,
        }
    }

    pub fn add_sample(&mut self, residual_us: i64) {
        self.samples[(self.start + self.len) % RING_CAPACITY] = residual_us;
        if self.len < RING_CAPACITY {
            self.len += 1;
        } else {
            self.start = (self.start + 1) % RING_CAPACITY;
        }
    }

    /// Arithmetic mean of the held samples; 0 when empty.
    pub fn average_us(&self) -> i64 {
        if self.len == 0 {
            return 0;
        }
        let sum: i64 = (0..self.len)
            .map(|i| self.samples[(self.start + i) % RING_CAPACITY])
            .sum();
        sum / self.len as i64
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

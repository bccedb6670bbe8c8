/// Wall-clock source for update timestamps, injectable for tests.
pub trait Clock: Send + Sync {
    fn now_epoch_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_ms(&self) -> u64 {
        // Pre-1970 clocks are treated as the epoch
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

use chrono::{DateTime, Utc};

/// Abstracts "now" so the publisher loop, saga retries and retention
/// sweepers can be driven by a fake clock in tests instead of real sleeps.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

//! Injected time source.
//!
//! The duplicate window and the lead number both depend on "now"; tests
//! pin it instead of sleeping across midnight.

use chrono::{DateTime, Local, NaiveDate, Utc};

pub trait Clock: Send + Sync {
    /// Current instant, UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar date in server-local time. This is the duplicate
    /// detection window key.
    fn local_date(&self) -> NaiveDate;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_date(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to a fixed instant, for deterministic tests.
#[cfg(any(test, feature = "mock"))]
#[derive(Clone, Copy, Debug)]
pub struct FixedClock {
    pub instant: DateTime<Utc>,
    pub date: NaiveDate,
}

#[cfg(any(test, feature = "mock"))]
impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            date: instant.date_naive(),
        }
    }
}

#[cfg(any(test, feature = "mock"))]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant
    }

    fn local_date(&self) -> NaiveDate {
        self.date
    }
}

/// Clock that advances one millisecond per `now()` call while the date
/// stays pinned. Lead numbers embed millis, so consecutive creations in
/// a test need distinct instants.
#[cfg(any(test, feature = "mock"))]
#[derive(Debug)]
pub struct SteppingClock {
    base: DateTime<Utc>,
    ticks: std::sync::atomic::AtomicI64,
}

#[cfg(any(test, feature = "mock"))]
impl SteppingClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            ticks: std::sync::atomic::AtomicI64::new(0),
        }
    }
}

#[cfg(any(test, feature = "mock"))]
impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let n = self
            .ticks
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.base + chrono::Duration::milliseconds(n)
    }

    fn local_date(&self) -> NaiveDate {
        self.base.date_naive()
    }
}

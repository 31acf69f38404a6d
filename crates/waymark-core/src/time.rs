//! Clock abstraction and timestamp formatting.
//!
//! Production code uses `SystemClock`; tests inject `TestClock` for
//! deterministic control over timestamps and sleeps. The formatting helpers
//! produce the backend's fixed-width timestamp and offset strings.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone, Utc};

/// Clock abstraction for time and sleep operations.
///
/// Suspension points in the delivery subsystem (debounce timers, retry
/// backoff) go through this trait so tests can run without real waits.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current UTC wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Returns the producer's local UTC offset.
    fn local_offset(&self) -> FixedOffset;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real clock using system time and tokio sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_offset(&self) -> FixedOffset {
        Local::now().offset().fix()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test clock with manually controlled time.
///
/// `sleep` advances virtual time immediately and yields, so time-dependent
/// code runs to completion without real waits. The local offset is fixed at
/// construction.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Microseconds since the UNIX epoch.
    epoch_micros: Arc<AtomicI64>,
    offset: FixedOffset,
}

impl TestClock {
    /// Creates a test clock starting at the given time with a UTC offset.
    pub fn new(start: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            epoch_micros: Arc::new(AtomicI64::new(start.timestamp_micros())),
            offset,
        }
    }

    /// Creates a test clock at the UNIX epoch with a zero offset.
    pub fn at_epoch() -> Self {
        let utc = FixedOffset::east_opt(0).unwrap_or_else(|| Utc.fix());
        Self::new(DateTime::UNIX_EPOCH, utc)
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let micros = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        self.epoch_micros.fetch_add(micros, Ordering::AcqRel);
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let micros = self.epoch_micros.load(Ordering::Acquire);
        Utc.timestamp_micros(micros).single().unwrap_or_else(Utc::now)
    }

    fn local_offset(&self) -> FixedOffset {
        self.offset
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

/// Formats a UTC instant as `YYYY-MM-DD HH:MM:SS.ffffff`.
///
/// Microsecond precision with zero padding, matching the backend's expected
/// visit-event timestamp format.
pub fn format_timestamp_micros(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Formats a UTC offset as `±hh:mm`.
pub fn format_utc_offset(offset: FixedOffset) -> String {
    let total_minutes = offset.local_minus_utc() / 60;
    let sign = if total_minutes < 0 { '-' } else { '+' };
    let minutes = total_minutes.abs();
    format!("{sign}{:02}:{:02}", minutes / 60, minutes % 60)
}

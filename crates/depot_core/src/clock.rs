//! Wall-clock time source with calendar-day awareness.

use chrono::{Local, Offset, TimeZone};

/// Time provider consulted for wall-clock milliseconds and calendar-day
/// boundaries.
///
/// The garbage-retention heuristics compare timestamps against the start of
/// the calendar day in the operator's time zone, so the two concerns travel
/// together. Tests inject a fixed clock to pin both the instant and the zone.
pub trait Clock: Send + Sync {
    /// Returns the current wall-clock time in Unix milliseconds.
    fn now_ms(&self) -> i64;

    /// Returns the start of the calendar day containing `at_ms`, with
    /// hours, minutes, seconds and milliseconds zeroed, in this clock's
    /// time zone.
    fn start_of_day_ms(&self, at_ms: i64) -> i64;
}

/// Production clock: system time in the system time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn start_of_day_ms(&self, at_ms: i64) -> i64 {
        day_start_in_zone(&Local, at_ms)
    }
}

/// Fixed clock for tests: an adjustable instant in a fixed-offset zone.
#[derive(Debug)]
pub struct FixedClock {
    now_ms: std::sync::atomic::AtomicI64,
    offset: chrono::FixedOffset,
}

impl FixedClock {
    /// Creates a fixed clock at `now_ms` with a UTC offset of
    /// `offset_secs` seconds east.
    pub fn new(now_ms: i64, offset_secs: i32) -> Self {
        let offset = chrono::FixedOffset::east_opt(offset_secs)
            .unwrap_or_else(|| chrono::FixedOffset::east_opt(0).unwrap());
        Self {
            now_ms: std::sync::atomic::AtomicI64::new(now_ms),
            offset,
        }
    }

    /// Moves the clock forward by `delta_ms`.
    pub fn advance(&self, delta_ms: i64) {
        self.now_ms
            .fetch_add(delta_ms, std::sync::atomic::Ordering::SeqCst);
    }

    /// Sets the clock to an absolute instant.
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn start_of_day_ms(&self, at_ms: i64) -> i64 {
        day_start_in_zone(&self.offset, at_ms)
    }
}

/// Computes the start of the calendar day containing `at_ms` in `tz`.
fn day_start_in_zone<Tz: TimeZone>(tz: &Tz, at_ms: i64) -> i64 {
    let Some(dt) = tz.timestamp_millis_opt(at_ms).single() else {
        // Out-of-range instant: fall back to a UTC day boundary.
        return at_ms - at_ms.rem_euclid(86_400_000);
    };

    let midnight = dt
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time of day");

    match tz.from_local_datetime(&midnight).earliest() {
        Some(start) => start.timestamp_millis(),
        // Midnight falls in a DST gap; approximate from the zone offset.
        None => {
            let offset_ms = i64::from(dt.offset().fix().local_minus_utc()) * 1000;
            (at_ms + offset_ms) - (at_ms + offset_ms).rem_euclid(86_400_000) - offset_ms
        }
    }
}

//! Store-owned timestamps and identifiers.

use std::sync::atomic::{AtomicI64, Ordering};
use ulid::Ulid;

/// Unix-epoch milliseconds from the wall clock.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

pub fn new_id() -> String {
    Ulid::new().to_string()
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Wall clock that never goes backwards within one store.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the clock so it never hands out anything older than `floor`.
    pub fn observe(&self, floor: i64) {
        self.last.fetch_max(floor, Ordering::AcqRel);
    }

    pub fn now(&self) -> i64 {
        let wall = now_millis();
        let prev = self.last.fetch_max(wall, Ordering::AcqRel);
        prev.max(wall)
    }
}

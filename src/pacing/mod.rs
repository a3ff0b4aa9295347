//! Throttling for directory refreshes and debouncing for searches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Lets at most one caller through per interval.
pub struct Throttle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// `true` when the interval since the last pass has elapsed.
    pub fn try_pass(&self) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Forget the last pass so the next call goes through.
    pub fn reset(&self) {
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

/// Trailing-edge debounce per caller: of the calls a caller makes within
/// the delay of each other, only the last one settles.
#[derive(Default)]
pub struct Debounce {
    tickets: AtomicU64,
    latest: Mutex<HashMap<String, u64>>,
}

impl Debounce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait `delay`, then report whether no later call from `caller` arrived
    /// in the meantime.
    pub async fn settle(&self, caller: &str, delay: Duration) -> bool {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock().insert(caller.to_string(), ticket);

        tokio::time::sleep(delay).await;

        let mut latest = self.lock();
        if latest.get(caller) == Some(&ticket) {
            latest.remove(caller);
            true
        } else {
            false
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.latest.lock().unwrap_or_else(|p| p.into_inner())
    }
}

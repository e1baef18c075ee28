//! Bounded history of consecutive authentication failures.
//!
//! A capacity-limited map from principal name to failure count. Entries are
//! kept in recency order: recording a failure for a principal moves it to the
//! most-recent position, and when a new principal would push the map past its
//! capacity the least-recently-touched entry is evicted first. Active
//! offenders therefore stay tracked while stale ones age out.
//!
//! The reported count is capped separately from the capacity; the two limits
//! are independent settings.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Default number of principals tracked.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Default ceiling for a single principal's failure count.
pub const DEFAULT_FAILURE_COUNT_CAP: u32 = 100;

struct HistoryInner {
    counts: HashMap<String, u32>,
    /// Front = least recently touched.
    order: VecDeque<String>,
}

/// Thread-safe bounded failure history.
///
/// All updates for a principal happen under one lock, so concurrent
/// increments are never lost and a principal is never evicted twice.
pub struct BoundedFailureHistory {
    inner: Mutex<HistoryInner>,
    capacity: usize,
    count_cap: u32,
}

impl BoundedFailureHistory {
    pub fn new(capacity: usize, count_cap: u32) -> Self {
        Self {
            inner: Mutex::new(HistoryInner {
                counts: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity,
            count_cap,
        }
    }

    /// Record one more failure for `principal` and return its new count.
    ///
    /// The count stops growing at the configured cap; the principal is still
    /// moved to the most-recent position.
    pub fn record_failure(&self, principal: &str) -> u32 {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let count = match inner.counts.get_mut(principal) {
            Some(count) => {
                if *count < self.count_cap {
                    *count += 1;
                }
                *count
            }
            None => {
                inner.counts.insert(principal.to_owned(), 1);
                1
            }
        };

        if let Some(pos) = inner.order.iter().position(|p| p == principal) {
            inner.order.remove(pos);
        }
        inner.order.push_back(principal.to_owned());

        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.counts.remove(&evicted);
                tracing::debug!(principal = %evicted, "evicted from failure history");
            }
        }

        count
    }

    /// Current failure count for `principal`, if tracked.
    pub fn get(&self, principal: &str) -> Option<u32> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.counts.get(principal).copied()
    }

    /// Number of principals currently tracked.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count_cap(&self) -> u32 {
        self.count_cap
    }
}

impl Default for BoundedFailureHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_FAILURE_COUNT_CAP)
    }
}

use super::{BucketLock, PayloadId};
use std::collections::HashMap;

/// Returned by [`ReferenceCounterRegistry::decrement`] when the id has no counter.
pub const UNKNOWN_REFERENCE: i64 = -1;

/// Live reference counts per payload id.
///
/// Every operation completes its whole read-modify-write under the bucket lock
/// of the id it touches, so mutations of one id are linearized.
pub struct ReferenceCounterRegistry {
    counters: BucketLock<HashMap<PayloadId, i64>>,
}

impl ReferenceCounterRegistry {
    pub fn new(bucket_count: usize) -> Self {
        Self {
            counters: BucketLock::new(bucket_count),
        }
    }

    pub fn get(&self, id: PayloadId) -> Option<i64> {
        self.counters.lock_for(id).get(&id).copied()
    }

    pub fn increment(&self, id: PayloadId) -> Option<i64> {
        self.add(id, 1)
    }

    /// Add `n` references, creating the counter at `n` when absent. Returns
    /// `None` and leaves the counter unchanged if the sum would overflow.
    pub fn add(&self, id: PayloadId, n: i64) -> Option<i64> {
        let mut bucket = self.counters.lock_for(id);
        let current = bucket.get(&id).copied().unwrap_or(0);
        let updated = current.checked_add(n)?;
        bucket.insert(id, updated);
        Some(updated)
    }

    /// Subtract one reference. Unknown ids return [`UNKNOWN_REFERENCE`] without
    /// creating an entry; a counter that reaches zero stays readable as zero.
    pub fn decrement(&self, id: PayloadId) -> i64 {
        let mut bucket = self.counters.lock_for(id);
        match bucket.get_mut(&id) {
            Some(counter) => {
                *counter -= 1;
                *counter
            }
            None => UNKNOWN_REFERENCE,
        }
    }

    pub fn remove(&self, id: PayloadId) {
        self.counters.lock_for(id).remove(&id);
    }

    pub fn size(&self) -> usize {
        let mut size = 0;
        self.counters.for_each(|bucket| size += bucket.len());
        size
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Point-in-time copy of all counters. Buckets are read one after another,
    /// so the copy is not atomic across buckets.
    pub fn snapshot(&self) -> HashMap<PayloadId, i64> {
        let mut snapshot = HashMap::new();
        self.counters
            .for_each(|bucket| snapshot.extend(bucket.iter().map(|(id, count)| (*id, *count))));
        snapshot
    }
}

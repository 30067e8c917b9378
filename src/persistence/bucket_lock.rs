use super::PayloadId;
use parking_lot::{Mutex, MutexGuard};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Fixed array of independent locks selected by a stable hash of the payload id.
///
/// Each bucket may own the data it protects (`BucketLock<HashMap<..>>`) or guard
/// nothing (`BucketLock<()>`) when callers only need mutual exclusion for a
/// compound operation. The same id always lands in the same bucket.
pub struct BucketLock<T = ()> {
    buckets: Vec<Mutex<T>>,
}

impl<T: Default> BucketLock<T> {
    /// A zero bucket count is clamped to one bucket.
    pub fn new(bucket_count: usize) -> Self {
        let count = bucket_count.max(1);
        let mut buckets = Vec::with_capacity(count);
        buckets.resize_with(count, || Mutex::new(T::default()));
        Self { buckets }
    }
}

impl<T> BucketLock<T> {
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket_index(&self, id: PayloadId) -> usize {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(&id.to_be_bytes());
        (hasher.finish() % self.buckets.len() as u64) as usize
    }

    /// Hold the returned guard across every step of a get-then-mutate sequence.
    pub fn lock_for(&self, id: PayloadId) -> MutexGuard<'_, T> {
        self.buckets[self.bucket_index(id)].lock()
    }

    /// Visit every bucket in index order, one lock at a time.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&T),
    {
        for bucket in &self.buckets {
            let guard = bucket.lock();
            visit(&guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn id(raw: u64) -> PayloadId {
        PayloadId::new(raw).unwrap()
    }

    #[test]
    fn same_id_maps_to_same_bucket() {
        let locks: BucketLock = BucketLock::new(16);
        for raw in 0..1_000 {
            let first = locks.bucket_index(id(raw));
            assert_eq!(first, locks.bucket_index(id(raw)));
            assert!(first < 16);
        }
    }

    #[test]
    fn ids_spread_over_buckets() {
        let locks: BucketLock = BucketLock::new(8);
        let used: HashSet<usize> = (0..256).map(|raw| locks.bucket_index(id(raw))).collect();
        assert_eq!(used.len(), 8);
    }

    #[test]
    fn zero_buckets_clamps_to_one() {
        let locks: BucketLock = BucketLock::new(0);
        assert_eq!(locks.bucket_count(), 1);
        assert_eq!(locks.bucket_index(id(99)), 0);
    }

    #[test]
    fn guarded_data_is_linearized_per_bucket() {
        let locks: Arc<BucketLock<u64>> = Arc::new(BucketLock::new(4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        let mut guard = locks.lock_for(id(5));
                        *guard += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*locks.lock_for(id(5)), 8_000);
        let mut total = 0;
        locks.for_each(|value| total += *value);
        assert_eq!(total, 8_000);
    }
}

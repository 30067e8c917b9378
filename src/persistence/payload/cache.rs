use crate::persistence::PayloadId;
use crate::time::Clock;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Not read within the expiry window.
    Expired,
    /// Least recently used entry pushed out by the size bound.
    Size,
    /// Removed by the store after physical deletion.
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheRemoval {
    pub id: PayloadId,
    pub content_hash: u64,
    pub cause: RemovalCause,
}

type RemovalListener = Box<dyn Fn(&CacheRemoval) + Send + Sync>;

struct CacheEntry {
    payload: Bytes,
    content_hash: u64,
    last_access: Instant,
    tick: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<PayloadId, CacheEntry>,
    recency: BTreeMap<u64, PayloadId>,
    next_tick: u64,
}

impl CacheState {
    fn touch(&mut self, id: PayloadId, now: Instant) {
        let tick = self.next_tick;
        if let Some(entry) = self.entries.get_mut(&id) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            entry.last_access = now;
            self.recency.insert(tick, id);
            self.next_tick += 1;
        }
    }

    fn remove(&mut self, id: PayloadId, cause: RemovalCause) -> Option<CacheRemoval> {
        let entry = self.entries.remove(&id)?;
        self.recency.remove(&entry.tick);
        Some(CacheRemoval {
            id,
            content_hash: entry.content_hash,
            cause,
        })
    }

    fn expire(&mut self, now: Instant, ttl: Duration, removed: &mut Vec<CacheRemoval>) {
        while let Some((_, &id)) = self.recency.first_key_value() {
            let expired = self
                .entries
                .get(&id)
                .map_or(true, |entry| entry.last_access + ttl <= now);
            if !expired {
                break;
            }
            match self.remove(id, RemovalCause::Expired) {
                Some(removal) => removed.push(removal),
                None => {
                    self.recency.pop_first();
                }
            }
        }
    }
}

/// Size-bounded payload cache with expire-after-access.
///
/// Eviction never touches durable storage or reference counts; the removal
/// listener is told about every entry that leaves, after the cache lock is
/// released.
pub struct PayloadCache<C: Clock> {
    state: Mutex<CacheState>,
    capacity: usize,
    ttl: Duration,
    clock: C,
    listener: Option<RemovalListener>,
}

impl<C: Clock> PayloadCache<C> {
    pub fn new(capacity: usize, ttl: Duration, clock: C) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            capacity: capacity.max(1),
            ttl,
            clock,
            listener: None,
        }
    }

    pub fn with_removal_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&CacheRemoval) + Send + Sync + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Cached bytes for `id`, refreshing its recency and expiry.
    pub fn get(&self, id: PayloadId) -> Option<Bytes> {
        let now = self.clock.now();
        let mut removed = Vec::new();
        let hit = {
            let mut state = self.state.lock();
            state.expire(now, self.ttl, &mut removed);
            let hit = state.entries.get(&id).map(|entry| entry.payload.clone());
            if hit.is_some() {
                state.touch(id, now);
            }
            hit
        };
        self.notify(&removed);
        hit
    }

    /// Presence check that does not count as an access.
    pub fn contains(&self, id: PayloadId) -> bool {
        let now = self.clock.now();
        let state = self.state.lock();
        state
            .entries
            .get(&id)
            .is_some_and(|entry| entry.last_access + self.ttl > now)
    }

    pub fn insert(&self, id: PayloadId, content_hash: u64, payload: Bytes) {
        let now = self.clock.now();
        let mut removed = Vec::new();
        {
            let mut state = self.state.lock();
            state.expire(now, self.ttl, &mut removed);
            if let Some(previous) = state.entries.get(&id).map(|entry| entry.tick) {
                state.recency.remove(&previous);
            }
            let tick = state.next_tick;
            state.next_tick += 1;
            state.entries.insert(
                id,
                CacheEntry {
                    payload,
                    content_hash,
                    last_access: now,
                    tick,
                },
            );
            state.recency.insert(tick, id);
            while state.entries.len() > self.capacity {
                let Some((_, oldest)) = state.recency.pop_first() else {
                    break;
                };
                if let Some(entry) = state.entries.remove(&oldest) {
                    removed.push(CacheRemoval {
                        id: oldest,
                        content_hash: entry.content_hash,
                        cause: RemovalCause::Size,
                    });
                }
            }
        }
        self.notify(&removed);
    }

    pub fn invalidate(&self, id: PayloadId) -> bool {
        let removal = self.state.lock().remove(id, RemovalCause::Explicit);
        match removal {
            Some(removal) => {
                self.notify(std::slice::from_ref(&removal));
                true
            }
            None => false,
        }
    }

    /// Drop every entry whose expiry window has passed.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = Vec::new();
        self.state.lock().expire(now, self.ttl, &mut removed);
        self.notify(&removed);
        removed.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, removed: &[CacheRemoval]) {
        if let Some(listener) = &self.listener {
            for removal in removed {
                listener(removal);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use std::sync::Arc;

    fn id(raw: u64) -> PayloadId {
        PayloadId::new(raw).unwrap()
    }

    fn recording_cache(
        capacity: usize,
        ttl: Duration,
        clock: ManualClock,
    ) -> (PayloadCache<ManualClock>, Arc<Mutex<Vec<CacheRemoval>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cache = PayloadCache::new(capacity, ttl, clock)
            .with_removal_listener(move |removal| sink.lock().push(*removal));
        (cache, seen)
    }

    #[test]
    fn evicts_least_recently_used_over_capacity() {
        let (cache, seen) = recording_cache(2, Duration::from_secs(60), ManualClock::new());
        cache.insert(id(1), 11, Bytes::from_static(b"a"));
        cache.insert(id(2), 22, Bytes::from_static(b"b"));
        assert!(cache.get(id(1)).is_some());
        cache.insert(id(3), 33, Bytes::from_static(b"c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(id(2)).is_none());
        assert!(cache.get(id(1)).is_some());
        let seen = seen.lock();
        assert_eq!(
            seen.as_slice(),
            &[CacheRemoval {
                id: id(2),
                content_hash: 22,
                cause: RemovalCause::Size
            }]
        );
    }

    #[test]
    fn entries_expire_after_access_window() {
        let clock = ManualClock::new();
        let (cache, seen) = recording_cache(10, Duration::from_millis(100), clock.clone());
        cache.insert(id(1), 1, Bytes::from_static(b"a"));
        cache.insert(id(2), 2, Bytes::from_static(b"b"));

        clock.advance(Duration::from_millis(60));
        assert!(cache.get(id(1)).is_some());
        clock.advance(Duration::from_millis(60));

        assert!(!cache.contains(id(2)));
        assert!(cache.contains(id(1)));
        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(seen.lock()[0].cause, RemovalCause::Expired);
        assert_eq!(seen.lock()[0].id, id(2));

        clock.advance(Duration::from_millis(100));
        assert!(cache.get(id(1)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_reports_explicit_removal_once() {
        let (cache, seen) = recording_cache(4, Duration::from_secs(60), ManualClock::new());
        cache.insert(id(7), 70, Bytes::from_static(b"x"));
        assert!(cache.invalidate(id(7)));
        assert!(!cache.invalidate(id(7)));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].cause, RemovalCause::Explicit);
    }

    #[test]
    fn reinsert_refreshes_without_removal_event() {
        let (cache, seen) = recording_cache(1, Duration::from_secs(60), ManualClock::new());
        cache.insert(id(1), 1, Bytes::from_static(b"a"));
        cache.insert(id(1), 1, Bytes::from_static(b"a"));
        assert_eq!(cache.len(), 1);
        assert!(seen.lock().is_empty());
    }
}

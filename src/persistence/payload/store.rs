use super::backend::LocalPayloadStore;
use super::cache::PayloadCache;
use super::error::PayloadError;
use super::sweeper::{DeferredDeletionSweeper, RemovablePayload, RemovalQueue};
use crate::config::PayloadConfig;
use crate::persistence::{BucketLock, PayloadId, ReferenceCounterRegistry, UNKNOWN_REFERENCE};
use crate::time::{Clock, SystemClock};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::backtrace::Backtrace;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use twox_hash::XxHash64;

/// Content hash used for deduplication lookups.
pub fn content_hash(payload: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(payload);
    hasher.finish()
}

/// Outcome of one deferred deletion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    Deleted,
    /// The count went back above zero before the sweep; nothing was touched.
    Resurrected,
    /// An earlier sweep already removed the payload.
    AlreadyGone,
    /// The backend delete failed; the entry was queued again.
    Retry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadStoreStats {
    pub cached: usize,
    pub lookup_entries: usize,
    pub reference_counters: usize,
    pub pending_removals: usize,
    pub suspected: usize,
    pub next_id: u64,
}

/// Deduplicated, reference-counted payload storage.
///
/// Payloads are addressed by [`PayloadId`]. Identical bytes stored while the
/// first copy is still cached share one id; the reference count decides when
/// the payload may be deleted, and deletion itself is deferred to the
/// [`DeferredDeletionSweeper`].
pub struct PayloadStore<C: Clock = SystemClock> {
    config: PayloadConfig,
    backend: Arc<dyn LocalPayloadStore>,
    counters: ReferenceCounterRegistry,
    locks: BucketLock,
    lookup: Arc<RwLock<HashMap<u64, PayloadId>>>,
    cache: PayloadCache<C>,
    removals: RemovalQueue,
    next_id: AtomicU64,
    suspected: Mutex<BTreeSet<PayloadId>>,
    closed: AtomicBool,
    sweepers: Mutex<Vec<JoinHandle<()>>>,
    hash_fn: fn(&[u8]) -> u64,
    clock: C,
}

impl<C: Clock> PayloadStore<C> {
    pub fn new(config: &PayloadConfig, backend: Arc<dyn LocalPayloadStore>, clock: C) -> Self {
        let lookup: Arc<RwLock<HashMap<u64, PayloadId>>> = Arc::new(RwLock::new(HashMap::new()));
        let hook_lookup = lookup.clone();
        let cache = PayloadCache::new(config.cache_max_entries, config.cache_ttl(), clock.clone())
            .with_removal_listener(move |removal| {
                let mut table = hook_lookup.write();
                if table.get(&removal.content_hash) == Some(&removal.id) {
                    table.remove(&removal.content_hash);
                }
            });
        Self {
            config: config.clone(),
            backend,
            counters: ReferenceCounterRegistry::new(config.bucket_count),
            locks: BucketLock::new(config.bucket_count),
            lookup,
            cache,
            removals: RemovalQueue::new(config.cleanup_threads),
            next_id: AtomicU64::new(0),
            suspected: Mutex::new(BTreeSet::new()),
            closed: AtomicBool::new(false),
            sweepers: Mutex::new(Vec::new()),
            hash_fn: content_hash,
            clock,
        }
    }

    /// Replace the content hash function. Only useful to force collisions in tests.
    pub fn with_content_hasher(mut self, hash_fn: fn(&[u8]) -> u64) -> Self {
        self.hash_fn = hash_fn;
        self
    }

    /// Recover the id allocator from the backend and start the sweeper shards.
    ///
    /// Must be called from within a tokio runtime, after any replay that uses
    /// [`PayloadStore::increment_reference_on_restore`].
    pub fn init(self: &Arc<Self>) -> Result<(), PayloadError> {
        let restored = self.restore()?;
        let handles = DeferredDeletionSweeper::new(self.clone()).spawn();
        let shards = handles.len();
        self.sweepers.lock().extend(handles);
        info!(
            restored,
            shards,
            next_id = self.next_id.load(Ordering::SeqCst),
            backend = self.backend.name(),
            "payload store initialised"
        );
        Ok(())
    }

    /// Move the id allocator past every id already present in the backend.
    pub fn restore(&self) -> Result<usize, PayloadError> {
        let ids = self.backend.enumerate_ids()?;
        if let Some(max) = ids.iter().max() {
            self.next_id.fetch_max(max.get() + 1, Ordering::SeqCst);
        }
        Ok(ids.len())
    }

    /// Store `payload` with `delta` initial references and return its id.
    ///
    /// When byte-identical content is still cached, the existing id is reused
    /// and its count grows by `delta`. Hash hits are always verified by byte
    /// equality; a colliding payload gets its own id.
    pub fn add(&self, payload: Bytes, delta: i64) -> Result<PayloadId, PayloadError> {
        self.ensure_open()?;
        ensure_positive(delta)?;
        let hash = (self.hash_fn)(&payload);

        if let Some(existing) = self.existing_id(hash, &payload) {
            let _guard = self.locks.lock_for(existing);
            // the sweeper invalidates the cache under this lock before deleting
            if self.cache.contains(existing) {
                let count = self
                    .counters
                    .add(existing, delta)
                    .ok_or(PayloadError::CounterOverflow { id: existing, delta })?;
                debug!(payload_id = %existing, count, "reusing stored payload");
                return Ok(existing);
            }
        }

        let id = self.allocate_id()?;
        let _guard = self.locks.lock_for(id);
        self.store_locked(id, hash, payload, delta)?;
        Ok(id)
    }

    /// Store `payload` under a caller-chosen id.
    ///
    /// The id is taken from the allocator first, so it fails with
    /// [`PayloadError::IdInUse`] when the id is live or was already handed out.
    pub fn add_with_id(
        &self,
        payload: Bytes,
        delta: i64,
        id: PayloadId,
    ) -> Result<(), PayloadError> {
        self.ensure_open()?;
        ensure_positive(delta)?;
        let reserved = self.next_id.fetch_max(id.get() + 1, Ordering::SeqCst);
        if reserved > id.get() {
            return Err(PayloadError::IdInUse(id));
        }
        let hash = (self.hash_fn)(&payload);
        let _guard = self.locks.lock_for(id);
        self.store_locked(id, hash, payload, delta)
    }

    /// Payload bytes for a live message. A miss is a bookkeeping bug upstream.
    pub fn get(&self, id: PayloadId) -> Result<Bytes, PayloadError> {
        self.get_or_none(id).ok_or(PayloadError::NotFound(id))
    }

    /// Like [`PayloadStore::get`] but a miss is not an error (retained messages).
    ///
    /// Backend failures are logged and read as a miss.
    pub fn get_or_none(&self, id: PayloadId) -> Option<Bytes> {
        if let Some(payload) = self.cache.get(id) {
            return Some(payload);
        }
        let _guard = self.locks.lock_for(id);
        if let Some(payload) = self.cache.get(id) {
            return Some(payload);
        }
        match self.backend.read(id) {
            Ok(Some(payload)) => {
                let hash = (self.hash_fn)(&payload);
                self.cache.insert(id, hash, payload.clone());
                self.lookup.write().insert(hash, id);
                Some(payload)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(
                    payload_id = %id,
                    backend = self.backend.name(),
                    "payload read failed: {err}"
                );
                None
            }
        }
    }

    /// Count one reference found while replaying persisted messages at startup.
    pub fn increment_reference_on_restore(&self, id: PayloadId) -> Result<i64, PayloadError> {
        self.ensure_open()?;
        let _guard = self.locks.lock_for(id);
        self.counters
            .increment(id)
            .ok_or(PayloadError::CounterOverflow { id, delta: 1 })
    }

    /// Release one reference. Reaching zero queues the payload for deferred
    /// deletion. Decrementing an unknown or already-zero id is logged and
    /// leaves all state untouched; the return value is then
    /// [`UNKNOWN_REFERENCE`] or the unchanged zero.
    pub fn decrement_reference(&self, id: PayloadId) -> Result<i64, PayloadError> {
        self.ensure_open()?;
        let remaining = {
            let _guard = self.locks.lock_for(id);
            match self.counters.get(id) {
                Some(current) if current <= 0 => {
                    self.log_bad_decrement(id);
                    return Ok(current);
                }
                _ => {}
            }
            self.counters.decrement(id)
        };
        if remaining == UNKNOWN_REFERENCE {
            self.log_bad_decrement(id);
        } else if remaining == 0 {
            self.removals.push(RemovablePayload {
                id,
                marked_at: self.clock.now(),
            });
            debug!(payload_id = %id, "payload queued for deletion");
        }
        Ok(remaining)
    }

    /// Record an id whose reference bookkeeping looks wrong, for diagnostics.
    pub fn suspect(&self, id: PayloadId) {
        self.suspected.lock().insert(id);
    }

    pub fn suspected(&self) -> Vec<PayloadId> {
        self.suspected.lock().iter().copied().collect()
    }

    pub fn all_ids(&self) -> Result<Vec<PayloadId>, PayloadError> {
        Ok(self.backend.enumerate_ids()?)
    }

    pub fn reference_count(&self, id: PayloadId) -> Option<i64> {
        self.counters.get(id)
    }

    pub fn reference_counts(&self) -> HashMap<PayloadId, i64> {
        self.counters.snapshot()
    }

    pub fn stats(&self) -> PayloadStoreStats {
        PayloadStoreStats {
            cached: self.cache.len(),
            lookup_entries: self.lookup.read().len(),
            reference_counters: self.counters.size(),
            pending_removals: self.removals.len(),
            suspected: self.suspected.lock().len(),
            next_id: self.next_id.load(Ordering::SeqCst),
        }
    }

    /// Stop the sweeper shards and close the backend. Idempotent.
    pub fn close(&self) -> Result<(), PayloadError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for handle in self.sweepers.lock().drain(..) {
            handle.abort();
        }
        self.backend.close()?;
        info!(backend = self.backend.name(), "payload store closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &PayloadConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub(crate) fn removals(&self) -> &RemovalQueue {
        &self.removals
    }

    pub(crate) fn evict_expired(&self) -> usize {
        self.cache.evict_expired()
    }

    /// Delete a zero-marked payload if its count is still at or below zero.
    pub(crate) fn reap(&self, entry: RemovablePayload) -> ReapOutcome {
        let id = entry.id;
        let _guard = self.locks.lock_for(id);
        match self.counters.get(id) {
            None => return ReapOutcome::AlreadyGone,
            Some(count) if count > 0 => return ReapOutcome::Resurrected,
            Some(_) => {}
        }
        if let Err(err) = self.backend.delete(id) {
            tracing::error!(
                payload_id = %id,
                backend = self.backend.name(),
                "payload delete failed, retrying next sweep: {err}"
            );
            self.removals.push(entry);
            return ReapOutcome::Retry;
        }
        self.cache.invalidate(id);
        self.counters.remove(id);
        ReapOutcome::Deleted
    }

    fn existing_id(&self, hash: u64, payload: &[u8]) -> Option<PayloadId> {
        let candidate = self.lookup.read().get(&hash).copied()?;
        let cached = self.cache.get(candidate)?;
        (cached.as_ref() == payload).then_some(candidate)
    }

    fn store_locked(
        &self,
        id: PayloadId,
        hash: u64,
        payload: Bytes,
        delta: i64,
    ) -> Result<(), PayloadError> {
        if self.counters.get(id).is_some() {
            return Err(PayloadError::IdInUse(id));
        }
        self.backend.write(id, payload.clone())?;
        self.counters
            .add(id, delta)
            .ok_or(PayloadError::CounterOverflow { id, delta })?;
        self.cache.insert(id, hash, payload);
        // a colliding or older id at this hash just loses the dedup shortcut
        self.lookup.write().insert(hash, id);
        Ok(())
    }

    fn allocate_id(&self) -> Result<PayloadId, PayloadError> {
        let raw = self.next_id.fetch_add(1, Ordering::SeqCst);
        PayloadId::new(raw).ok_or(PayloadError::IdsExhausted)
    }

    fn ensure_open(&self) -> Result<(), PayloadError> {
        if self.is_closed() {
            return Err(PayloadError::Closed);
        }
        Ok(())
    }

    fn log_bad_decrement(&self, id: PayloadId) {
        warn!(
            payload_id = %id,
            "tried to decrement a payload reference counter that was already zero"
        );
        if self.config.log_reference_counting_backtrace {
            warn!(payload_id = %id, backtrace = %Backtrace::force_capture(), "decrement call site");
        } else if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(payload_id = %id, backtrace = %Backtrace::force_capture(), "decrement call site");
        }
    }
}

impl<C: Clock> Drop for PayloadStore<C> {
    fn drop(&mut self) {
        for handle in self.sweepers.get_mut().drain(..) {
            handle.abort();
        }
    }
}

fn ensure_positive(delta: i64) -> Result<(), PayloadError> {
    if delta <= 0 {
        return Err(PayloadError::InvalidDelta(delta));
    }
    Ok(())
}

use super::store::{PayloadStore, ReapOutcome};
use crate::persistence::PayloadId;
use crate::time::Clock;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// A payload whose reference count reached zero at `marked_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovablePayload {
    pub id: PayloadId,
    pub marked_at: Instant,
}

/// Zero-marked payloads waiting out the grace delay, partitioned by id so each
/// sweeper shard owns a disjoint FIFO.
pub struct RemovalQueue {
    shards: Vec<Mutex<VecDeque<RemovablePayload>>>,
}

impl RemovalQueue {
    pub fn new(shard_count: usize) -> Self {
        let count = shard_count.max(1);
        let mut shards = Vec::with_capacity(count);
        shards.resize_with(count, || Mutex::new(VecDeque::new()));
        Self { shards }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_for(&self, id: PayloadId) -> usize {
        (id.get() % self.shards.len() as u64) as usize
    }

    pub fn push(&self, entry: RemovablePayload) {
        self.shards[self.shard_for(entry.id)].lock().push_back(entry);
    }

    /// Pop entries from the front of `shard` that have waited at least `grace`.
    /// Younger entries stay queued for a later tick.
    pub fn pop_expired(&self, shard: usize, now: Instant, grace: Duration) -> Vec<RemovablePayload> {
        let Some(queue) = self.shards.get(shard) else {
            return Vec::new();
        };
        let mut queue = queue.lock();
        let mut ready = Vec::new();
        while let Some(front) = queue.front() {
            if front.marked_at + grace > now {
                break;
            }
            if let Some(entry) = queue.pop_front() {
                ready.push(entry);
            }
        }
        ready
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub resurrected: usize,
    pub already_gone: usize,
    pub retried: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: ReapOutcome) {
        match outcome {
            ReapOutcome::Deleted => self.deleted += 1,
            ReapOutcome::Resurrected => self.resurrected += 1,
            ReapOutcome::AlreadyGone => self.already_gone += 1,
            ReapOutcome::Retry => self.retried += 1,
        }
    }

    fn merge(&mut self, other: SweepReport) {
        self.deleted += other.deleted;
        self.resurrected += other.resurrected;
        self.already_gone += other.already_gone;
        self.retried += other.retried;
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Reaps zero-count payloads after the grace delay.
///
/// Shard `i` of `n` first runs after `schedule * i` and then every
/// `schedule * n`, so under load all shards tick once per base period.
pub struct DeferredDeletionSweeper<C: Clock> {
    store: Arc<PayloadStore<C>>,
}

impl<C: Clock> DeferredDeletionSweeper<C> {
    pub fn new(store: Arc<PayloadStore<C>>) -> Self {
        Self { store }
    }

    /// One tick for one shard.
    pub fn sweep_shard(&self, shard: usize) -> SweepReport {
        sweep_shard(&self.store, shard)
    }

    /// One tick across every shard.
    pub fn sweep_all(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for shard in 0..self.store.removals().shard_count() {
            report.merge(self.sweep_shard(shard));
        }
        report
    }

    /// Spawn one periodic task per shard. Tasks hold a weak reference and stop
    /// once the store is closed or dropped.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let shards = self.store.removals().shard_count();
        let schedule = self
            .store
            .config()
            .cleanup_schedule()
            .max(Duration::from_millis(1));
        let period = schedule * shards as u32;
        let clock = self.store.clock().clone();
        let store = Arc::downgrade(&self.store);
        info!(
            shards,
            period_ms = period.as_millis() as u64,
            "starting payload deletion sweeper"
        );
        (0..shards)
            .map(|shard| {
                let store = store.clone();
                let clock = clock.clone();
                let initial = schedule * shard as u32;
                tokio::spawn(async move { run_shard(store, clock, shard, initial, period).await })
            })
            .collect()
    }
}

async fn run_shard<C: Clock>(
    store: Weak<PayloadStore<C>>,
    clock: C,
    shard: usize,
    initial: Duration,
    period: Duration,
) {
    clock.sleep(initial).await;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(store) = store.upgrade() else {
            break;
        };
        if store.is_closed() {
            break;
        }
        let report = sweep_shard(&store, shard);
        if !report.is_empty() {
            debug!(
                shard,
                deleted = report.deleted,
                resurrected = report.resurrected,
                retried = report.retried,
                "payload sweep"
            );
        }
    }
    debug!(shard, "payload sweeper shard stopped");
}

fn sweep_shard<C: Clock>(store: &PayloadStore<C>, shard: usize) -> SweepReport {
    if shard == 0 {
        store.evict_expired();
    }
    let now = store.clock().now();
    let grace = store.config().cleanup_delay();
    let mut report = SweepReport::default();
    for entry in store.removals().pop_expired(shard, now, grace) {
        report.record(store.reap(entry));
    }
    report
}

mod common;

use broker_core::persistence::{
    DeferredDeletionSweeper, FilePayloadBackend, LocalPayloadStore, PayloadError, PayloadStore,
};
use broker_core::time::ManualClock;
use bytes::Bytes;
use common::{manual_store, memory_store, payload_config};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn file_backed_lifecycle_from_add_to_deletion() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(FilePayloadBackend::open(dir.path()).unwrap());
    let (store, clock) = manual_store(&payload_config(), backend.clone());
    let sweeper = DeferredDeletionSweeper::new(store.clone());

    let id = store.add(Bytes::from_static(b"retained state"), 1).unwrap();
    assert_eq!(store.add(Bytes::from_static(b"retained state"), 2).unwrap(), id);
    assert_eq!(store.reference_count(id), Some(3));
    assert!(dir.path().join(format!("{id}.payload")).exists());

    for expected in [2, 1, 0] {
        assert_eq!(store.decrement_reference(id).unwrap(), expected);
    }
    clock.advance(Duration::from_secs(3));
    assert_eq!(sweeper.sweep_all().deleted, 1);
    assert!(!dir.path().join(format!("{id}.payload")).exists());
    assert!(matches!(store.get(id), Err(PayloadError::NotFound(missing)) if missing == id));
    assert_eq!(store.get_or_none(id), None);
}

#[test]
fn restored_store_continues_after_existing_ids() {
    let dir = tempdir().unwrap();
    let first_id = {
        let backend = Arc::new(FilePayloadBackend::open(dir.path()).unwrap());
        let (store, _clock) = manual_store(&payload_config(), backend);
        store.add(Bytes::from_static(b"one"), 1).unwrap();
        let id = store.add(Bytes::from_static(b"two"), 1).unwrap();
        store.close().unwrap();
        id
    };

    let backend = Arc::new(FilePayloadBackend::open(dir.path()).unwrap());
    let (store, _clock) = manual_store(&payload_config(), backend);
    assert_eq!(store.restore().unwrap(), 2);
    assert_eq!(store.increment_reference_on_restore(first_id).unwrap(), 1);
    assert_eq!(store.get(first_id).unwrap(), "two");

    let fresh = store.add(Bytes::from_static(b"three"), 1).unwrap();
    assert!(fresh > first_id);
    let mut ids = store.all_ids().unwrap();
    ids.sort();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids.last(), Some(&fresh));
}

#[test]
fn closed_store_rejects_mutation() {
    let (store, _backend, _clock) = memory_store();
    let id = store.add(Bytes::from_static(b"x"), 1).unwrap();
    store.close().unwrap();
    store.close().unwrap();
    assert!(matches!(
        store.add(Bytes::from_static(b"y"), 1),
        Err(PayloadError::Closed)
    ));
    assert!(matches!(
        store.decrement_reference(id),
        Err(PayloadError::Closed)
    ));
}

#[test]
fn unknown_decrement_leaves_state_untouched() {
    let (store, _backend, _clock) = memory_store();
    let id = store.add(Bytes::from_static(b"x"), 1).unwrap();
    store.decrement_reference(id).unwrap();
    let before = store.stats();
    assert_eq!(store.decrement_reference(id).unwrap(), 0);
    assert_eq!(store.stats(), before);
}

/// Producers add, read and release the same content while a sweeper with no
/// grace delay reaps as fast as it can. A producer holding a reference must
/// always be able to read its payload.
#[test]
fn holders_never_lose_payload_to_concurrent_sweeps() {
    let mut config = payload_config();
    config.cleanup_delay_ms = 0;
    let backend = Arc::new(broker_core::persistence::MemoryPayloadBackend::new());
    let clock = ManualClock::new();
    let store: Arc<PayloadStore<ManualClock>> =
        Arc::new(PayloadStore::new(&config, backend.clone(), clock));
    let stop = Arc::new(AtomicBool::new(false));

    let sweeper = {
        let sweeper = DeferredDeletionSweeper::new(store.clone());
        let stop = stop.clone();
        thread::spawn(move || {
            let mut deleted = 0;
            while !stop.load(Ordering::SeqCst) {
                deleted += sweeper.sweep_all().deleted;
            }
            deleted
        })
    };

    let producers: Vec<_> = (0..6)
        .map(|worker| {
            let store = store.clone();
            thread::spawn(move || {
                for round in 0..300 {
                    let payload = Bytes::from(format!("content-{}", (worker + round) % 3));
                    let id = store.add(payload.clone(), 1).unwrap();
                    assert_eq!(store.get(id).unwrap(), payload);
                    assert!(store.decrement_reference(id).unwrap() >= 0);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    sweeper.join().unwrap();

    DeferredDeletionSweeper::new(store.clone()).sweep_all();
    assert!(store.reference_counts().values().all(|count| *count >= 0));
    assert!(store
        .reference_counts()
        .keys()
        .all(|id| backend.contains(*id)));
    assert!(backend
        .enumerate_ids()
        .unwrap()
        .iter()
        .all(|id| store.reference_count(*id).is_some()));
}

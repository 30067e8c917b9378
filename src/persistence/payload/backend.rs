use super::error::BackendError;
use crate::persistence::PayloadId;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

const PAYLOAD_SUFFIX: &str = ".payload";
const TEMP_SUFFIX: &str = ".payload.tmp";

/// Durable payload storage behind the payload store.
///
/// Implementations are called with the payload's bucket lock held, so a single
/// id never sees concurrent writes and deletes.
pub trait LocalPayloadStore: Send + Sync {
    fn name(&self) -> &'static str;
    fn read(&self, id: PayloadId) -> Result<Option<Bytes>, BackendError>;
    fn write(&self, id: PayloadId, payload: Bytes) -> Result<(), BackendError>;
    /// Deleting an absent id succeeds.
    fn delete(&self, id: PayloadId) -> Result<(), BackendError>;
    fn enumerate_ids(&self) -> Result<Vec<PayloadId>, BackendError>;
    fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Heap-backed storage for ephemeral brokers and tests, with failure injection.
#[derive(Default)]
pub struct MemoryPayloadBackend {
    entries: RwLock<HashMap<PayloadId, Bytes>>,
    fail_reads: AtomicBool,
    failing_deletes: AtomicU32,
    reads: AtomicU64,
}

impl MemoryPayloadBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail with an I/O error until reset.
    pub fn fail_reads(&self, enabled: bool) {
        self.fail_reads.store(enabled, Ordering::SeqCst);
    }

    /// Fail the next `count` deletes.
    pub fn fail_next_deletes(&self, count: u32) {
        self.failing_deletes.store(count, Ordering::SeqCst);
    }

    /// Number of reads served by this backend (cache misses upstream).
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: PayloadId) -> bool {
        self.entries.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalPayloadStore for MemoryPayloadBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read(&self, id: PayloadId) -> Result<Option<Bytes>, BackendError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackendError::Io(std::io::Error::new(
                ErrorKind::Other,
                "injected read failure",
            )));
        }
        Ok(self.entries.read().get(&id).cloned())
    }

    fn write(&self, id: PayloadId, payload: Bytes) -> Result<(), BackendError> {
        self.entries.write().insert(id, payload);
        Ok(())
    }

    fn delete(&self, id: PayloadId) -> Result<(), BackendError> {
        let injected = self
            .failing_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BackendError::Unavailable(format!(
                "injected delete failure for {id}"
            )));
        }
        self.entries.write().remove(&id);
        Ok(())
    }

    fn enumerate_ids(&self) -> Result<Vec<PayloadId>, BackendError> {
        let mut ids: Vec<PayloadId> = self.entries.read().keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

/// One file per payload (`<id>.payload`) under a directory.
///
/// Writes go to a temp file first and are renamed into place, so a crash never
/// leaves a truncated payload under its final name.
pub struct FilePayloadBackend {
    dir: PathBuf,
    closed: AtomicBool,
}

impl FilePayloadBackend {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            closed: AtomicBool::new(false),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: PayloadId) -> PathBuf {
        self.dir.join(format!("{id}{PAYLOAD_SUFFIX}"))
    }

    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(format!(
                "{} is closed",
                self.dir.display()
            )));
        }
        Ok(())
    }
}

impl LocalPayloadStore for FilePayloadBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn read(&self, id: PayloadId) -> Result<Option<Bytes>, BackendError> {
        self.ensure_open()?;
        match fs::read(self.path_for(id)) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, id: PayloadId, payload: Bytes) -> Result<(), BackendError> {
        self.ensure_open()?;
        let tmp = self.dir.join(format!("{id}{TEMP_SUFFIX}"));
        fs::write(&tmp, &payload)?;
        fs::rename(&tmp, self.path_for(id))?;
        Ok(())
    }

    fn delete(&self, id: PayloadId) -> Result<(), BackendError> {
        self.ensure_open()?;
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn enumerate_ids(&self) -> Result<Vec<PayloadId>, BackendError> {
        self.ensure_open()?;
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(PAYLOAD_SUFFIX) else {
                continue;
            };
            match stem.parse::<u64>().ok().and_then(PayloadId::new) {
                Some(id) => ids.push(id),
                None => {
                    tracing::warn!(file = %name, "skipping payload file with unparsable id");
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn close(&self) -> Result<(), BackendError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn id(raw: u64) -> PayloadId {
        PayloadId::new(raw).unwrap()
    }

    #[test]
    fn memory_backend_roundtrip_and_failure_injection() {
        let backend = MemoryPayloadBackend::new();
        backend.write(id(2), Bytes::from_static(b"two")).unwrap();
        backend.write(id(1), Bytes::from_static(b"one")).unwrap();
        assert_eq!(backend.read(id(1)).unwrap().unwrap(), "one");
        assert_eq!(backend.enumerate_ids().unwrap(), vec![id(1), id(2)]);

        backend.fail_reads(true);
        assert!(backend.read(id(1)).is_err());
        backend.fail_reads(false);

        backend.fail_next_deletes(1);
        assert!(backend.delete(id(1)).is_err());
        assert!(backend.contains(id(1)));
        backend.delete(id(1)).unwrap();
        backend.delete(id(1)).unwrap();
        assert!(!backend.contains(id(1)));
        assert_eq!(backend.read_count(), 2);
    }

    #[test]
    fn file_backend_persists_one_file_per_payload() {
        let dir = tempdir().unwrap();
        let backend = FilePayloadBackend::open(dir.path().join("payloads")).unwrap();
        backend.write(id(10), Bytes::from_static(b"hello")).unwrap();
        backend.write(id(3), Bytes::from_static(b"")).unwrap();
        assert!(backend.dir().join("10.payload").exists());
        assert_eq!(backend.read(id(10)).unwrap().unwrap(), "hello");
        assert_eq!(backend.read(id(3)).unwrap().unwrap(), "");
        assert!(backend.read(id(4)).unwrap().is_none());

        fs::write(backend.dir().join("junk.payload"), b"x").unwrap();
        fs::write(backend.dir().join("11.payload.tmp"), b"x").unwrap();
        assert_eq!(backend.enumerate_ids().unwrap(), vec![id(3), id(10)]);

        backend.delete(id(10)).unwrap();
        backend.delete(id(10)).unwrap();
        assert!(backend.read(id(10)).unwrap().is_none());

        let reopened = FilePayloadBackend::open(backend.dir()).unwrap();
        assert_eq!(reopened.enumerate_ids().unwrap(), vec![id(3)]);
        reopened.close().unwrap();
        assert!(reopened.read(id(3)).is_err());
    }
}

//! Partial downloads on disk and their bookkeeping records.
//!
//! # Design
//! - One record per offered file, keyed by name and announced size.
//! - A record is written to by at most one session at a time; the
//!   [`FileLease`] is that exclusivity and releases itself on drop.
//! - Partial data lives in the temporary directory as `<name>.<size>.part`;
//!   completed files move to the ready directory under their real name.

use std::collections::{BTreeMap, HashSet};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use xdcc_core::{FileKey, ResumeCatalog, ResumeDecision};

use crate::error::{TransferError, TransferResult};

/// Persistent bookkeeping for one offered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Real name from the offer.
    pub name: String,
    /// Announced size in bytes.
    pub size: u64,
    /// File name inside the temporary directory.
    pub temp_name: String,
    /// Bytes stored so far.
    pub current_size: u64,
    /// Last sampled throughput in bytes per second.
    #[serde(default)]
    pub speed: u64,
}

impl FileRecord {
    fn new(key: &FileKey) -> Self {
        Self {
            name: key.name.clone(),
            size: key.size,
            temp_name: format!("{}.{}.part", sanitize(&key.name), key.size),
            current_size: 0,
            speed: 0,
        }
    }

    /// Lookup key of the record.
    #[must_use]
    pub fn key(&self) -> FileKey {
        FileKey::new(self.name.clone(), self.size)
    }
}

#[derive(Default)]
struct StoreState {
    records: BTreeMap<FileKey, FileRecord>,
    leased: HashSet<FileKey>,
}

struct StoreInner {
    temp_dir: PathBuf,
    ready_dir: PathBuf,
    rollback_bytes: u64,
    state: Mutex<StoreState>,
}

/// Shared handle to the file store.
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<StoreInner>,
}

impl FileStore {
    /// Build a store. `rollback_bytes` is how far a resume rewinds behind the
    /// stored size.
    #[must_use]
    pub fn new(temp_dir: impl Into<PathBuf>, ready_dir: impl Into<PathBuf>, rollback_bytes: u64) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                temp_dir: temp_dir.into(),
                ready_dir: ready_dir.into(),
                rollback_bytes,
                state: Mutex::new(StoreState::default()),
            }),
        }
    }

    /// Create the temporary and ready directories.
    ///
    /// # Errors
    ///
    /// Returns an error if either directory cannot be created.
    pub async fn prepare(&self) -> TransferResult<()> {
        for dir in [&self.inner.temp_dir, &self.inner.ready_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| TransferError::io("create_dir", dir, source))?;
        }
        Ok(())
    }

    /// Replace the known records, typically from a snapshot.
    pub fn restore(&self, records: impl IntoIterator<Item = FileRecord>) {
        let mut state = self.lock();
        state.records = records
            .into_iter()
            .map(|record| (record.key(), record))
            .collect();
        debug!(records = state.records.len(), "file records restored");
    }

    /// Copy of every record.
    #[must_use]
    pub fn records(&self) -> Vec<FileRecord> {
        self.lock().records.values().cloned().collect()
    }

    /// Copy of one record.
    #[must_use]
    pub fn record(&self, key: &FileKey) -> Option<FileRecord> {
        self.lock().records.get(key).cloned()
    }

    /// Find or create the record for `key` and take the exclusive lease on it.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::LeaseHeld`] if another session owns the file.
    pub fn resolve(&self, key: &FileKey) -> TransferResult<FileLease> {
        let mut state = self.lock();
        if !state.leased.insert(key.clone()) {
            return Err(TransferError::LeaseHeld {
                name: key.name.clone(),
            });
        }
        let record = state
            .records
            .entry(key.clone())
            .or_insert_with(|| FileRecord::new(key));
        Ok(FileLease {
            store: self.clone(),
            key: key.clone(),
            path: self.inner.temp_dir.join(&record.temp_name),
            existing: record.current_size,
            current: record.current_size,
            file: None,
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, key: &FileKey, apply: impl FnOnce(&mut FileRecord)) {
        if let Some(record) = self.lock().records.get_mut(key) {
            apply(record);
        }
    }

    fn forget(&self, key: &FileKey) {
        self.lock().records.remove(key);
    }

    fn release(&self, key: &FileKey) {
        self.lock().leased.remove(key);
    }
}

impl ResumeCatalog for FileStore {
    fn resume_decision(&self, file: &FileKey) -> ResumeDecision {
        let state = self.lock();
        if state.leased.contains(file) {
            return ResumeDecision::InUse;
        }
        match state.records.get(file) {
            Some(record) if record.current_size > 0 && record.current_size < record.size => {
                match record.current_size.saturating_sub(self.inner.rollback_bytes) {
                    0 => ResumeDecision::Fresh,
                    offset => ResumeDecision::Resume(offset),
                }
            }
            _ => ResumeDecision::Fresh,
        }
    }
}

/// Exclusive write access to one stored file.
pub struct FileLease {
    store: FileStore,
    key: FileKey,
    path: PathBuf,
    existing: u64,
    current: u64,
    file: Option<File>,
}

impl FileLease {
    /// File this lease covers.
    #[must_use]
    pub const fn key(&self) -> &FileKey {
        &self.key
    }

    /// Temporary path of the partial data.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes that were stored when the lease was taken.
    #[must_use]
    pub const fn existing_size(&self) -> u64 {
        self.existing
    }

    /// Bytes stored right now.
    #[must_use]
    pub const fn current_size(&self) -> u64 {
        self.current
    }

    /// Read up to `len` stored bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the partial file cannot be read.
    pub async fn read_window(&self, offset: u64, len: u64) -> TransferResult<Vec<u8>> {
        let mut file = File::open(&self.path)
            .await
            .map_err(|source| TransferError::io("read_window_open", &self.path, source))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|source| TransferError::io("read_window_seek", &self.path, source))?;
        let mut window = Vec::new();
        file.take(len)
            .read_to_end(&mut window)
            .await
            .map_err(|source| TransferError::io("read_window", &self.path, source))?;
        Ok(window)
    }

    /// Open the partial file for writing at `offset`, dropping anything stored
    /// behind it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or truncated.
    pub async fn begin_at(&mut self, offset: u64) -> TransferResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| TransferError::io("create_dir", parent, source))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .await
            .map_err(|source| TransferError::io("open", &self.path, source))?;
        file.set_len(offset)
            .await
            .map_err(|source| TransferError::io("truncate", &self.path, source))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|source| TransferError::io("seek", &self.path, source))?;
        self.file = Some(file);
        self.set_current(offset);
        Ok(())
    }

    /// Append received bytes. Data is flushed before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer was not opened or the write fails.
    pub async fn append(&mut self, data: &[u8]) -> TransferResult<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(TransferError::WriterClosed {
                name: self.key.name.clone(),
            });
        };
        file.write_all(data)
            .await
            .map_err(|source| TransferError::io("append", &self.path, source))?;
        file.flush()
            .await
            .map_err(|source| TransferError::io("flush", &self.path, source))?;
        self.set_current(self.current + data.len() as u64);
        Ok(())
    }

    /// Store the latest throughput sample.
    pub fn set_speed(&self, speed: u64) {
        self.store.update(&self.key, |record| record.speed = speed);
    }

    /// Delete the partial data and forget the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be deleted.
    pub async fn remove(mut self) -> TransferResult<()> {
        self.file = None;
        self.store.forget(&self.key);
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(file = %self.key, "partial file removed");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(TransferError::io("remove", &self.path, source)),
        }
    }

    /// Move the finished file into the ready directory and forget the record.
    /// Returns the final path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be moved.
    pub async fn complete(mut self) -> TransferResult<PathBuf> {
        if let Some(file) = self.file.take() {
            file.sync_all()
                .await
                .map_err(|source| TransferError::io("sync", &self.path, source))?;
        }
        let ready_dir = self.store.inner.ready_dir.clone();
        fs::create_dir_all(&ready_dir)
            .await
            .map_err(|source| TransferError::io("create_dir", &ready_dir, source))?;
        let target = ready_dir.join(sanitize(&self.key.name));
        if let Err(err) = fs::rename(&self.path, &target).await {
            warn!(error = %err, file = %self.key, "rename into ready directory failed, copying");
            fs::copy(&self.path, &target)
                .await
                .map_err(|source| TransferError::io("copy_ready", &target, source))?;
            fs::remove_file(&self.path)
                .await
                .map_err(|source| TransferError::io("remove", &self.path, source))?;
        }
        self.store.forget(&self.key);
        info!(file = %self.key, path = %target.display(), "file ready");
        Ok(target)
    }

    fn set_current(&mut self, size: u64) {
        self.current = size;
        self.store
            .update(&self.key, |record| record.current_size = size);
    }
}

impl Drop for FileLease {
    fn drop(&mut self) {
        self.store.release(&self.key);
    }
}

fn sanitize(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    fn store(dir: &TempDir, rollback: u64) -> FileStore {
        FileStore::new(dir.path().join("temp"), dir.path().join("ready"), rollback)
    }

    #[tokio::test]
    async fn partial_file_resumes_behind_stored_size() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir, 100);
        let key = FileKey::new("a.bin", 10_000);
        assert_eq!(store.resume_decision(&key), ResumeDecision::Fresh);

        let mut lease = store.resolve(&key)?;
        assert_eq!(lease.existing_size(), 0);
        lease.begin_at(0).await?;
        lease.append(&[1; 1_000]).await?;
        assert_eq!(store.resume_decision(&key), ResumeDecision::InUse);
        drop(lease);

        assert_eq!(store.resume_decision(&key), ResumeDecision::Resume(900));
        assert_eq!(store.record(&key).map(|record| record.current_size), Some(1_000));
        Ok(())
    }

    #[tokio::test]
    async fn short_partial_restarts_fresh() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir, 4_096);
        let key = FileKey::new("a.bin", 10_000);
        let mut lease = store.resolve(&key)?;
        lease.begin_at(0).await?;
        lease.append(&[1; 1_000]).await?;
        drop(lease);
        assert_eq!(store.resume_decision(&key), ResumeDecision::Fresh);
        Ok(())
    }

    #[tokio::test]
    async fn second_lease_is_refused() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir, 100);
        let key = FileKey::new("a.bin", 10);
        let _lease = store.resolve(&key)?;
        assert!(matches!(
            store.resolve(&key),
            Err(TransferError::LeaseHeld { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn begin_at_truncates_and_window_reads_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir, 100);
        let key = FileKey::new("a.bin", 100);
        let mut lease = store.resolve(&key)?;
        lease.begin_at(0).await?;
        lease.append(b"ABCDEFGHIJ").await?;

        assert_eq!(lease.read_window(3, 4).await?, b"DEFG");
        assert_eq!(lease.read_window(8, 10).await?, b"IJ");

        lease.begin_at(5).await?;
        lease.append(b"xy").await?;
        assert_eq!(fs::read(lease.path()).await?, b"ABCDExy");
        assert_eq!(lease.current_size(), 7);
        Ok(())
    }

    #[tokio::test]
    async fn complete_moves_into_ready_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir, 100);
        store.prepare().await?;
        let key = FileKey::new("My.File.mkv", 3);
        let mut lease = store.resolve(&key)?;
        lease.begin_at(0).await?;
        lease.append(b"abc").await?;
        let partial = lease.path().to_path_buf();

        let target = lease.complete().await?;
        assert_eq!(target, dir.path().join("ready").join("My.File.mkv"));
        assert_eq!(fs::read(&target).await?, b"abc");
        assert!(!partial.exists());
        assert!(store.record(&key).is_none());
        assert!(store.resolve(&key).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn remove_deletes_partial_data() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(&dir, 100);
        let key = FileKey::new("a/b.bin", 50);
        let mut lease = store.resolve(&key)?;
        assert!(lease.path().ends_with("a_b.bin.50.part"));
        lease.begin_at(0).await?;
        lease.append(b"abc").await?;
        let partial = lease.path().to_path_buf();
        lease.remove().await?;
        assert!(!partial.exists());
        assert!(store.records().is_empty());
        Ok(())
    }

    #[test]
    fn restore_replaces_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir, 10);
        let mut record = FileRecord::new(&FileKey::new("a.bin", 100));
        record.current_size = 50;
        store.restore([record]);
        assert_eq!(
            store.resume_decision(&FileKey::new("a.bin", 100)),
            ResumeDecision::Resume(40)
        );
    }
}

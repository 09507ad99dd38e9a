//! File-backed snapshot store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use xdcc_core::Network;
use xdcc_transfer::FileRecord;

use crate::error::{SnapshotResult, io, json};

/// Document holding the entity tree.
pub const NETWORK_DOCUMENT: &str = "network.json";
/// Document holding the file records.
pub const FILES_DOCUMENT: &str = "files.json";

/// Persisted client state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Entity tree.
    pub network: Network,
    /// File records known to the store.
    pub files: Vec<FileRecord>,
}

/// Storage backend for snapshots.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Read the last saved snapshot, `None` when nothing was saved yet.
    async fn load(&self) -> SnapshotResult<Option<Snapshot>>;
    /// Persist `snapshot`, replacing the previous one.
    async fn save(&self, snapshot: &Snapshot) -> SnapshotResult<()>;
}

/// JSON documents in one directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Store rooted at `dir`. The directory is created on the first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the documents.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_document<T: Serialize + Sync>(&self, name: &str, value: &T) -> SnapshotResult<()> {
        let path = self.dir.join(name);
        let staged = sibling(&path, "new");
        let backup = sibling(&path, "bak");

        let body = serde_json::to_vec_pretty(value)
            .map_err(|source| json("serialise snapshot", path.clone(), source))?;
        let mut file = fs::File::create(&staged)
            .await
            .map_err(|source| io("create staged snapshot", staged.clone(), source))?;
        file.write_all(&body)
            .await
            .map_err(|source| io("write staged snapshot", staged.clone(), source))?;
        file.sync_all()
            .await
            .map_err(|source| io("sync staged snapshot", staged.clone(), source))?;
        drop(file);

        match fs::rename(&path, &backup).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(io("back up snapshot", backup, source)),
        }
        fs::rename(&staged, &path)
            .await
            .map_err(|source| io("install snapshot", path.clone(), source))?;
        debug!(path = %path.display(), bytes = body.len(), "snapshot document written");
        Ok(())
    }

    async fn read_document<T: DeserializeOwned>(&self, name: &str) -> SnapshotResult<Option<T>> {
        let path = self.dir.join(name);
        let primary = match read_json(&path).await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "snapshot unreadable; trying backup");
                Some(err)
            }
        };

        match (read_json(&sibling(&path, "bak")).await?, primary) {
            (Some(value), _) => Ok(Some(value)),
            (None, Some(err)) => Err(err),
            (None, None) => Ok(None),
        }
    }
}

#[async_trait]
impl SnapshotBackend for SnapshotStore {
    async fn load(&self) -> SnapshotResult<Option<Snapshot>> {
        let Some(network) = self.read_document::<Network>(NETWORK_DOCUMENT).await? else {
            return Ok(None);
        };
        let files = self
            .read_document::<Vec<FileRecord>>(FILES_DOCUMENT)
            .await?
            .unwrap_or_default();
        Ok(Some(Snapshot { network, files }))
    }

    async fn save(&self, snapshot: &Snapshot) -> SnapshotResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| io("create snapshot directory", self.dir.clone(), source))?;
        self.write_document(FILES_DOCUMENT, &snapshot.files).await?;
        self.write_document(NETWORK_DOCUMENT, &snapshot.network)
            .await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> SnapshotResult<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(io("read snapshot", path.to_path_buf(), source)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| json("parse snapshot", path.to_path_buf(), source))
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

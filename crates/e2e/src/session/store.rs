//! Durable storage for session state blobs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// A state blob as read back from storage
#[derive(Debug, Clone)]
pub struct PersistedState {
    pub bytes: Vec<u8>,
    /// Last write time, used to judge staleness
    pub modified_at: DateTime<Utc>,
}

/// Storage for one opaque state blob per profile
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stable identifier of the profile's slot (e.g. a file path)
    fn location(&self, key: &str) -> String;

    async fn load(&self, key: &str) -> E2eResult<Option<PersistedState>>;

    /// Overwrite the slot wholesale, returning the new modification time
    async fn save(&self, key: &str, bytes: &[u8]) -> E2eResult<DateTime<Utc>>;

    /// Remove the slot. Removing a missing slot is not an error.
    async fn remove(&self, key: &str) -> E2eResult<()>;
}

/// One `<key>.json` file per profile under a directory
///
/// Writes go to a temp file in the same directory and are renamed into
/// place, so concurrent readers see either the old or the new blob.
/// Concurrent writers: last one wins.
#[derive(Debug, Clone)]
pub struct FsSessionStore {
    dir: PathBuf,
}

impl FsSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl SessionStore for FsSessionStore {
    fn location(&self, key: &str) -> String {
        self.path_for(key).to_string_lossy().into_owned()
    }

    async fn load(&self, key: &str) -> E2eResult<Option<PersistedState>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(E2eError::StateCorruption {
                    location: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };
        let modified_at = tokio::fs::metadata(&path).await?.modified()?.into();

        Ok(Some(PersistedState { bytes, modified_at }))
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> E2eResult<DateTime<Utc>> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let dir = self.dir.clone();
        let path = self.path_for(key);
        let bytes = bytes.to_vec();

        // Temp file write, sync and rename all block.
        let written = tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &bytes))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

        debug!("Persisted session state to {}", written.display());
        Ok(tokio::fs::metadata(&written).await?.modified()?.into())
    }

    async fn remove(&self, key: &str) -> E2eResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `bytes` to a temp file in `dir`, sync it and rename it over `path`
fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> E2eResult<PathBuf> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| E2eError::Io(e.error))?;
    Ok(path.to_path_buf())
}

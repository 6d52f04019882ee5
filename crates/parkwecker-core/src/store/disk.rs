//! File-backed cache generations.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<generation>/<sha256(key)>.entry   JSON header line, then raw body
//! <root>/<generation>/complete.json         written last by a finished install
//! ```
//!
//! Every file is written to a temp name and renamed into place, so a reader
//! sees either the previous entry or the new one, never a mix of the two.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use super::{Cache, CacheStorage, CachedEntry};
use crate::error::{StoreError, StoreResult};
use crate::http::{CacheKey, Response};

const ENTRY_EXT: &str = "entry";
const COMPLETE_FILE: &str = "complete.json";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File name of the entry stored under `key`.
pub(crate) fn entry_file_name(key: &CacheKey) -> String {
    format!(
        "{}.{}",
        hex::encode(Sha256::digest(key.as_str().as_bytes())),
        ENTRY_EXT
    )
}

fn validate_name(name: &str) -> StoreResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.starts_with('.');
    if invalid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Header line, newline, body. Compact JSON never contains a raw newline.
fn encode_entry(entry: &CachedEntry) -> StoreResult<Vec<u8>> {
    let mut contents = serde_json::to_vec(entry)?;
    contents.push(b'\n');
    contents.extend_from_slice(&entry.response.body);
    Ok(contents)
}

fn decode_entry(path: &Path, contents: &[u8]) -> StoreResult<CachedEntry> {
    let split = contents
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(contents.len());
    let mut entry: CachedEntry = serde_json::from_slice(&contents[..split])
        .map_err(|e| StoreError::Corrupt(path.display().to_string(), e))?;
    entry.response.body = contents
        .get(split + 1..)
        .map(<[u8]>::to_vec)
        .unwrap_or_default();
    Ok(entry)
}

/// Write `contents` next to `path` under a unique temp name.
async fn stage(path: &Path, contents: &[u8]) -> StoreResult<PathBuf> {
    let tmp = path.with_extension(format!(
        "tmp-{}-{}",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    if let Err(e) = fs::write(&tmp, contents).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StoreError::io(&tmp, e));
    }
    Ok(tmp)
}

async fn commit(tmp: &Path, path: &Path) -> StoreResult<()> {
    if let Err(e) = fs::rename(tmp, path).await {
        let _ = fs::remove_file(tmp).await;
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

async fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (tmp, _) in staged {
        let _ = fs::remove_file(tmp).await;
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> StoreResult<()> {
    let tmp = stage(path, contents).await?;
    commit(&tmp, path).await
}

#[derive(Debug, Serialize, Deserialize)]
struct CompleteMarker {
    completed_at: DateTime<Utc>,
}

/// One generation directory.
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(entry_file_name(key))
    }

    async fn load(&self, path: &Path) -> StoreResult<Option<CachedEntry>> {
        match fs::read(path).await {
            Ok(contents) => decode_entry(path, &contents).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn ensure_dir(&self) -> StoreResult<()> {
        // Generation may have been deleted under us; recreate like open() would
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))
    }
}

#[async_trait]
impl Cache for DiskCache {
    async fn match_request(&self, key: &CacheKey) -> StoreResult<Option<Response>> {
        let entry = self.load(&self.entry_path(key)).await?;
        // Guard against digest collisions
        Ok(entry
            .filter(|entry| &entry.key == key)
            .map(|entry| entry.response))
    }

    async fn put(&self, key: CacheKey, response: Response) -> StoreResult<()> {
        let entry = CachedEntry::new(key, response);
        let contents = encode_entry(&entry)?;
        self.ensure_dir().await?;
        write_atomic(&self.entry_path(&entry.key), &contents).await?;
        debug!(key = %entry.key, dir = %self.dir.display(), "Stored cache entry");
        Ok(())
    }

    /// Stages the whole batch before renaming anything into place. A failure
    /// while staging leaves the generation untouched; a failure while
    /// renaming drops the rest of the batch.
    async fn put_all(&self, entries: Vec<(CacheKey, Response)>) -> StoreResult<()> {
        let prepared = entries
            .into_iter()
            .map(|(key, response)| {
                let entry = CachedEntry::new(key, response);
                encode_entry(&entry).map(|contents| (self.entry_path(&entry.key), contents))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        self.ensure_dir().await?;
        let mut staged = Vec::with_capacity(prepared.len());
        for (path, contents) in prepared {
            match stage(&path, &contents).await {
                Ok(tmp) => staged.push((tmp, path)),
                Err(e) => {
                    discard(&staged).await;
                    return Err(e);
                }
            }
        }

        for (i, (tmp, path)) in staged.iter().enumerate() {
            if let Err(e) = commit(tmp, path).await {
                discard(&staged[i + 1..]).await;
                return Err(e);
            }
        }
        debug!(dir = %self.dir.display(), entries = staged.len(), "Stored cache batch");
        Ok(())
    }

    async fn delete_entry(&self, key: &CacheKey) -> StoreResult<bool> {
        let path = self.entry_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    async fn entries(&self) -> StoreResult<Vec<CachedEntry>> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut entries = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            match self.load(&path).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry"),
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn mark_complete(&self) -> StoreResult<()> {
        let marker = serde_json::to_vec_pretty(&CompleteMarker {
            completed_at: Utc::now(),
        })?;
        self.ensure_dir().await?;
        write_atomic(&self.dir.join(COMPLETE_FILE), &marker).await
    }

    async fn is_complete(&self) -> StoreResult<bool> {
        let path = self.dir.join(COMPLETE_FILE);
        fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))
    }
}

/// `CacheStorage` rooted at a directory, one subdirectory per generation.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    pub fn new(root: PathBuf) -> StoreResult<Self> {
        std::fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, name: &str) -> StoreResult<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn Cache>> {
        let dir = self.generation_dir(name)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        Ok(Arc::new(DiskCache { dir }))
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;

        let mut names = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let is_dir = item
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(name) = item.file_name().to_str() {
                if validate_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        let dir = self.generation_dir(name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }
}

//! Durable storage of analysis results.
//!
//! The file holds `{"cached_at": <RFC 3339>, "result": <CorpusAggregate>}`.
//! Writes go to a uniquely named, fsynced sibling file that is renamed over
//! the target, so readers see either the old or the new file, never a partial
//! one, even when the server and the CLI write the same path.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::CacheIoError;
use crate::models::CorpusAggregate;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PersistedResult {
    pub cached_at: DateTime<Utc>,
    pub result: CorpusAggregate,
}

#[derive(Serialize)]
struct PersistedResultRef<'a> {
    cached_at: DateTime<Utc>,
    result: &'a CorpusAggregate,
}

/// Hidden sibling of `path`, unique per process and per call.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("analysis_result");
    path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        Uuid::new_v4().simple()
    ))
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Writes `bytes` to `path` through a synced temporary file and a rename,
/// then syncs the parent directory on a best-effort basis.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheIoError> {
    let write_err = |source| CacheIoError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent).await.map_err(write_err)?;

    let tmp = temp_path(path);
    let written = match write_synced(&tmp, bytes).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(e));
    }

    if let Ok(dir) = tokio::fs::File::open(parent).await {
        let _ = dir.sync_all().await;
    }
    Ok(())
}

pub async fn save(
    path: &Path,
    cached_at: DateTime<Utc>,
    aggregate: &CorpusAggregate,
) -> Result<(), CacheIoError> {
    let bytes = serde_json::to_vec_pretty(&PersistedResultRef {
        cached_at,
        result: aggregate,
    })
    .map_err(CacheIoError::Encode)?;
    write_atomic(path, &bytes).await
}

/// Loads a saved result. A missing file is `Ok(None)`.
pub async fn load(path: &Path) -> Result<Option<PersistedResult>, CacheIoError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CacheIoError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| CacheIoError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// Deletes the saved result. A missing file is not an error.
pub async fn remove(path: &Path) -> Result<(), CacheIoError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CacheIoError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("result.json");
        let cached_at = Utc::now();

        save(&path, cached_at, &CorpusAggregate::empty()).await.unwrap();
        let loaded = load(&path).await.unwrap().unwrap();

        assert_eq!(loaded.result, CorpusAggregate::empty());
        assert_eq!(loaded.cached_at, cached_at);
        assert_eq!(leftover_temp_files(&path).await, 0);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.json")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        tokio::fs::write(&path, b"{\"cached_at\": 12").await.unwrap();

        assert!(matches!(load(&path).await, Err(CacheIoError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        tokio::fs::write(&path, b"old").await.unwrap();

        write_atomic(&path, b"new").await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        tokio::fs::write(&path, b"{}").await.unwrap();

        remove(&path).await.unwrap();
        remove(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_path_is_unique_hidden_sibling() {
        let target = Path::new("/var/cache/analysis_result.json");
        let first = temp_path(target);
        let second = temp_path(target);

        assert_ne!(first, second);
        assert_eq!(first.parent(), target.parent());
        let name = first.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(&format!(".analysis_result.json.tmp.{}.", std::process::id())));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_never_publish_mixed_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![b'a' + i; 256 * 1024]).collect();

        let handles: Vec<_> = payloads
            .iter()
            .cloned()
            .map(|bytes| {
                let path = path.clone();
                tokio::spawn(async move { write_atomic(&path, &bytes).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let written = tokio::fs::read(&path).await.unwrap();
        assert!(payloads.contains(&written));
        assert_eq!(leftover_temp_files(&path).await, 0);
    }

    async fn leftover_temp_files(path: &Path) -> usize {
        let mut entries = tokio::fs::read_dir(path.parent().unwrap()).await.unwrap();
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_name().to_string_lossy().contains(".tmp.") {
                count += 1;
            }
        }
        count
    }
}

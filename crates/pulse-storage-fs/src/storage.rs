//! File-per-job storage backend.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use pulse_core::{Job, JobSnapshot, JobStorage, JobStream, StorageError, validate_job_id};
use tokio::fs;
use tracing::{debug, trace};

use crate::locks::PathLocks;

const EXTENSION: &str = "json";

/// Job storage in a directory of JSON files.
///
/// Directory layout:
/// ```text
/// root/
///     ├── {id}.json
///     └── {id}.json.tmp   (only while a write is in flight)
/// ```
///
/// Each `get` loads a fresh entity from disk; jobs are not shared between
/// callers the way the in-memory backend shares them.
pub struct FileSystemStorage {
    root: PathBuf,
    locks: Arc<PathLocks>,
}

impl FileSystemStorage {
    /// Open (and create if needed) a storage directory with its own lock
    /// registry.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::with_locks(root, Arc::new(PathLocks::new())).await
    }

    /// Open a storage directory that shares `locks` with other instances.
    pub async fn with_locks(
        root: impl Into<PathBuf>,
        locks: Arc<PathLocks>,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!("FileSystemStorage initialized at {:?}", root);
        Ok(Self { root, locks })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks(&self) -> &Arc<PathLocks> {
        &self.locks
    }

    /// File of job `id`. `None` for ids that are not a plain file name, so
    /// no lookup can leave the root directory.
    fn job_path(&self, id: &str) -> Option<PathBuf> {
        if let Err(err) = validate_job_id(id) {
            trace!("Ignoring job lookup: {}", err);
            return None;
        }
        Some(self.root.join(format!("{id}.{EXTENSION}")))
    }

    /// Load a job file under its path lock. `None` if the file is gone.
    async fn load(&self, path: &Path) -> Result<Option<Arc<Job>>, StorageError> {
        let lock = self.locks.lock_for(path)?;
        let _guard = lock.lock().await;
        read_job(path).await.map(|job| job.map(Arc::new))
    }

    /// Write under the path lock when `should_write` holds for the current
    /// existence of the file.
    async fn write_if(
        &self,
        job: &Job,
        should_write: impl FnOnce(bool) -> bool,
    ) -> Result<bool, StorageError> {
        let Some(path) = self.job_path(job.id()) else {
            return Ok(false);
        };
        let lock = self.locks.lock_for(&path)?;
        let _guard = lock.lock().await;

        let exists = fs::try_exists(&path).await?;
        if !should_write(exists) {
            return Ok(false);
        }
        write_job(&path, job).await?;
        Ok(true)
    }
}

#[async_trait]
impl JobStorage for FileSystemStorage {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn get(&self, id: &str) -> Result<Option<Arc<Job>>, StorageError> {
        let Some(path) = self.job_path(id) else {
            return Ok(None);
        };
        let lock = self.locks.lock_for(&path)?;
        let _guard = lock.lock().await;

        // Read, touch and write back under one lock so a concurrent status
        // write is never replaced by the stale copy.
        let Some(job) = read_job(&path).await? else {
            return Ok(None);
        };
        job.mark_accessed();
        write_job(&path, &job).await?;
        Ok(Some(Arc::new(job)))
    }

    async fn remove(&self, id: &str) -> Result<Option<Arc<Job>>, StorageError> {
        let Some(path) = self.job_path(id) else {
            return Ok(None);
        };
        let lock = self.locks.lock_for(&path)?;
        let _guard = lock.lock().await;

        let Some(job) = read_job(&path).await? else {
            return Ok(None);
        };
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        debug!("Deleted job file {:?}", path);
        Ok(Some(Arc::new(job)))
    }

    async fn try_add(&self, job: &Arc<Job>) -> Result<bool, StorageError> {
        self.write_if(job, |exists| !exists).await
    }

    async fn try_update(&self, job: &Arc<Job>) -> Result<bool, StorageError> {
        self.write_if(job, |exists| exists).await
    }

    fn enumerate(&self) -> JobStream<'_> {
        let entries = stream::once(fs::read_dir(self.root.clone()))
            .map_ok(|dir| {
                stream::try_unfold(dir, |mut dir| async move {
                    Ok::<_, io::Error>(dir.next_entry().await?.map(|entry| (entry, dir)))
                })
            })
            .try_flatten()
            .map_err(StorageError::from);

        entries
            .try_filter_map(move |entry| async move {
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != EXTENSION) {
                    return Ok(None);
                }
                let job = self.load(&path).await?;
                if job.is_none() {
                    trace!("Job file {:?} vanished during enumeration", path);
                }
                Ok(job)
            })
            .boxed()
    }
}

/// Read and decode one job file. `None` if it does not exist.
async fn read_job(path: &Path) -> Result<Option<Job>, StorageError> {
    let content = match fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let snapshot: JobSnapshot = serde_json::from_slice(&content)
        .map_err(|e| StorageError::corrupted(path.display().to_string(), e))?;
    Ok(Some(Job::from_snapshot(snapshot)))
}

/// Replace `path` with the job's snapshot through a temp file.
async fn write_job(path: &Path, job: &Job) -> Result<(), StorageError> {
    let content = serde_json::to_vec_pretty(&job.snapshot())?;
    let tmp = tmp_path(path);
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    trace!("Wrote job file {:?}", path);
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;

use super::*;
use pulse_core::JobStatus;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

fn new_job(id: &str) -> Arc<Job> {
    Arc::new(Job::new(id, Duration::from_secs(60)))
}

async fn file_snapshot(storage: &FileSystemStorage, id: &str) -> JobSnapshot {
    let content = fs::read(storage.job_path(id).unwrap()).await.unwrap();
    serde_json::from_slice(&content).unwrap()
}

#[tokio::test]
async fn test_add_and_reload_from_new_instance() {
    let temp_dir = TempDir::new().unwrap();
    let storage = FileSystemStorage::new(temp_dir.path()).await.unwrap();

    let job = new_job("abc");
    assert!(storage.try_add(&job).await.unwrap());
    job.set_status(&storage, JobStatus::InProgress, None).await.unwrap();
    job.set_result(&storage, json!({"rows": [1, 2]})).await.unwrap();
    job.set_execution_time(Duration::from_millis(12));
    job.set_status(&storage, JobStatus::Failed, Some("boom".to_string()))
        .await
        .unwrap();

    let reopened = FileSystemStorage::new(temp_dir.path()).await.unwrap();
    let loaded = reopened.get("abc").await.unwrap().unwrap();
    assert!(!Arc::ptr_eq(&loaded, &job));
    assert_eq!(loaded.status(), JobStatus::Failed);
    assert_eq!(loaded.error().as_deref(), Some("boom"));
    assert_eq!(loaded.result(), Some(json!({"rows": [1, 2]})));
    assert_eq!(loaded.execution_time(), Some(Duration::from_millis(12)));
    assert_eq!(loaded.created_time(), job.created_time());
    assert_eq!(loaded.expire_after(), Duration::from_secs(60));
}

#[tokio::test]
async fn test_file_layout() {
    let temp_dir = TempDir::new().unwrap();
    let storage = FileSystemStorage::new(temp_dir.path()).await.unwrap();
    storage.try_add(&new_job("abc")).await.unwrap();

    let path = temp_dir.path().join("abc.json");
    assert!(path.exists());
    assert!(!temp_dir.path().join("abc.json.tmp").exists());

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains('\n'), "document should be indented");
    assert!(content.contains("\"lastAccessTime\""));
}

#[tokio::test]
async fn test_try_add_conflict_leaves_file_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let storage = FileSystemStorage::new(temp_dir.path()).await.unwrap();

    let first = new_job("abc");
    storage.try_add(&first).await.unwrap();
    let before = file_snapshot(&storage, "abc").await;

    let second = Arc::new(Job::new("abc", Duration::from_secs(5)));
    assert!(!storage.try_add(&second).await.unwrap());
    assert_eq!(file_snapshot(&storage, "abc").await, before);
}

#[tokio::test]
async fn test_try_update_never_creates() {
    let temp_dir = TempDir::new().unwrap();
    let storage = FileSystemStorage::new(temp_dir.path()).await.unwrap();

    assert!(!storage.try_update(&new_job("abc")).await.unwrap());
    assert!(!temp_dir.path().join("abc.json").exists());
}

#[tokio::test]
async fn test_get_touches_and_persists() {
    let temp_dir = TempDir::new().unwrap();
    let storage = FileSystemStorage::new(temp_dir.path()).await.unwrap();
    let job = new_job("abc");
    storage.try_add(&job).await.unwrap();
    let before = file_snapshot(&storage, "abc").await.last_access_time;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let loaded = storage.get("abc").await.unwrap().unwrap();
    assert!(loaded.last_access_time() > before);
    assert_eq!(
        file_snapshot(&storage, "abc").await.last_access_time,
        loaded.last_access_time()
    );
}

#[tokio::test]
async fn test_remove() {
    let temp_dir = TempDir::new().unwrap();
    let storage = FileSystemStorage::new(temp_dir.path()).await.unwrap();
    storage.try_add(&new_job("abc")).await.unwrap();

    let removed = storage.remove("abc").await.unwrap().unwrap();
    assert_eq!(removed.id(), "abc");
    assert!(!temp_dir.path().join("abc.json").exists());
    assert!(storage.remove("abc").await.unwrap().is_none());
    assert!(storage.get("abc").await.unwrap().is_none());
}

#[tokio::test]
async fn test_malformed_file_is_corrupted() {
    let temp_dir = TempDir::new().unwrap();
    let storage = FileSystemStorage::new(temp_dir.path()).await.unwrap();
    std::fs::write(temp_dir.path().join("bad.json"), "{\"id\": \"bad\", \"sta").unwrap();

    let err = storage.get("bad").await.unwrap_err();
    assert!(matches!(err, StorageError::Corrupted { .. }), "{err}");
}

#[tokio::test]
async fn test_enumerate_only_job_files() {
    let temp_dir = TempDir::new().unwrap();
    let storage = FileSystemStorage::new(temp_dir.path()).await.unwrap();
    for id in ["a", "b", "c"] {
        storage.try_add(&new_job(id)).await.unwrap();
    }
    std::fs::write(temp_dir.path().join("d.json.tmp"), "partial").unwrap();
    std::fs::write(temp_dir.path().join("notes.txt"), "hello").unwrap();

    let mut ids: Vec<String> = storage
        .enumerate()
        .map_ok(|job| job.id().to_string())
        .try_collect()
        .await
        .unwrap();
    ids.sort();
    assert_eq!(ids, ["a", "b", "c"]);
}

#[tokio::test]
async fn test_enumerate_does_not_touch() {
    let temp_dir = TempDir::new().unwrap();
    let storage = FileSystemStorage::new(temp_dir.path()).await.unwrap();
    storage.try_add(&new_job("abc")).await.unwrap();
    let before = file_snapshot(&storage, "abc").await;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let jobs: Vec<_> = storage.enumerate().try_collect().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(file_snapshot(&storage, "abc").await, before);
}

#[tokio::test]
async fn test_enumerate_missing_root_errors() {
    let temp_dir = TempDir::new().unwrap();
    let storage = FileSystemStorage::new(temp_dir.path().join("jobs")).await.unwrap();
    std::fs::remove_dir(temp_dir.path().join("jobs")).unwrap();

    let result: Result<Vec<_>, _> = storage.enumerate().try_collect().await;
    assert!(matches!(result, Err(StorageError::Io(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_never_see_partial_documents() {
    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(FileSystemStorage::new(temp_dir.path()).await.unwrap());
    let job = new_job("shared");
    storage.try_add(&job).await.unwrap();

    let writer = {
        let storage = storage.clone();
        let job = job.clone();
        tokio::spawn(async move {
            for n in 0..50 {
                let payload: Vec<u64> = (0..500).map(|i| i * n).collect();
                assert!(job.set_result(storage.as_ref(), json!(payload)).await.unwrap());
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let storage = storage.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..50 {
                let jobs: Vec<_> = storage.enumerate().try_collect().await.unwrap();
                assert_eq!(jobs.len(), 1);
                assert!(storage.get("shared").await.unwrap().is_some());
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
}

#[tokio::test]
async fn test_shared_lock_registry() {
    let temp_dir = TempDir::new().unwrap();
    let locks = Arc::new(PathLocks::new());
    let first = FileSystemStorage::with_locks(temp_dir.path(), locks.clone())
        .await
        .unwrap();
    let second = FileSystemStorage::with_locks(temp_dir.path(), locks.clone())
        .await
        .unwrap();

    first.try_add(&new_job("abc")).await.unwrap();
    assert!(second.get("abc").await.unwrap().is_some());
    assert!(!second.try_add(&new_job("abc")).await.unwrap());

    assert_eq!(locks.len(), 1);
    assert!(Arc::ptr_eq(first.locks(), second.locks()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_never_rolls_back_status() {
    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(FileSystemStorage::new(temp_dir.path()).await.unwrap());

    for round in 0..200 {
        let id = format!("job-{round}");
        let job = new_job(&id);
        storage.try_add(&job).await.unwrap();
        job.set_status(storage.as_ref(), JobStatus::InProgress, None)
            .await
            .unwrap();

        let reader = {
            let storage = storage.clone();
            let id = id.clone();
            tokio::spawn(async move { storage.get(&id).await.unwrap() })
        };
        job.set_status(storage.as_ref(), JobStatus::Success, None)
            .await
            .unwrap();
        reader.await.unwrap().unwrap();

        assert_eq!(
            file_snapshot(&storage, &id).await.status,
            JobStatus::Success,
            "round {round}"
        );
    }
}

#[tokio::test]
async fn test_ids_outside_root_are_ignored() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("jobs");
    let storage = FileSystemStorage::new(&root).await.unwrap();

    let outside = Job::new("outside", Duration::from_secs(60));
    let content = serde_json::to_vec_pretty(&outside.snapshot()).unwrap();
    std::fs::write(temp_dir.path().join("outside.json"), &content).unwrap();

    for id in ["../outside", "..", "", "a/b"] {
        assert!(storage.get(id).await.unwrap().is_none(), "{id}");
        assert!(storage.remove(id).await.unwrap().is_none(), "{id}");
    }
    let escaping = Arc::new(Job::new("../escaped", Duration::from_secs(60)));
    assert!(!storage.try_add(&escaping).await.unwrap());
    assert!(!storage.try_update(&escaping).await.unwrap());

    assert_eq!(std::fs::read(temp_dir.path().join("outside.json")).unwrap(), content);
    assert!(!temp_dir.path().join("escaped.json").exists());
}

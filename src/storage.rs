//! Storage backend selection.

use std::sync::Arc;

use pulse_config::{ConfigError, StorageBackend, StorageConfig};
use pulse_core::{InMemoryStorage, JobStorage};
use pulse_storage_fs::FileSystemStorage;
use tracing::info;

/// Open the backend named by `config.backend`.
pub(crate) async fn open_storage(
    config: &StorageConfig,
) -> Result<Arc<dyn JobStorage>, Box<dyn std::error::Error>> {
    let storage: Arc<dyn JobStorage> = match config.backend {
        StorageBackend::Memory => Arc::new(InMemoryStorage::new()),
        StorageBackend::Filesystem => {
            let path = config
                .path
                .clone()
                .ok_or_else(|| ConfigError::MissingField("storage.path".to_string()))?;
            info!("Using filesystem storage at {}", path.display());
            Arc::new(FileSystemStorage::new(path).await?)
        }
        StorageBackend::Redis => open_redis(config).await?,
    };
    Ok(storage)
}

#[cfg(feature = "redis")]
async fn open_redis(
    config: &StorageConfig,
) -> Result<Arc<dyn JobStorage>, Box<dyn std::error::Error>> {
    use pulse_storage_kv::{KvStorage, RedisKv};

    let url = config
        .redis_url
        .as_deref()
        .ok_or_else(|| ConfigError::MissingField("storage.redis_url".to_string()))?;
    info!("Using Redis storage at {}", url);
    let client = RedisKv::connect(url).await?;
    Ok(Arc::new(KvStorage::new(client)))
}

#[cfg(not(feature = "redis"))]
async fn open_redis(
    _config: &StorageConfig,
) -> Result<Arc<dyn JobStorage>, Box<dyn std::error::Error>> {
    Err("the redis storage backend requires building pulse with the `redis` feature".into())
}

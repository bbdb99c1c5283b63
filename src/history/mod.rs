pub mod codec;
pub mod reducer;
pub mod repair;
pub mod session;
mod file;
mod memory;
mod redis;

pub use file::FileSnapshotStore;
pub use memory::MemorySnapshotStore;
pub use redis::RedisSnapshotStore;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use crate::cli::Args;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("snapshot serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Key-value storage for serialized history snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

pub fn default_store_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("travel-chat")
}

pub fn create_snapshot_store(
    args: &Args
) -> Result<Arc<dyn SnapshotStore>, Box<dyn Error + Send + Sync>> {
    match args.store_type.to_lowercase().as_str() {
        "file" => {
            let dir = args.store_dir
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(default_store_dir);
            Ok(Arc::new(FileSnapshotStore::new(dir)))
        }
        "memory" => Ok(Arc::new(MemorySnapshotStore::default())),
        "redis" => {
            let store = RedisSnapshotStore::new(
                &args.store_redis_url,
                args.store_redis_prefix.clone()
            )?;
            Ok(Arc::new(store))
        }
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported snapshot store type: {}", args.store_type)
                    )
                )
            ),
    }
}

pub fn initialize_snapshot_store(
    args: &Args
) -> Result<Arc<dyn SnapshotStore>, Box<dyn Error + Send + Sync>> {
    info!("Chat history will be stored in: {} under key '{}'", args.store_type, args.store_key);
    create_snapshot_store(args)
}

use async_trait::async_trait;
use crate::history::{ SnapshotStore, StoreError };
use redis::{ Client, AsyncCommands };

pub struct RedisSnapshotStore {
    client: Client,
    key_prefix: String,
}

impl RedisSnapshotStore {
    pub fn new(url: &str, key_prefix: String) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(url)?,
            key_prefix,
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl SnapshotStore for RedisSnapshotStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(self.full_key(key)).await?;
        Ok(value)
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let _: () = conn.set(self.full_key(key), value).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let _: i64 = conn.del(self.full_key(key)).await?;
        Ok(())
    }
}

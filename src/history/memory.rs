use async_trait::async_trait;
use crate::history::{ SnapshotStore, StoreError };
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-local store. Also counts writes, which tests use to observe debouncing.
#[derive(Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<String, String>>,
    writes: Mutex<usize>,
}

impl MemorySnapshotStore {
    pub fn with_entry(key: &str, value: &str) -> Self {
        let store = Self::default();
        store.lock_entries().insert(key.to_string(), value.to_string());
        store
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock_entries().get(key).cloned()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_write(&self) {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock_entries().insert(key.to_string(), value.to_string());
        self.record_write();
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock_entries().remove(key);
        self.record_write();
        Ok(())
    }
}

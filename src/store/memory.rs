//! In-process key-value backend.
//!
//! Mirrors the etcd directory semantics closely enough for the datastore:
//! a key "exists" as a directory when any key lives beneath it, and deleting
//! a directory removes its whole subtree.

use super::KvBackend;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Map-backed [`KvBackend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
    writes: Mutex<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored key in order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Returns a stored value without going through the async trait.
    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    /// Number of `put` calls served so far.
    pub fn write_count(&self) -> u64 {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn in_subtree(candidate: &str, dir: &str) -> bool {
    candidate == dir
        || candidate
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|k, _| !in_subtree(k, key));
        Ok(entries.len() != before)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock().keys().any(|k| in_subtree(k, key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_semantics() {
        let backend = MemoryBackend::new();
        backend.put("/a/b/c", "1").await.unwrap();
        backend.put("/a/bc", "2").await.unwrap();

        assert!(backend.exists("/a/b").await.unwrap());
        assert!(backend.delete("/a/b").await.unwrap());
        assert!(!backend.exists("/a/b").await.unwrap());
        assert_eq!(backend.get("/a/bc").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_delete_absent() {
        let backend = MemoryBackend::new();
        assert!(!backend.delete("/nothing/here").await.unwrap());
    }
}

//! Small JSON documents under `metadata/`: reference tables, caches and the
//! seen/missing registries.
//!
//! Documents are tiny and read often; bulk operations fan out over a bounded
//! worker pool and single reads go through the fixed-interval retry policy,
//! which is all the defense the store's occasional contention needs.

use anyhow::{Context, Result};
use futures::{stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::Platform;
use crate::retry::RetryPolicy;

/// Workers for bulk get/set/delete across many keys.
const BULK_CONCURRENCY: usize = 50;

#[derive(Clone)]
pub struct DocStore {
    platform: Arc<dyn Platform>,
    retry: RetryPolicy,
}

impl DocStore {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            retry: RetryPolicy::docstore(),
        }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn read<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let bytes = self.platform.read(path)?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing document {path}"))
    }

    /// Absent documents come back as the type's default; the registries all
    /// start life empty.
    pub fn read_or_default<T: DeserializeOwned + Default>(&self, path: &str) -> Result<T> {
        if !self.platform.exists(path) {
            return Ok(T::default());
        }
        self.read(path)
    }

    pub async fn read_with_retry<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let store = self.clone();
        let path_owned = path.to_string();
        self.retry
            .run(path, move || {
                let store = store.clone();
                let path = path_owned.clone();
                async move {
                    tokio::task::spawn_blocking(move || store.read::<T>(&path))
                        .await
                        .context("docstore read task panicked")?
                }
            })
            .await
    }

    pub fn write<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        let bytes =
            serde_json::to_vec(value).with_context(|| format!("serializing document {path}"))?;
        self.platform.write(path, &bytes)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.platform.exists(path)
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.platform.delete(path)
    }

    /// Read many documents in parallel; a failed key maps to `None`.
    pub async fn read_many(&self, paths: &[String]) -> HashMap<String, Option<Value>> {
        let results: Vec<(String, Option<Value>)> = stream::iter(paths.iter().cloned())
            .map(|path| {
                let store = self.clone();
                async move {
                    let value = store.read_with_retry::<Value>(&path).await;
                    match value {
                        Ok(v) => (path, Some(v)),
                        Err(e) => {
                            tracing::warn!(path, error = %e, "document read failed");
                            (path, None)
                        }
                    }
                }
            })
            .buffer_unordered(BULK_CONCURRENCY)
            .collect()
            .await;
        results.into_iter().collect()
    }

    /// Delete every document under a directory, fanning out over the pool.
    pub async fn delete_collection(&self, dir: &str) -> Result<()> {
        let names = self.platform.list_dir(dir)?;
        let paths: Vec<String> = names.into_iter().map(|n| format!("{dir}/{n}")).collect();
        let failures: Vec<String> = stream::iter(paths)
            .map(|path| {
                let store = self.clone();
                async move {
                    let outcome = tokio::task::spawn_blocking({
                        let store = store.clone();
                        let path = path.clone();
                        move || store.delete(&path)
                    })
                    .await;
                    match outcome {
                        Ok(Ok(())) => None,
                        _ => Some(path),
                    }
                }
            })
            .buffer_unordered(BULK_CONCURRENCY)
            .filter_map(|x| async move { x })
            .collect()
            .await;
        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("failed to delete documents: {failures:?}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalPlatform;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, DocStore) {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(LocalPlatform::new(dir.path()));
        (dir, DocStore::new(platform))
    }

    #[test]
    fn roundtrips_json_documents() {
        let (_dir, store) = store();
        store
            .write("metadata/seen.json", &json!({"2026-09-10 19:30": 101}))
            .unwrap();
        let back: Value = store.read("metadata/seen.json").unwrap();
        assert_eq!(back["2026-09-10 19:30"], 101);
    }

    #[test]
    fn absent_documents_default() {
        let (_dir, store) = store();
        let ids: Vec<i64> = store.read_or_default("metadata/missing.json").unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn retried_reads_deserialize_typed_documents() {
        let (_dir, store) = store();
        store.write("metadata/ids.json", &json!([1, 2, 3])).unwrap();
        let ids: Vec<i64> = store.read_with_retry("metadata/ids.json").await.unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn bulk_read_marks_failures_as_none() {
        let (_dir, store) = store();
        store.write("metadata/a.json", &json!(1)).unwrap();
        let out = store
            .read_many(&["metadata/a.json".into(), "metadata/gone.json".into()])
            .await;
        assert_eq!(out["metadata/a.json"], Some(json!(1)));
        assert_eq!(out["metadata/gone.json"], None);
    }

    #[tokio::test]
    async fn delete_collection_clears_every_document() {
        let (_dir, store) = store();
        store.write("metadata/c/a.json", &json!(1)).unwrap();
        store.write("metadata/c/b.json", &json!(2)).unwrap();
        store.delete_collection("metadata/c").await.unwrap();
        assert!(!store.exists("metadata/c/a.json"));
        assert!(!store.exists("metadata/c/b.json"));
    }
}

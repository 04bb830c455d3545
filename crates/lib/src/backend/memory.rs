//! In-process backend: pods in a map, with per-operation call counters.

use super::{BackendError, ClusterBackend, PodRecord};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Snapshot of how many times each operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub list: usize,
    pub delete: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.get + self.list + self.delete
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    pods: RwLock<BTreeMap<(String, String), PodRecord>>,
    get_calls: AtomicUsize,
    list_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pods(pods: impl IntoIterator<Item = PodRecord>) -> Self {
        let map = pods
            .into_iter()
            .map(|p| ((p.namespace.clone(), p.name.clone()), p))
            .collect();
        Self {
            pods: RwLock::new(map),
            ..Self::default()
        }
    }

    /// Add or replace a pod (keyed by namespace and name).
    pub async fn insert(&self, pod: PodRecord) {
        self.pods
            .write()
            .await
            .insert((pod.namespace.clone(), pod.name.clone()), pod);
    }

    pub async fn contains(&self, namespace: &str, name: &str) -> bool {
        self.pods
            .read()
            .await
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            get: self.get_calls.load(Ordering::SeqCst),
            list: self.list_calls.load(Ordering::SeqCst),
            delete: self.delete_calls.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl ClusterBackend for MemoryBackend {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodRecord, BackendError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.pods
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRecord>, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let pods = self.pods.read().await;
        Ok(pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.pods
            .write()
            .await
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or(BackendError::NotFound)
    }
}

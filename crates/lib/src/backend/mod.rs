//! Cluster backend: the narrow get/list/delete interface the dispatcher calls.
//!
//! `KubeApiBackend` talks to a Kubernetes API server (in cluster or via kubeconfig);
//! `MemoryBackend` keeps pods in process (tests and local dry runs).

mod kube;
mod kubeconfig;
mod memory;

pub use kube::{is_valid_object_name, KubeApiBackend};
pub use memory::{CallCounts, MemoryBackend};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One pod as seen by the bridge, independent of the backend's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
    /// Lifecycle phase (e.g. "Running", "Pending"). "Unknown" when the backend reports none.
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub images: Vec<String>,
}

impl PodRecord {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            phase: "Unknown".to_string(),
            created_at: None,
            node_name: None,
            images: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("not found")]
    NotFound,

    #[error("invalid object name: {0}")]
    InvalidName(String),

    #[error("unexpected status {0} from cluster API")]
    Status(u16),

    #[error("transport: {0}")]
    Transport(String),

    #[error("decoding response: {0}")]
    Decode(String),
}

/// Operations the dispatcher may invoke. Each call is a single request; no retries.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodRecord, BackendError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRecord>, BackendError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), BackendError>;
}

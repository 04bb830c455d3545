//! Dispatch: map a validated command to exactly one backend call.

use super::Command;
use crate::allowlist::{AllowList, CommandField};
use crate::backend::{BackendError, ClusterBackend, PodRecord};
use std::collections::HashMap;
use std::sync::Arc;

/// What a dispatched command produced. Consumers match exhaustively (see `render`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Single(PodRecord),
    Collection(Vec<PodRecord>),
    /// The command succeeded and returns nothing (delete).
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("delete requires the name of the instance to delete")]
    MissingIdentifier,

    #[error("unknown verb: {0}")]
    UnknownVerb(String),

    #[error("unknown resource: {0}")]
    UnknownResource(String),

    #[error("pod \"{name}\" not found in namespace \"{namespace}\"")]
    NotFound { namespace: String, name: String },

    /// The cause stays behind `source()`; the message is safe to show callers.
    #[error("cluster backend request failed")]
    BackendFailure(#[source] BackendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    GetPods,
    DeletePods,
}

/// Finite mapping from lowercase `(verb, resource)` to the action it performs.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    routes: HashMap<(String, String), Action>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        let mut routes = HashMap::new();
        for resource in ["pod", "pods"] {
            routes.insert(("get".to_string(), resource.to_string()), Action::GetPods);
            routes.insert(("delete".to_string(), resource.to_string()), Action::DeletePods);
        }
        Self { routes }
    }

    fn lookup(&self, verb: &str, resource: &str) -> Result<Action, DispatchError> {
        let verb_key = verb.to_lowercase();
        if !self.routes.keys().any(|(v, _)| *v == verb_key) {
            return Err(DispatchError::UnknownVerb(verb.to_string()));
        }
        self.routes
            .get(&(verb_key, resource.to_lowercase()))
            .copied()
            .ok_or_else(|| DispatchError::UnknownResource(resource.to_string()))
    }

    /// Allow-listed `(verb, resource)` pairs with no route, in allow-list order.
    /// Commands using them parse but fail at dispatch.
    pub fn unwired(&self, allowlist: &AllowList) -> Vec<(String, String)> {
        let mut gaps = Vec::new();
        for verb in allowlist.values(CommandField::Verb) {
            for resource in allowlist.values(CommandField::Resource) {
                if self.lookup(verb, resource).is_err() {
                    gaps.push((verb.clone(), resource.clone()));
                }
            }
        }
        gaps
    }
}

/// Executes commands against a cluster backend. Cheap to share; holds no per-request state.
pub struct Dispatcher {
    backend: Arc<dyn ClusterBackend>,
    table: DispatchTable,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn ClusterBackend>) -> Self {
        Self {
            backend,
            table: DispatchTable::new(),
        }
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Run `command` with a single backend call. Delete without an identifier is refused
    /// before the backend is touched.
    pub async fn execute(&self, command: &Command) -> Result<Outcome, DispatchError> {
        let action = self.table.lookup(command.verb(), command.resource())?;
        let namespace = command.namespace();
        log::debug!("dispatching {:?} for: {}", action, command);
        match (action, command.identifier()) {
            (Action::GetPods, Some(name)) => self
                .backend
                .get_pod(namespace, name)
                .await
                .map(Outcome::Single)
                .map_err(|e| backend_error(e, namespace, name)),
            (Action::GetPods, None) => self
                .backend
                .list_pods(namespace)
                .await
                .map(Outcome::Collection)
                .map_err(DispatchError::BackendFailure),
            (Action::DeletePods, Some(name)) => self
                .backend
                .delete_pod(namespace, name)
                .await
                .map(|()| Outcome::Empty)
                .map_err(|e| backend_error(e, namespace, name)),
            (Action::DeletePods, None) => Err(DispatchError::MissingIdentifier),
        }
    }
}

fn backend_error(err: BackendError, namespace: &str, name: &str) -> DispatchError {
    match err {
        BackendError::NotFound => DispatchError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        other => DispatchError::BackendFailure(other),
    }
}

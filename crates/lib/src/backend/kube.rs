//! Kubernetes API backend: core/v1 pods over HTTPS with a bearer token.

use super::kubeconfig;
use super::{BackendError, ClusterBackend, PodRecord};
use crate::config::{ClusterConfig, ConfigError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_NAME_LEN: usize = 253;

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<KubePod>,
}

#[derive(Debug, Deserialize)]
struct KubePod {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: Option<PodSpec>,
    #[serde(default)]
    status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default)]
    containers: Vec<Container>,
    #[serde(default)]
    node_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Container {
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
}

impl KubePod {
    fn into_record(self, namespace: &str) -> PodRecord {
        let spec = self.spec.unwrap_or_default();
        PodRecord {
            name: self.metadata.name,
            namespace: self.metadata.namespace.unwrap_or_else(|| namespace.to_string()),
            phase: self
                .status
                .and_then(|s| s.phase)
                .unwrap_or_else(|| "Unknown".to_string()),
            created_at: self.metadata.creation_timestamp,
            node_name: spec.node_name,
            images: spec.containers.into_iter().filter_map(|c| c.image).collect(),
        }
    }
}

/// Where the bearer token comes from.
#[derive(Debug, Clone)]
enum Token {
    None,
    Static(String),
    /// Re-read per request; projected service account tokens rotate on disk.
    File(PathBuf),
}

/// Object names Kubernetes accepts: lowercase RFC 1123 subdomain (alphanumerics, '-' and '.',
/// starting and ending with an alphanumeric, at most 253 characters).
pub fn is_valid_object_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    !bytes.is_empty()
        && bytes.len() <= MAX_NAME_LEN
        && bytes.first().is_some_and(alnum)
        && bytes.last().is_some_and(alnum)
        && bytes.iter().all(|b| alnum(b) || *b == b'-' || *b == b'.')
}

fn check_name(name: &str) -> Result<(), BackendError> {
    if is_valid_object_name(name) {
        Ok(())
    } else {
        Err(BackendError::InvalidName(name.to_string()))
    }
}

pub struct KubeApiBackend {
    base: Url,
    token: Token,
    client: reqwest::Client,
}

impl KubeApiBackend {
    /// Build a backend from config. Order: explicit `apiServer`, explicit `kubeconfig`, the
    /// in-cluster service account, then `KUBECONFIG` or `~/.kube/config`. Failing here is
    /// fatal for startup.
    pub fn from_config(cluster: &ClusterConfig) -> Result<Self, ConfigError> {
        let source = select_source(
            cluster,
            std::env::var_os("KUBERNETES_SERVICE_HOST").is_some(),
            std::env::var("KUBECONFIG").ok().as_deref(),
            dirs::home_dir().as_deref(),
        )?;
        match source {
            Source::ApiServer(server) => {
                let token = match &cluster.token_file {
                    Some(p) => Token::File(p.clone()),
                    None => Token::None,
                };
                let ca = cluster.ca_file.as_deref().map(read_file).transpose()?;
                Self::build(&server, token, ca, None, cluster.insecure_skip_tls_verify)
            }
            Source::InCluster => Self::in_cluster(),
            Source::Kubeconfig(path) => Self::from_kubeconfig(&path, cluster.context.as_deref()),
        }
    }

    /// Connect with a kubeconfig context (`current-context` when `context` is None).
    pub fn from_kubeconfig(path: &Path, context: Option<&str>) -> Result<Self, ConfigError> {
        let target = kubeconfig::load(path, context)?;
        log::info!(
            "using kubeconfig {} for {}",
            path.display(),
            target.server
        );
        let token = match (target.token, target.token_file) {
            (Some(t), _) => Token::Static(t),
            (None, Some(p)) => Token::File(p),
            (None, None) => Token::None,
        };
        Self::build(
            &target.server,
            token,
            target.ca_pem,
            target.identity_pem,
            target.insecure_skip_tls_verify,
        )
    }

    /// Use `KUBERNETES_SERVICE_HOST`/`KUBERNETES_SERVICE_PORT` and the mounted service account.
    pub fn in_cluster() -> Result<Self, ConfigError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            ConfigError::Cluster(
                "not running in a cluster (KUBERNETES_SERVICE_HOST unset) and cluster.apiServer not configured"
                    .to_string(),
            )
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        // IPv6 service hosts need brackets in the authority
        let server = if host.contains(':') {
            format!("https://[{}]:{}", host, port)
        } else {
            format!("https://{}:{}", host, port)
        };
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let ca = read_file(&dir.join("ca.crt"))?;
        log::info!("using in-cluster service account for {}", server);
        Self::build(&server, Token::File(dir.join("token")), Some(ca), None, false)
    }

    /// Plain constructor (tests, or API servers reached through a local proxy).
    pub fn new(api_server: &str, token: Option<String>) -> Result<Self, ConfigError> {
        let token = token.map(Token::Static).unwrap_or(Token::None);
        Self::build(api_server, token, None, None, false)
    }

    fn build(
        api_server: &str,
        token: Token,
        ca_pem: Option<Vec<u8>>,
        identity_pem: Option<Vec<u8>>,
        insecure: bool,
    ) -> Result<Self, ConfigError> {
        let base = Url::parse(api_server)
            .map_err(|e| ConfigError::Cluster(format!("invalid apiServer {}: {}", api_server, e)))?;
        if base.cannot_be_a_base() {
            return Err(ConfigError::Cluster(format!("invalid apiServer {}", api_server)));
        }
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(CONNECT_TIMEOUT);
        if let Some(pem) = ca_pem {
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| ConfigError::Cluster(format!("reading CA bundle: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(pem) = identity_pem {
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| ConfigError::Cluster(format!("reading client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }
        if insecure {
            log::warn!("TLS verification disabled for cluster API {}", api_server);
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| ConfigError::Cluster(format!("building HTTP client: {}", e)))?;
        Ok(Self {
            base,
            token,
            client,
        })
    }

    /// `{base}/api/v1/namespaces/{namespace}/pods[/{name}]`, each segment percent-encoded.
    fn pods_url(&self, namespace: &str, name: Option<&str>) -> Result<Url, BackendError> {
        check_name(namespace)?;
        if let Some(n) = name {
            check_name(n)?;
        }
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| BackendError::Transport("API server URL cannot be a base".to_string()))?;
            segments
                .pop_if_empty()
                .extend(["api", "v1", "namespaces", namespace, "pods"]);
            if let Some(n) = name {
                segments.push(n);
            }
        }
        Ok(url)
    }

    async fn bearer(&self) -> Result<Option<String>, BackendError> {
        match &self.token {
            Token::None => Ok(None),
            Token::Static(t) => Ok(Some(t.clone())),
            Token::File(path) => {
                let t = tokio::fs::read_to_string(path).await.map_err(|e| {
                    BackendError::Transport(format!("reading token {}: {}", path.display(), e))
                })?;
                Ok(Some(t.trim().to_string()))
            }
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let req = match self.bearer().await? {
            Some(t) => req.bearer_auth(t),
            None => req,
        };
        let res = req
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        match res.status() {
            s if s.is_success() => Ok(res),
            StatusCode::NOT_FOUND => Err(BackendError::NotFound),
            s => Err(BackendError::Status(s.as_u16())),
        }
    }
}

/// Where cluster connection details come from.
#[derive(Debug, PartialEq, Eq)]
enum Source {
    ApiServer(String),
    InCluster,
    Kubeconfig(PathBuf),
}

fn select_source(
    cluster: &ClusterConfig,
    in_cluster: bool,
    kubeconfig_env: Option<&str>,
    home: Option<&Path>,
) -> Result<Source, ConfigError> {
    if let Some(server) = &cluster.api_server {
        return Ok(Source::ApiServer(server.clone()));
    }
    if let Some(path) = &cluster.kubeconfig {
        return Ok(Source::Kubeconfig(path.clone()));
    }
    if in_cluster {
        return Ok(Source::InCluster);
    }
    kubeconfig::kubeconfig_path(None, kubeconfig_env, home)
        .map(Source::Kubeconfig)
        .ok_or_else(|| {
            ConfigError::Cluster(
                "not running in a cluster and no kubeconfig found; set cluster.apiServer or cluster.kubeconfig"
                    .to_string(),
            )
        })
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl ClusterBackend for KubeApiBackend {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodRecord, BackendError> {
        let url = self.pods_url(namespace, Some(name))?;
        let res = self.send(self.client.get(url)).await?;
        let pod: KubePod = res
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(pod.into_record(namespace))
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRecord>, BackendError> {
        let url = self.pods_url(namespace, None)?;
        let res = self.send(self.client.get(url)).await?;
        let list: PodList = res
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(list
            .items
            .into_iter()
            .map(|p| p.into_record(namespace))
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        let url = self.pods_url(namespace, Some(name))?;
        self.send(self.client.delete(url)).await?;
        Ok(())
    }
}

//! Kubeconfig reader for running outside a cluster.
//!
//! Resolves the selected context (or `current-context`) to its cluster and user entries.
//! Supports bearer tokens, token files and client certificates, inline (`*-data`) or as
//! paths relative to the kubeconfig file. Exec plugins and auth providers are rejected.

use crate::config::ConfigError;
use base64::Engine;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeconfigFile {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    #[serde(default)]
    certificate_authority: Option<PathBuf>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    token_file: Option<PathBuf>,
    #[serde(default)]
    client_certificate: Option<PathBuf>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key: Option<PathBuf>,
    #[serde(default)]
    client_key_data: Option<String>,
    #[serde(default)]
    exec: Option<serde_yaml::Value>,
    #[serde(default)]
    auth_provider: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

/// Connection details for one kubeconfig context.
#[derive(Debug, Default)]
pub struct KubeconfigTarget {
    pub server: String,
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
    pub token: Option<String>,
    pub token_file: Option<PathBuf>,
    /// Client certificate followed by its private key, both PEM.
    pub identity_pem: Option<Vec<u8>>,
}

/// Kubeconfig location: explicit path, else the first `KUBECONFIG` entry, else `~/.kube/config`.
pub fn kubeconfig_path(
    explicit: Option<&Path>,
    kubeconfig_env: Option<&str>,
    home: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }
    if let Some(first) = kubeconfig_env
        .and_then(|v| std::env::split_paths(v).find(|p| !p.as_os_str().is_empty()))
    {
        return Some(first);
    }
    home.map(|h| h.join(".kube").join("config"))
}

/// Read `path` and resolve `context` (or `current-context`).
pub fn load(path: &Path, context: Option<&str>) -> Result<KubeconfigTarget, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    from_str(&s, base_dir, context)
        .map_err(|e| ConfigError::Cluster(format!("kubeconfig {}: {}", path.display(), e)))
}

fn from_str(s: &str, base_dir: &Path, context: Option<&str>) -> Result<KubeconfigTarget, String> {
    let file: KubeconfigFile = serde_yaml::from_str(s).map_err(|e| e.to_string())?;
    let context_name = context
        .map(str::to_string)
        .or(file.current_context)
        .filter(|c| !c.is_empty())
        .ok_or("no context selected and current-context is unset")?;
    let ctx = file
        .contexts
        .iter()
        .find(|c| c.name == context_name)
        .ok_or_else(|| format!("context {:?} not found", context_name))?;
    let cluster = file
        .clusters
        .iter()
        .find(|c| c.name == ctx.context.cluster)
        .map(|c| &c.cluster)
        .ok_or_else(|| format!("cluster {:?} not found", ctx.context.cluster))?;
    let user = match &ctx.context.user {
        Some(name) => Some(
            file.users
                .iter()
                .find(|u| &u.name == name)
                .map(|u| &u.user)
                .ok_or_else(|| format!("user {:?} not found", name))?,
        ),
        None => None,
    };

    let mut target = KubeconfigTarget {
        server: cluster.server.clone(),
        ca_pem: pem_source(
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
            base_dir,
        )?,
        insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
        ..KubeconfigTarget::default()
    };

    let Some(user) = user else {
        return Ok(target);
    };
    if user.exec.is_some() || user.auth_provider.is_some() {
        return Err(format!(
            "user {:?} uses an exec plugin or auth provider, which is not supported; use a token or client certificate",
            ctx.context.user.as_deref().unwrap_or_default()
        ));
    }
    target.token = user.token.clone().filter(|t| !t.trim().is_empty());
    target.token_file = user.token_file.as_deref().map(|p| relative_to(base_dir, p));

    let cert = pem_source(
        user.client_certificate_data.as_deref(),
        user.client_certificate.as_deref(),
        base_dir,
    )?;
    let key = pem_source(
        user.client_key_data.as_deref(),
        user.client_key.as_deref(),
        base_dir,
    )?;
    target.identity_pem = match (cert, key) {
        (Some(mut cert), Some(key)) => {
            if !cert.ends_with(b"\n") {
                cert.push(b'\n');
            }
            cert.extend_from_slice(&key);
            Some(cert)
        }
        (None, None) => None,
        _ => return Err("client certificate and client key must be set together".to_string()),
    };
    Ok(target)
}

/// Inline base64 data wins over a file path.
fn pem_source(
    data: Option<&str>,
    file: Option<&Path>,
    base_dir: &Path,
) -> Result<Option<Vec<u8>>, String> {
    if let Some(d) = data.filter(|d| !d.trim().is_empty()) {
        return base64::engine::general_purpose::STANDARD
            .decode(d.trim())
            .map(Some)
            .map_err(|e| format!("decoding inline certificate data: {}", e));
    }
    match file {
        Some(p) => {
            let p = relative_to(base_dir, p);
            std::fs::read(&p)
                .map(Some)
                .map_err(|e| format!("reading {}: {}", p.display(), e))
        }
        None => Ok(None),
    }
}

fn relative_to(base_dir: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

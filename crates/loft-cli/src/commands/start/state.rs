//! What is already deployed, and the admin password for this run.

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::cluster::ClusterApi;
use crate::{Error, Result};

/// Name of the loft deployment and its helm chart.
pub const LOFT_DEPLOYMENT: &str = "loft";
/// Ingress created by the chart when installed with a host.
pub const LOFT_INGRESS: &str = "loft-ingress";

/// Existing loft installation, as observed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentState {
    Absent,
    /// Installed without an ingress, reachable only through a tunnel
    PresentLocal,
    /// Installed behind `loft-ingress`
    PresentRemote,
}

pub async fn detect_state(cluster: &dyn ClusterApi, namespace: &str) -> Result<DeploymentState> {
    let deployment = cluster
        .get_deployment(namespace, LOFT_DEPLOYMENT)
        .await
        .map_err(|e| Error::Other(format!("error accessing kubernetes cluster: {}", e)))?;
    if deployment.is_none() {
        debug!(namespace, "no loft deployment found");
        return Ok(DeploymentState::Absent);
    }

    let state = match cluster.get_ingress(namespace, LOFT_INGRESS).await? {
        Some(_) => DeploymentState::PresentRemote,
        None => DeploymentState::PresentLocal,
    };
    info!("Found an existing loft installation");
    Ok(state)
}

/// Host of the first rule of `loft-ingress`.
pub async fn ingress_host(cluster: &dyn ClusterApi, namespace: &str) -> Result<String> {
    let missing = || {
        Error::Other(format!(
            "couldn't find any host in loft ingress '{}/{}', please make sure you have not changed any deployed resources",
            namespace, LOFT_INGRESS
        ))
    };

    let ingress = cluster
        .get_ingress(namespace, LOFT_INGRESS)
        .await?
        .ok_or_else(missing)?;

    ingress
        .spec
        .and_then(|spec| spec.rules)
        .and_then(|rules| rules.into_iter().next())
        .and_then(|rule| rule.host)
        .filter(|host| !host.is_empty())
        .ok_or_else(missing)
}

/// Resolves the admin password once per run.
///
/// An explicit password wins; otherwise the UID of the loft namespace is
/// used, creating the namespace if needed so the value is stable across runs.
pub struct PasswordResolver {
    namespace: String,
    explicit: Option<String>,
    resolved: OnceCell<String>,
}

impl PasswordResolver {
    pub fn new(namespace: impl Into<String>, explicit: Option<String>) -> Self {
        Self {
            namespace: namespace.into(),
            explicit: explicit.filter(|p| !p.is_empty()),
            resolved: OnceCell::new(),
        }
    }

    pub async fn resolve(&self, cluster: &dyn ClusterApi) -> Result<String> {
        self.resolved
            .get_or_try_init(|| async {
                if let Some(password) = &self.explicit {
                    return Ok(password.clone());
                }
                namespace_uid(cluster, &self.namespace).await
            })
            .await
            .cloned()
    }
}

async fn namespace_uid(cluster: &dyn ClusterApi, namespace: &str) -> Result<String> {
    let ns = match cluster.get_namespace(namespace).await? {
        Some(ns) => ns,
        None => {
            info!("Creating namespace {}", namespace);
            cluster.create_namespace(namespace).await?
        }
    };
    ns.metadata
        .uid
        .ok_or_else(|| Error::Other(format!("namespace {} has no uid", namespace)))
}

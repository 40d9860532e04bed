//! Cluster control API.
//!
//! Everything the installer reads from or writes to the cluster goes through
//! [`ClusterApi`]. [`KubeCluster`] is the kube-rs implementation; tests use the
//! generated mock.

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::TypeMeta;
use kube::discovery::ApiResource;
use kube::{Client, Config};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::commands::CommandErrorExt;
use crate::Result;

/// Cluster-scoped objects registered by a loft installation that outlive the
/// helm release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterScoped {
    ValidatingWebhook,
    ApiService,
    LoftUser,
}

impl std::fmt::Display for ClusterScoped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClusterScoped::ValidatingWebhook => "validating webhook configuration",
            ClusterScoped::ApiService => "api service",
            ClusterScoped::LoftUser => "loft user",
        };
        f.write_str(name)
    }
}

/// Trait over the Kubernetes calls the installer needs
///
/// Lookups return `Ok(None)` for 404; every other failure is an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Whether the current credentials may perform any verb on any resource
    async fn can_administer(&self) -> Result<bool>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>>;

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    async fn create_namespace(&self, name: &str) -> Result<Namespace>;

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    /// Whether any IngressClass is registered
    async fn has_ingress_class(&self) -> Result<bool>;

    async fn list_secrets(&self, namespace: &str, label_selector: &str) -> Result<Vec<Secret>>;

    async fn merge_patch_secret(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<()>;

    /// Delete a cluster-scoped object. Returns `false` if it was already gone.
    async fn delete_cluster_scoped(&self, kind: ClusterScoped, name: &str) -> Result<bool>;

    async fn list_sleep_mode_configs(&self, namespace: &str) -> Result<Vec<DynamicObject>>;

    async fn create_sleep_mode_config(&self, namespace: &str, config: DynamicObject)
        -> Result<()>;
}

fn loft_user_resource() -> ApiResource {
    ApiResource {
        group: "storage.loft.sh".to_string(),
        version: "v1".to_string(),
        kind: "User".to_string(),
        api_version: "storage.loft.sh/v1".to_string(),
        plural: "users".to_string(),
    }
}

fn sleep_mode_resource() -> ApiResource {
    ApiResource {
        group: "cluster.loft.sh".to_string(),
        version: "v1".to_string(),
        kind: "SleepModeConfig".to_string(),
        api_version: "cluster.loft.sh/v1".to_string(),
        plural: "sleepmodeconfigs".to_string(),
    }
}

// =============================================================================
// Real Implementation
// =============================================================================

/// A kubeconfig context resolved to a client and its API server URL
pub struct KubeCluster {
    client: Client,
    /// API server URL of the selected context
    pub endpoint: String,
}

impl KubeCluster {
    /// Build a client for `context` (or the current context) of `kubeconfig`.
    pub async fn connect(kubeconfig: Kubeconfig, context: Option<&str>) -> Result<Self> {
        let options = KubeConfigOptions {
            context: context.map(str::to_string),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .cmd_err()?;
        let endpoint = config.cluster_url.to_string();
        let client = Client::try_from(config).cmd_err()?;
        Ok(Self { client, endpoint })
    }

    async fn delete<K>(api: Api<K>, name: &str) -> Result<bool>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(name, "already deleted");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn can_administer(&self) -> Result<bool> {
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let review = SelfSubjectAccessReview {
            metadata: Default::default(),
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    verb: Some("*".to_string()),
                    group: Some("*".to_string()),
                    resource: Some("*".to_string()),
                    ..Default::default()
                }),
                non_resource_attributes: None,
            },
            status: None,
        };
        let result = api.create(&PostParams::default(), &review).await?;
        Ok(result.status.map(|s| s.allowed).unwrap_or(false))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn create_namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        Ok(api.create(&PostParams::default(), &ns).await?)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(list.items)
    }

    async fn has_ingress_class(&self) -> Result<bool> {
        let api: Api<IngressClass> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default().limit(1)).await?;
        Ok(!list.items.is_empty())
    }

    async fn list_secrets(&self, namespace: &str, label_selector: &str) -> Result<Vec<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(list.items)
    }

    async fn merge_patch_secret(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_cluster_scoped(&self, kind: ClusterScoped, name: &str) -> Result<bool> {
        match kind {
            ClusterScoped::ValidatingWebhook => {
                let api: Api<ValidatingWebhookConfiguration> = Api::all(self.client.clone());
                Self::delete(api, name).await
            }
            ClusterScoped::ApiService => {
                let api: Api<APIService> = Api::all(self.client.clone());
                Self::delete(api, name).await
            }
            ClusterScoped::LoftUser => {
                let api: Api<DynamicObject> =
                    Api::all_with(self.client.clone(), &loft_user_resource());
                Self::delete(api, name).await
            }
        }
    }

    async fn list_sleep_mode_configs(&self, namespace: &str) -> Result<Vec<DynamicObject>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &sleep_mode_resource());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn create_sleep_mode_config(
        &self,
        namespace: &str,
        mut config: DynamicObject,
    ) -> Result<()> {
        let ar = sleep_mode_resource();
        config.types = Some(TypeMeta {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
        });
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        api.create(&PostParams::default(), &config).await?;
        Ok(())
    }
}

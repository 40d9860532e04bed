//! helm invocations for loft and its ingress controller.

use serde_json::json;
use tracing::{info, warn};

use crate::cluster::ClusterApi;
use crate::executor::{run_checked, CommandExecutor};
use crate::prompt::{ask, IngressControllerAnswer, Prompter};
use crate::validate::validate_hostname;
use crate::{Error, Result};

use super::state::LOFT_DEPLOYMENT;

const LOFT_CHART_REPO: &str = "https://charts.devspace.sh/";
const INGRESS_NGINX_REPO: &str = "https://kubernetes.github.io/ingress-nginx";
const INGRESS_NGINX_NAMESPACE: &str = "ingress-nginx";
const INGRESS_NGINX_RELEASE_SECRET: &str = "name=ingress-nginx,owner=helm,status=deployed";

/// Everything needed to install the loft chart.
///
/// Built through [`InstallPlan::local`] or [`InstallPlan::with_ingress`], so a
/// plan that uses an ingress always carries a valid host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    pub namespace: String,
    pub release: String,
    pub version: Option<String>,
    pub password: String,
    pub admin_email: Option<String>,
    ingress_host: Option<String>,
}

impl InstallPlan {
    pub fn local(
        namespace: impl Into<String>,
        version: Option<String>,
        password: impl Into<String>,
        admin_email: Option<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            release: LOFT_DEPLOYMENT.to_string(),
            version,
            password: password.into(),
            admin_email,
            ingress_host: None,
        }
    }

    pub fn with_ingress(
        namespace: impl Into<String>,
        version: Option<String>,
        password: impl Into<String>,
        admin_email: Option<String>,
        host: impl Into<String>,
    ) -> Result<Self> {
        let host = host.into();
        validate_hostname(&host)?;
        let mut plan = Self::local(namespace, version, password, admin_email);
        plan.ingress_host = Some(host);
        Ok(plan)
    }

    pub fn use_ingress(&self) -> bool {
        self.ingress_host.is_some()
    }

    pub fn ingress_host(&self) -> Option<&str> {
        self.ingress_host.as_deref()
    }
}

/// Drives helm against one kube context.
pub struct HelmDriver<'a> {
    executor: &'a dyn CommandExecutor,
    context: &'a str,
}

impl<'a> HelmDriver<'a> {
    pub fn new(executor: &'a dyn CommandExecutor, context: &'a str) -> Self {
        Self { executor, context }
    }

    fn release_args(&self, verb: &str, release: &str, namespace: &str) -> Vec<String> {
        [
            verb,
            release,
            "loft",
            "--repository-config=''",
            "--repo",
            LOFT_CHART_REPO,
            "--kube-context",
            self.context,
            "--namespace",
            namespace,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn install_args(&self, plan: &InstallPlan) -> Vec<String> {
        let mut args = self.release_args("install", &plan.release, &plan.namespace);
        let mut set = |value: String| {
            args.push("--set".to_string());
            args.push(value);
        };

        set("certIssuer.create=false".to_string());
        match plan.ingress_host() {
            Some(host) => {
                set("ingress.enabled=true".to_string());
                set(format!("ingress.host={}", host));
            }
            None => set("ingress.enabled=false".to_string()),
        }
        set("cluster.connect.local=true".to_string());
        set(format!("admin.password={}", plan.password));
        if let Some(email) = &plan.admin_email {
            set(format!("admin.email={}", email));
        }

        args.push("--wait".to_string());
        if let Some(version) = &plan.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        args
    }

    pub fn upgrade_args(&self, namespace: &str, host: &str, version: Option<&str>) -> Vec<String> {
        let mut args = self.release_args("upgrade", LOFT_DEPLOYMENT, namespace);
        let host_value = format!("ingress.host={}", host);
        args.extend(
            [
                "--reuse-values",
                "--set",
                "ingress.enabled=true",
                "--set",
                host_value.as_str(),
                "--wait",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        if let Some(version) = version {
            args.push("--version".to_string());
            args.push(version.to_string());
        }
        args
    }

    pub fn uninstall_args(&self, release: &str, namespace: &str) -> Vec<String> {
        [
            "uninstall",
            release,
            "--kube-context",
            self.context,
            "--namespace",
            namespace,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn ingress_nginx_args(&self) -> Vec<String> {
        [
            "install",
            "ingress-nginx",
            "ingress-nginx",
            "--repository-config=''",
            "--repo",
            INGRESS_NGINX_REPO,
            "--kube-context",
            self.context,
            "--namespace",
            INGRESS_NGINX_NAMESPACE,
            "--create-namespace",
            "--set-string",
            "controller.config.hsts=false",
            "--wait",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub async fn install(&self, plan: &InstallPlan) -> Result<()> {
        info!("Waiting for loft deployment, this can take several minutes...");
        run_checked(self.executor, "helm", &self.install_args(plan)).await?;
        info!("Successfully deployed loft to your kubernetes cluster!");
        Ok(())
    }

    pub async fn upgrade_add_ingress(
        &self,
        namespace: &str,
        host: &str,
        version: Option<&str>,
    ) -> Result<()> {
        validate_hostname(host)?;
        info!("Waiting for loft, this can take several minutes...");
        run_checked(self.executor, "helm", &self.upgrade_args(namespace, host, version)).await?;
        info!("Successfully upgraded loft to use an ingress!");
        Ok(())
    }

    /// Uninstall the release that owns the loft deployment.
    ///
    /// The release name is re-read from the deployment's `release` label right
    /// before deleting, so a loft not installed through helm is never touched.
    pub async fn uninstall(&self, cluster: &dyn ClusterApi, namespace: &str) -> Result<()> {
        let deployment = cluster
            .get_deployment(namespace, LOFT_DEPLOYMENT)
            .await?
            .ok_or_else(|| Error::Other(format!("loft deployment not found in {}", namespace)))?;
        let release = deployment
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get("release"))
            .filter(|r| !r.is_empty())
            .cloned()
            .ok_or_else(|| {
                Error::Other("loft was not installed via helm, cannot delete it then".to_string())
            })?;

        info!("Uninstalling loft...");
        run_checked(self.executor, "helm", &self.uninstall_args(&release, namespace)).await?;
        Ok(())
    }

    /// Install ingress-nginx unless the cluster already has an ingress class
    /// or the operator declines.
    pub async fn ensure_ingress_controller(
        &self,
        cluster: &dyn ClusterApi,
        prompter: &dyn Prompter,
    ) -> Result<()> {
        match cluster.has_ingress_class().await {
            Ok(true) => {
                info!("Found an existing ingress class, skipping ingress controller installation");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => warn!("Couldn't list ingress classes: {}", e),
        }
        if ask::<IngressControllerAnswer>(prompter)? == IngressControllerAnswer::No {
            return Ok(());
        }

        info!("Waiting for ingress controller deployment, this can take several minutes...");
        run_checked(self.executor, "helm", &self.ingress_nginx_args()).await?;

        if let Err(e) = mark_ingress_release(cluster).await {
            warn!("Couldn't label the ingress-nginx release for loft: {}", e);
        }

        info!("Successfully installed ingress-nginx to your kubernetes cluster!");
        Ok(())
    }
}

/// Label the ingress-nginx helm release secret so loft lists it as an app.
async fn mark_ingress_release(cluster: &dyn ClusterApi) -> Result<()> {
    let secrets = cluster
        .list_secrets(INGRESS_NGINX_NAMESPACE, INGRESS_NGINX_RELEASE_SECRET)
        .await?;
    let [secret] = secrets.as_slice() else {
        return Ok(());
    };
    let name = secret
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::Other("ingress-nginx release secret has no name".to_string()))?;

    let patch = json!({
        "metadata": {
            "labels": { "loft.sh/app": "true" },
            "annotations": { "loft.sh/url": INGRESS_NGINX_REPO }
        }
    });
    cluster
        .merge_patch_secret(INGRESS_NGINX_NAMESPACE, name, patch)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::executor::{CommandOutput, MockCommandExecutor};
    use crate::prompt::{Choice, MockPrompter};
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn ok() -> Result<CommandOutput> {
        Ok(CommandOutput {
            success: true,
            combined: String::new(),
        })
    }

    fn secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn plan_local() -> InstallPlan {
        InstallPlan::local("loft", None, "pw", Some("admin@example.com".to_string()))
    }

    #[test]
    fn ingress_plan_requires_valid_host() {
        assert!(InstallPlan::with_ingress("loft", None, "pw", None, "https://x.y").is_err());
        assert!(InstallPlan::with_ingress("loft", None, "pw", None, "localhost").is_err());

        let plan = InstallPlan::with_ingress("loft", None, "pw", None, "loft.example.com").unwrap();
        assert!(plan.use_ingress());
        assert!(!plan_local().use_ingress());
    }

    #[test]
    fn local_install_disables_ingress() {
        let executor = MockCommandExecutor::new();
        let driver = HelmDriver::new(&executor, "kind-loft");
        let args = driver.install_args(&plan_local()).join(" ");

        assert!(args.starts_with(
            "install loft loft --repository-config='' --repo https://charts.devspace.sh/ --kube-context kind-loft --namespace loft"
        ));
        assert!(args.contains("--set ingress.enabled=false"));
        assert!(!args.contains("ingress.host"));
        assert!(args.contains("--set admin.password=pw --set admin.email=admin@example.com"));
        assert!(args.ends_with("--wait"));
    }

    #[test]
    fn remote_install_sets_host_and_version() {
        let executor = MockCommandExecutor::new();
        let driver = HelmDriver::new(&executor, "gke");
        let plan = InstallPlan::with_ingress(
            "loft",
            Some("1.2.0".to_string()),
            "pw",
            None,
            "loft.example.com",
        )
        .unwrap();
        let args = driver.install_args(&plan).join(" ");

        assert!(args.contains("--set ingress.enabled=true --set ingress.host=loft.example.com"));
        assert!(!args.contains("admin.email"));
        assert!(args.ends_with("--wait --version 1.2.0"));
    }

    #[test]
    fn upgrade_reuses_values() {
        let executor = MockCommandExecutor::new();
        let driver = HelmDriver::new(&executor, "gke");
        assert_eq!(
            driver.upgrade_args("loft", "loft.example.com", None).join(" "),
            "upgrade loft loft --repository-config='' --repo https://charts.devspace.sh/ --kube-context gke --namespace loft --reuse-values --set ingress.enabled=true --set ingress.host=loft.example.com --wait"
        );
    }

    #[tokio::test]
    async fn install_failure_surfaces_helm_output() {
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().times(1).returning(|_, _| {
            Ok(CommandOutput {
                success: false,
                combined: "Error: INSTALLATION FAILED: timed out waiting for the condition".to_string(),
            })
        });
        let driver = HelmDriver::new(&executor, "kind-loft");

        let err = driver.install(&plan_local()).await.unwrap_err();
        assert!(err.to_string().contains("timed out waiting for the condition"));
    }

    #[tokio::test]
    async fn uninstall_uses_release_label() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_get_deployment().returning(|_, _| {
            Ok(Some(Deployment {
                metadata: ObjectMeta {
                    labels: Some(BTreeMap::from([(
                        "release".to_string(),
                        "my-loft".to_string(),
                    )])),
                    ..Default::default()
                },
                ..Default::default()
            }))
        });
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .withf(|program, a| {
                program == "helm"
                    && a.join(" ") == "uninstall my-loft --kube-context kind-loft --namespace loft"
            })
            .times(1)
            .returning(|_, _| ok());

        HelmDriver::new(&executor, "kind-loft")
            .uninstall(&cluster, "loft")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn uninstall_refuses_without_release_label() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_get_deployment()
            .returning(|_, _| Ok(Some(Deployment::default())));
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().never();

        let err = HelmDriver::new(&executor, "kind-loft")
            .uninstall(&cluster, "loft")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not installed via helm"));
    }

    #[tokio::test]
    async fn existing_ingress_class_skips_controller() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_has_ingress_class().returning(|| Ok(true));
        let mut prompter = MockPrompter::new();
        prompter.expect_select().never();
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().never();

        HelmDriver::new(&executor, "gke")
            .ensure_ingress_controller(&cluster, &prompter)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ingress_class_lookup_failure_falls_back_to_prompt() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_has_ingress_class()
            .returning(|| Err(Error::Other("forbidden".to_string())));
        let mut prompter = MockPrompter::new();
        prompter
            .expect_select()
            .withf(|q, _, _| q == IngressControllerAnswer::QUESTION)
            .times(1)
            .returning(|_, _, _| Ok(1));
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().never();

        HelmDriver::new(&executor, "gke")
            .ensure_ingress_controller(&cluster, &prompter)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn declined_controller_is_not_installed() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_has_ingress_class().returning(|| Ok(false));
        let mut prompter = MockPrompter::new();
        prompter
            .expect_select()
            .withf(|q, _, default| q == IngressControllerAnswer::QUESTION && *default == 0)
            .returning(|_, _, _| Ok(1));
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().never();

        HelmDriver::new(&executor, "gke")
            .ensure_ingress_controller(&cluster, &prompter)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn controller_install_labels_single_release_secret() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_has_ingress_class().returning(|| Ok(false));
        cluster
            .expect_list_secrets()
            .withf(|ns, selector| {
                ns == "ingress-nginx" && selector == "name=ingress-nginx,owner=helm,status=deployed"
            })
            .returning(|_, _| Ok(vec![secret("sh.helm.release.v1.ingress-nginx.v1")]));
        cluster
            .expect_merge_patch_secret()
            .withf(|ns, name, patch| {
                ns == "ingress-nginx"
                    && name == "sh.helm.release.v1.ingress-nginx.v1"
                    && patch["metadata"]["labels"]["loft.sh/app"] == "true"
                    && patch["metadata"]["annotations"]["loft.sh/url"]
                        == "https://kubernetes.github.io/ingress-nginx"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut prompter = MockPrompter::new();
        prompter.expect_select().returning(|_, _, default| Ok(default));
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .withf(|program, a| program == "helm" && a.join(" ").contains("--create-namespace"))
            .times(1)
            .returning(|_, _| ok());

        HelmDriver::new(&executor, "gke")
            .ensure_ingress_controller(&cluster, &prompter)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn secret_patch_failure_only_warns() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_has_ingress_class().returning(|| Ok(false));
        cluster
            .expect_list_secrets()
            .returning(|_, _| Ok(vec![secret("release")]));
        cluster
            .expect_merge_patch_secret()
            .returning(|_, _, _| Err(Error::Other("forbidden".to_string())));
        let mut prompter = MockPrompter::new();
        prompter.expect_select().returning(|_, _, _| Ok(0));
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().returning(|_, _| ok());

        HelmDriver::new(&executor, "gke")
            .ensure_ingress_controller(&cluster, &prompter)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ambiguous_release_secrets_are_left_alone() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_has_ingress_class().returning(|| Ok(false));
        cluster
            .expect_list_secrets()
            .returning(|_, _| Ok(vec![secret("a"), secret("b")]));
        cluster.expect_merge_patch_secret().never();
        let mut prompter = MockPrompter::new();
        prompter.expect_select().returning(|_, _, _| Ok(0));
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().returning(|_, _| ok());

        HelmDriver::new(&executor, "gke")
            .ensure_ingress_controller(&cluster, &prompter)
            .await
            .unwrap();
    }
}

//! Environment checks run before anything touches the cluster.

use tracing::info;

use crate::cluster::ClusterApi;
use crate::executor::CommandExecutor;
use crate::{Error, Result};

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Verify helm and kubectl are installed and working, and that the current
/// credentials can administer the cluster.
pub async fn check(
    executor: &dyn CommandExecutor,
    cluster: &dyn ClusterApi,
    context: &str,
) -> Result<()> {
    info!("Checking prerequisites...");

    if executor.locate("helm").is_none() {
        return Err(Error::preflight(
            "Seems like helm is not installed. Helm is required for the installation of loft. Please visit https://helm.sh/docs/intro/install/ for install instructions.",
        ));
    }
    let output = executor.run("helm", &args(&["version"])).await?;
    if !output.success {
        return Err(Error::preflight(format!(
            "Seems like there are issues with your helm client: \n\n{}",
            output.combined
        )));
    }

    if executor.locate("kubectl").is_none() {
        return Err(Error::preflight(
            "Seems like kubectl is not installed. Kubectl is required for the installation of loft. Please visit https://kubernetes.io/docs/tasks/tools/install-kubectl/ for install instructions.",
        ));
    }
    let output = executor
        .run("kubectl", &args(&["version", "--context", context]))
        .await?;
    if !output.success {
        return Err(Error::preflight(format!(
            "Seems like kubectl cannot connect to your Kubernetes cluster: \n\n{}",
            output.combined
        )));
    }

    let allowed = cluster.can_administer().await.map_err(|e| {
        Error::preflight(format!(
            "Error checking your permissions in context '{}': {}. Please make sure RBAC is correctly configured in your cluster",
            context, e
        ))
    })?;
    if !allowed {
        return Err(Error::preflight(format!(
            "The user of context '{}' is not a cluster admin. Installing loft requires cluster-admin rights",
            context
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::executor::{CommandOutput, MockCommandExecutor};
    use std::path::PathBuf;

    fn ok_output() -> Result<CommandOutput> {
        Ok(CommandOutput {
            success: true,
            combined: String::new(),
        })
    }

    fn healthy_executor() -> MockCommandExecutor {
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_locate()
            .returning(|program| Some(PathBuf::from(format!("/usr/local/bin/{program}"))));
        executor
            .expect_run()
            .withf(|program, a| program == "helm" && a == ["version".to_string()])
            .returning(|_, _| ok_output());
        executor
            .expect_run()
            .withf(|program, a| program == "kubectl" && a.join(" ") == "version --context kind-loft")
            .returning(|_, _| ok_output());
        executor
    }

    #[tokio::test]
    async fn passes_with_tools_and_admin_rights() {
        let executor = healthy_executor();
        let mut cluster = MockClusterApi::new();
        cluster.expect_can_administer().times(1).returning(|| Ok(true));

        check(&executor, &cluster, "kind-loft").await.unwrap();
    }

    #[tokio::test]
    async fn missing_helm_is_reported_first() {
        let mut executor = MockCommandExecutor::new();
        executor.expect_locate().returning(|_| None);
        executor.expect_run().never();
        let cluster = MockClusterApi::new();

        let err = check(&executor, &cluster, "kind-loft").await.unwrap_err();
        assert!(matches!(err, Error::Preflight { .. }));
        assert!(err.to_string().contains("helm is not installed"));
    }

    #[tokio::test]
    async fn unreachable_cluster_surfaces_kubectl_output() {
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_locate()
            .returning(|program| Some(PathBuf::from(program)));
        executor
            .expect_run()
            .withf(|program, _| program == "helm")
            .returning(|_, _| ok_output());
        executor
            .expect_run()
            .withf(|program, _| program == "kubectl")
            .returning(|_, _| {
                Ok(CommandOutput {
                    success: false,
                    combined: "Unable to connect to the server: dial tcp 127.0.0.1:6443".to_string(),
                })
            });
        let cluster = MockClusterApi::new();

        let err = check(&executor, &cluster, "kind-loft").await.unwrap_err();
        assert!(err.to_string().contains("dial tcp 127.0.0.1:6443"));
    }

    #[tokio::test]
    async fn non_admin_is_rejected() {
        let executor = healthy_executor();
        let mut cluster = MockClusterApi::new();
        cluster.expect_can_administer().returning(|| Ok(false));

        let err = check(&executor, &cluster, "kind-loft").await.unwrap_err();
        assert!(err.to_string().contains("cluster-admin"));
    }
}

//! Waiting on the loft pod.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tracing::{info, warn};

use crate::cluster::{ClusterApi, ClusterScoped};
use crate::poll::{poll, poll_immediate, PollSpec};
use crate::Result;

/// Label selector of the pods run by the loft chart.
pub const LOFT_POD_SELECTOR: &str = "app=loft";

const POD_READY: PollSpec = PollSpec::new(Duration::from_secs(3), Duration::from_secs(10 * 60));
const PODS_GONE: PollSpec = PollSpec::new(Duration::from_secs(1), Duration::from_secs(10 * 60));

/// Whether every container of `pod` is running and ready.
///
/// Containers that terminated with a non-zero exit code are logged; they do
/// not fail the wait since the pod may still restart them.
pub fn pod_ready(pod: &Pod) -> bool {
    let statuses = match pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
    {
        Some(statuses) if !statuses.is_empty() => statuses,
        _ => return false,
    };

    let mut ready = true;
    for status in statuses {
        let state = status.state.as_ref();
        if let Some(terminated) = state.and_then(|s| s.terminated.as_ref()) {
            if terminated.exit_code != 0 {
                warn!(
                    "There seems to be an issue with loft starting up: container {} terminated with exit code {} ({}). Please reach out to our support at https://loft.sh/",
                    status.name,
                    terminated.exit_code,
                    terminated.message.as_deref().unwrap_or_default()
                );
            }
        }

        let running = state.and_then(|s| s.running.as_ref()).is_some();
        if !running || !status.ready {
            ready = false;
        }
    }
    ready
}

/// Poll until the first loft pod is ready. Listing errors are transient.
pub async fn wait_for_loft_pod(cluster: &dyn ClusterApi, namespace: &str) -> Result<()> {
    info!("Waiting until loft pod has been started...");
    poll_immediate(POD_READY, "loft pod to become ready", || async move {
        match cluster.list_pods(namespace, LOFT_POD_SELECTOR).await {
            Ok(pods) => Ok(pods.first().is_some_and(pod_ready)),
            Err(e) => {
                warn!("Error listing loft pods: {}", e);
                Ok(false)
            }
        }
    })
    .await?;
    info!("Loft pod has successfully started");
    Ok(())
}

/// Poll until no loft pods are left.
pub async fn wait_for_pods_gone(cluster: &dyn ClusterApi, namespace: &str) -> Result<()> {
    poll(PODS_GONE, "loft pods to terminate", || async move {
        let pods = cluster.list_pods(namespace, LOFT_POD_SELECTOR).await?;
        Ok(pods.is_empty())
    })
    .await
}

/// Remove what a loft installation registers outside its helm release.
/// Objects that are already gone are fine.
pub async fn delete_leftovers(cluster: &dyn ClusterApi) -> Result<()> {
    for (kind, name) in [
        (ClusterScoped::ValidatingWebhook, "loft"),
        (ClusterScoped::ApiService, "v1.management.loft.sh"),
        (ClusterScoped::LoftUser, "admin"),
    ] {
        if cluster.delete_cluster_scoped(kind, name).await? {
            info!("Deleted {} {}", kind, name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::Error;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStatus, PodStatus,
    };

    fn container(running: bool, ready: bool, exit_code: Option<i32>) -> ContainerStatus {
        ContainerStatus {
            name: "manager".to_string(),
            ready,
            state: Some(ContainerState {
                running: running.then(ContainerStateRunning::default),
                terminated: exit_code.map(|code| ContainerStateTerminated {
                    exit_code: code,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(containers: Vec<ContainerStatus>) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(containers),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn readiness_requires_every_container() {
        assert!(pod_ready(&pod(vec![container(true, true, None)])));
        assert!(!pod_ready(&pod(vec![
            container(true, true, None),
            container(true, false, None)
        ])));
        assert!(!pod_ready(&pod(vec![container(false, false, Some(1))])));
    }

    #[test]
    fn pod_without_statuses_is_not_ready() {
        assert!(!pod_ready(&Pod::default()));
        assert!(!pod_ready(&pod(vec![])));
    }

    #[tokio::test(start_paused = true)]
    async fn list_errors_are_swallowed_while_waiting() {
        let mut cluster = MockClusterApi::new();
        let mut calls = 0;
        cluster
            .expect_list_pods()
            .withf(|ns, selector| ns == "loft" && selector == "app=loft")
            .times(3)
            .returning(move |_, _| {
                calls += 1;
                match calls {
                    1 => Err(Error::Other("connection reset".to_string())),
                    2 => Ok(vec![pod(vec![container(false, false, Some(2))])]),
                    _ => Ok(vec![pod(vec![container(true, true, None)])]),
                }
            });

        wait_for_loft_pod(&cluster, "loft").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_times_out() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_list_pods().returning(|_, _| Ok(vec![]));

        let err = wait_for_loft_pod(&cluster, "loft").await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn pod_termination_errors_are_fatal() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_list_pods()
            .times(1)
            .returning(|_, _| Err(Error::Other("forbidden".to_string())));

        assert!(wait_for_pods_gone(&cluster, "loft").await.is_err());
    }

    #[tokio::test]
    async fn leftovers_tolerate_missing_objects() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_delete_cluster_scoped()
            .withf(|kind, name| *kind == ClusterScoped::ValidatingWebhook && name == "loft")
            .times(1)
            .returning(|_, _| Ok(false));
        cluster
            .expect_delete_cluster_scoped()
            .withf(|kind, name| *kind == ClusterScoped::ApiService && name == "v1.management.loft.sh")
            .times(1)
            .returning(|_, _| Ok(true));
        cluster
            .expect_delete_cluster_scoped()
            .withf(|kind, name| *kind == ClusterScoped::LoftUser && name == "admin")
            .times(1)
            .returning(|_, _| Ok(false));

        delete_leftovers(&cluster).await.unwrap();
    }

    #[tokio::test]
    async fn leftover_delete_errors_are_fatal() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_delete_cluster_scoped()
            .times(1)
            .returning(|_, _| Err(Error::Other("forbidden".to_string())));

        assert!(delete_leftovers(&cluster).await.is_err());
    }
}

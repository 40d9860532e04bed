//! `loft wakeup`: resume a sleeping space.

use std::time::Duration;

use chrono::Utc;
use clap::Args;
use kube::api::DynamicObject;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::cluster::{ClusterApi, KubeCluster};
use crate::commands::load_kubeconfig;
use crate::poll::{poll, PollSpec};
use crate::{Error, Result};

const WAKE_UP: PollSpec = PollSpec::new(Duration::from_secs(1), Duration::from_secs(60));

/// Wake up a sleeping space
#[derive(Args, Debug)]
pub struct WakeupArgs {
    /// Name of the space to wake up
    pub space: String,

    /// Prefix of the namespace backing the space
    #[arg(long, default_value = "")]
    pub namespace_prefix: String,
}

pub async fn run(args: WakeupArgs) -> Result<()> {
    let kubeconfig = load_kubeconfig()?;
    let cluster = KubeCluster::connect(kubeconfig, None).await?;
    let namespace = format!("{}{}", args.namespace_prefix, args.space);
    wake_up(&cluster, &namespace).await?;
    info!("Successfully woken up space {}", args.space);
    Ok(())
}

/// Clear forced sleep on the space's sleep mode config and wait until the
/// space reports that it is no longer sleeping.
pub async fn wake_up(cluster: &dyn ClusterApi, namespace: &str) -> Result<()> {
    let mut config = first_config(cluster, namespace).await?;
    mark_awake(&mut config, Utc::now().timestamp())?;
    cluster.create_sleep_mode_config(namespace, config).await?;

    info!("Wait until space wakes up");
    poll(WAKE_UP, "space to wake up", || async move {
        let config = first_config(cluster, namespace).await?;
        Ok(sleeping_since(&config) == 0)
    })
    .await
    .map_err(|e| Error::Other(format!("error waiting for space to wake up: {}", e)))
}

async fn first_config(cluster: &dyn ClusterApi, namespace: &str) -> Result<DynamicObject> {
    cluster
        .list_sleep_mode_configs(namespace)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Other(format!("no sleep mode config found in namespace {}", namespace)))
}

fn malformed() -> Error {
    Error::Other("sleep mode config is malformed".to_string())
}

fn object_field<'a>(parent: &'a mut Map<String, Value>, key: &str) -> Result<&'a mut Map<String, Value>> {
    parent
        .entry(key)
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(malformed)
}

/// Drop any forced sleep and record activity at `now` (unix seconds).
fn mark_awake(config: &mut DynamicObject, now: i64) -> Result<()> {
    if config.data.is_null() {
        config.data = json!({});
    }
    let data = config.data.as_object_mut().ok_or_else(malformed)?;

    let spec = object_field(data, "spec")?;
    spec.insert("forceSleep".to_string(), json!(false));
    spec.remove("forceSleepDuration");

    let status = object_field(data, "status")?;
    status.insert("lastActivity".to_string(), json!(now));
    Ok(())
}

fn sleeping_since(config: &DynamicObject) -> i64 {
    config
        .data
        .pointer("/status/sleepingSince")
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

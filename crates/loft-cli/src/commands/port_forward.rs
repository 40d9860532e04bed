//! Local tunnel to the loft deployment.
//!
//! Wraps `kubectl port-forward deploy/loft <port>:443`. The tunnel is not
//! restarted: once kubectl exits there is no connectivity left for this run,
//! so the exit surfaces as [`Error::TunnelExited`].

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::commands::start::ConnectivityTarget;
use crate::executor::{display_command, CommandExecutor};
use crate::poll::{poll_immediate, PollSpec};
use crate::probe::ReachabilityProbe;
use crate::{Error, Result};

/// Command the operator is told to rerun when the tunnel dies.
pub const RETRY_COMMAND: &str = "loft start";

const TUNNEL_READY: PollSpec = PollSpec::new(Duration::from_secs(1), Duration::from_secs(10 * 60));

/// Arguments for `kubectl port-forward` against the loft deployment.
pub fn port_forward_args(context: &str, namespace: &str, local_port: &str) -> Vec<String> {
    vec![
        "port-forward".to_string(),
        "deploy/loft".to_string(),
        "--context".to_string(),
        context.to_string(),
        "--namespace".to_string(),
        namespace.to_string(),
        format!("{}:443", local_port),
    ]
}

fn tunnel_exited(reason: std::result::Result<String, oneshot::error::RecvError>) -> Error {
    Error::TunnelExited {
        reason: reason.unwrap_or_else(|_| "supervisor stopped".to_string()),
        retry_command: RETRY_COMMAND.to_string(),
    }
}

/// A running, verified port-forward.
#[derive(Debug)]
pub struct PortForwardSession {
    /// Local URL loft is served on, e.g. `https://localhost:9898`
    pub url: String,
    exited: oneshot::Receiver<String>,
}

impl PortForwardSession {
    /// Spawn the tunnel and wait until loft answers through it.
    ///
    /// Probe failures while waiting only mean "not yet". If kubectl exits
    /// before loft answers, the wait is abandoned.
    pub async fn start(
        executor: &dyn CommandExecutor,
        probe: &dyn ReachabilityProbe,
        context: &str,
        namespace: &str,
        local_port: &str,
    ) -> Result<Self> {
        info!("Loft will now start port-forwarding to the loft pod");
        let args = port_forward_args(context, namespace, local_port);
        info!("Starting command: {}", display_command("kubectl", &args));
        let mut process = executor.spawn("kubectl", &args)?;

        let url = ConnectivityTarget::Local {
            port: local_port.to_string(),
        }
        .url();
        info!("Waiting until loft is reachable at {}", url);

        let target = url.as_str();
        let ready = poll_immediate(TUNNEL_READY, "port-forwarding to loft", || async move {
            match probe.probe(target).await {
                Ok(reachable) => Ok(reachable),
                Err(e) => {
                    debug!(error = %e, "loft not yet reachable through tunnel");
                    Ok(false)
                }
            }
        });

        tokio::select! {
            result = ready => result?,
            reason = &mut process.exited => return Err(tunnel_exited(reason)),
        }

        Ok(Self {
            url,
            exited: process.exited,
        })
    }

    /// Resolves once the tunnel process ends, with the error to report.
    pub async fn closed(self) -> Error {
        tunnel_exited(self.exited.await)
    }

    /// Keep the tunnel open until Ctrl-C or until it dies.
    pub async fn hold(self) -> Result<()> {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Stopping port-forwarding");
                Ok(())
            }
            err = self.closed() => Err(err),
        }
    }
}

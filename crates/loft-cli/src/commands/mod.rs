//! CLI commands

use std::fmt::Display;

use kube::config::Kubeconfig;

use crate::{Error, Result};

pub mod port_forward;
pub mod start;
pub mod wakeup;

/// Extension trait to convert errors with Display to CLI Error::CommandFailed.
///
/// This reduces boilerplate for the common pattern of `.map_err(|e| Error::command_failed(e.to_string()))`.
pub trait CommandErrorExt<T> {
    /// Convert an error to `Error::CommandFailed` using its Display implementation.
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::command_failed(e.to_string()))
    }
}

/// Load the operator's kubeconfig (`KUBECONFIG` or `~/.kube/config`).
pub fn load_kubeconfig() -> Result<Kubeconfig> {
    Kubeconfig::read().map_err(|e| {
        Error::preflight(format!(
            "There is an error loading your current kube config ({}), please make sure you have access to a kubernetes cluster and the command `kubectl get namespaces` is working",
            e
        ))
    })
}

/// Name of the kubeconfig's current context.
pub fn current_context(kubeconfig: &Kubeconfig) -> Result<String> {
    kubeconfig
        .current_context
        .clone()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            Error::preflight(
                "Your kube config has no current context, please select one with `kubectl config use-context`",
            )
        })
}

//! `loft start`
//!
//! Installs loft into the current kube context, or reconnects to an existing
//! installation. The flow is:
//!
//! 1. preflight: helm, kubectl and cluster-admin rights
//! 2. detect what is already deployed
//! 3. decide: fresh install, reset + install, add an ingress, or reconnect
//! 4. run helm
//! 5. wait for the loft pod
//! 6. make loft reachable through DNS or a local port-forward
//!
//! Every side effect goes through a trait object held by [`Starter`], so the
//! whole decision tree runs against mocks in tests.

pub mod connect;
pub mod deploy;
pub mod preflight;
pub mod readiness;
pub mod state;

use std::sync::Arc;

use clap::Args;
use tracing::{info, warn};

use crate::cluster::{ClusterApi, KubeCluster};
use crate::commands::port_forward::PortForwardSession;
use crate::commands::{current_context, load_kubeconfig};
use crate::config::{load_config, save_config, CliConfig};
use crate::executor::{CommandExecutor, SystemExecutor};
use crate::probe::{HttpsProbe, ReachabilityProbe};
use crate::prompt::{
    ask, ask_with, input_until_valid, AccessMode, AddIngressAnswer, LocalClusterAnswer, Prompter,
    RemoteClusterAnswer, TerminalPrompter, TunnelFallbackAnswer,
};
use crate::validate::{
    classify_endpoint, validate_email, validate_hostname, ClusterLocation, DnsMailResolver,
    MailDomainResolver,
};
use crate::version::{BuildInfo, GithubReleases, UpdateCheck};
use crate::{Error, Result};

pub use connect::{ConnectivityTarget, StartReport};
pub use deploy::InstallPlan;
pub use state::DeploymentState;

use deploy::HelmDriver;
use state::PasswordResolver;

const HOSTNAME_QUESTION: &str = "Enter a hostname for your loft instance (e.g. loft.my-domain.tld)";
const EMAIL_QUESTION: &str = "Enter an email address for your admin user";
const CONTEXT_QUESTION: &str = "Seems like you try to use 'loft start' with a different kubernetes context than before. Please choose which kubernetes context you want to use";

/// Install loft or connect to an existing installation
#[derive(Args, Debug)]
pub struct StartArgs {
    /// The namespace to install loft into
    #[arg(long, default_value = "loft")]
    pub namespace: String,

    /// The local port to bind to if using port-forwarding
    #[arg(long, default_value = "9898")]
    pub local_port: String,

    /// The password to use for the admin account (defaults to the namespace UID)
    #[arg(long, env = "LOFT_PASSWORD")]
    pub password: Option<String>,

    /// The loft version to install
    #[arg(long)]
    pub version: Option<String>,

    /// Delete an existing loft instance before installing loft
    #[arg(long)]
    pub reset: bool,
}

/// Resolved inputs for one `loft start` run.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub namespace: String,
    pub local_port: String,
    pub password: Option<String>,
    pub version: Option<String>,
    pub reset: bool,
    pub kube_context: String,
    /// API server URL of `kube_context`
    pub endpoint: String,
}

impl StartOptions {
    pub fn new(args: StartArgs, kube_context: String, endpoint: String) -> Self {
        Self {
            namespace: args.namespace,
            local_port: args.local_port,
            password: args.password,
            version: args.version.filter(|v| !v.is_empty()),
            reset: args.reset,
            kube_context,
            endpoint,
        }
    }
}

/// Pick the kube context to install into.
///
/// When the last install went to a different context than the current one,
/// the operator chooses. The choice is recorded in `config`.
pub fn select_context(
    prompter: &dyn Prompter,
    config: &mut CliConfig,
    current: String,
) -> Result<String> {
    let chosen = match config.last_install_context.clone() {
        Some(last) if !last.is_empty() && last != current => {
            let options = vec![current, last];
            let index = prompter.select(CONTEXT_QUESTION, &options, 0)?;
            options
                .into_iter()
                .nth(index)
                .ok_or_else(|| Error::Prompt(format!("answer index {} out of range", index)))?
        }
        _ => current,
    };
    config.last_install_context = Some(chosen.clone());
    Ok(chosen)
}

/// The `loft start` decision tree
pub struct Starter {
    options: StartOptions,
    cluster: Arc<dyn ClusterApi>,
    executor: Arc<dyn CommandExecutor>,
    prompter: Arc<dyn Prompter>,
    probe: Arc<dyn ReachabilityProbe>,
    mail: Arc<dyn MailDomainResolver>,
    passwords: PasswordResolver,
}

impl Starter {
    pub fn new(
        options: StartOptions,
        cluster: Arc<dyn ClusterApi>,
        executor: Arc<dyn CommandExecutor>,
        prompter: Arc<dyn Prompter>,
        probe: Arc<dyn ReachabilityProbe>,
        mail: Arc<dyn MailDomainResolver>,
    ) -> Self {
        let passwords = PasswordResolver::new(options.namespace.clone(), options.password.clone());
        Self {
            options,
            cluster,
            executor,
            prompter,
            probe,
            mail,
            passwords,
        }
    }

    fn helm(&self) -> HelmDriver<'_> {
        HelmDriver::new(self.executor.as_ref(), &self.options.kube_context)
    }

    async fn password(&self) -> Result<String> {
        self.passwords.resolve(self.cluster.as_ref()).await
    }

    pub async fn run(&self) -> Result<StartReport> {
        preflight::check(
            self.executor.as_ref(),
            self.cluster.as_ref(),
            &self.options.kube_context,
        )
        .await?;

        let state = state::detect_state(self.cluster.as_ref(), &self.options.namespace).await?;
        match state {
            DeploymentState::Absent => {}
            _ if self.options.reset => self.reset().await?,
            DeploymentState::PresentLocal => {
                info!("If you want to redeploy loft run 'loft start --reset'");
                return self.existing_local().await;
            }
            DeploymentState::PresentRemote => {
                info!("If you want to redeploy loft run 'loft start --reset'");
                return self.existing_remote().await;
            }
        }

        self.fresh_install().await
    }

    async fn reset(&self) -> Result<()> {
        let cluster = self.cluster.as_ref();
        let namespace = &self.options.namespace;

        self.helm().uninstall(cluster, namespace).await?;
        readiness::wait_for_pods_gone(cluster, namespace).await?;
        readiness::delete_leftovers(cluster).await?;

        info!("Successfully uninstalled loft");
        Ok(())
    }

    async fn existing_local(&self) -> Result<StartReport> {
        let password = self.password().await?;
        let prompter = self.prompter.as_ref();

        if ask::<AddIngressAnswer>(prompter)? == AddIngressAnswer::Yes {
            let host = input_until_valid(prompter, HOSTNAME_QUESTION, |answer| async move {
                validate_hostname(&answer)
            })
            .await?;

            let helm = self.helm();
            helm.ensure_ingress_controller(self.cluster.as_ref(), prompter)
                .await?;
            helm.upgrade_add_ingress(
                &self.options.namespace,
                &host,
                self.options.version.as_deref(),
            )
            .await?;
            return self.remote_report(&host, password).await;
        }

        self.local_report(password).await
    }

    async fn existing_remote(&self) -> Result<StartReport> {
        let password = self.password().await?;
        let host = state::ingress_host(self.cluster.as_ref(), &self.options.namespace).await?;
        let url = ConnectivityTarget::Remote { host: host.clone() }.url();

        let reachable = match self.probe.probe(&url).await {
            Ok(reachable) => reachable,
            Err(e) => {
                warn!("{}", e);
                false
            }
        };
        if !reachable {
            let question = format!(
                "Loft seems to be not reachable at {}. Do you want to use port-forwarding instead?",
                url
            );
            let answer: TunnelFallbackAnswer = ask_with(self.prompter.as_ref(), &question)?;
            if answer == TunnelFallbackAnswer::Yes {
                return self.local_report(password).await;
            }
        }

        self.remote_report(&host, password).await
    }

    async fn fresh_install(&self) -> Result<StartReport> {
        info!("Welcome to the loft installation.");
        info!("This installer will guide you through the installation.");
        info!("If you prefer installing loft via helm yourself, visit https://loft.sh/docs/getting-started/setup");

        let host = self.choose_ingress_host().await?;
        let email = self.ask_admin_email().await?;
        let password = self.password().await?;

        let plan = match host {
            Some(host) => InstallPlan::with_ingress(
                self.options.namespace.clone(),
                self.options.version.clone(),
                password.clone(),
                Some(email),
                host,
            )?,
            None => {
                info!("This will install loft without an externally reachable URL and instead use port-forwarding to connect to loft");
                InstallPlan::local(
                    self.options.namespace.clone(),
                    self.options.version.clone(),
                    password.clone(),
                    Some(email),
                )
            }
        };

        let helm = self.helm();
        if plan.use_ingress() {
            helm.ensure_ingress_controller(self.cluster.as_ref(), self.prompter.as_ref())
                .await?;
        }
        helm.install(&plan).await?;
        readiness::wait_for_loft_pod(self.cluster.as_ref(), &self.options.namespace).await?;

        match plan.ingress_host() {
            Some(host) => self.remote_report(host, password).await,
            None => self.local_report(password).await,
        }
    }

    /// Local or remote topology. `None` means no ingress, port-forwarding only.
    async fn choose_ingress_host(&self) -> Result<Option<String>> {
        let prompter = self.prompter.as_ref();

        let remote = match classify_endpoint(&self.options.endpoint) {
            ClusterLocation::Remote => ask::<RemoteClusterAnswer>(prompter)? == RemoteClusterAnswer::Yes,
            ClusterLocation::Local => ask::<LocalClusterAnswer>(prompter)? == LocalClusterAnswer::NoRemote,
        };
        if !remote || ask::<AccessMode>(prompter)? == AccessMode::PortForwarding {
            return Ok(None);
        }

        // an empty answer falls back to port-forwarding
        let host = input_until_valid(prompter, HOSTNAME_QUESTION, |answer| async move {
            if answer.is_empty() {
                Ok(())
            } else {
                validate_hostname(&answer)
            }
        })
        .await?;
        Ok(Some(host).filter(|h| !h.is_empty()))
    }

    async fn ask_admin_email(&self) -> Result<String> {
        input_until_valid(self.prompter.as_ref(), EMAIL_QUESTION, |answer| {
            let mail = self.mail.clone();
            async move { validate_email(mail.as_ref(), &answer).await }
        })
        .await
    }

    async fn remote_report(&self, host: &str, password: String) -> Result<StartReport> {
        let url = connect::await_remote(self.probe.as_ref(), host).await?;
        Ok(StartReport::Remote { url, password })
    }

    async fn local_report(&self, password: String) -> Result<StartReport> {
        let session = PortForwardSession::start(
            self.executor.as_ref(),
            self.probe.as_ref(),
            &self.options.kube_context,
            &self.options.namespace,
            &self.options.local_port,
        )
        .await?;
        Ok(StartReport::Local {
            url: session.url.clone(),
            password,
            session,
        })
    }
}

/// Run `loft start` against the operator's kubeconfig.
pub async fn run(args: StartArgs, build: &BuildInfo) -> Result<()> {
    match GithubReleases::new() {
        Ok(source) => UpdateCheck::new(Arc::new(source)).warn_if_outdated(build).await,
        Err(e) => warn!("Skipping version check: {}", e),
    }

    let kubeconfig = load_kubeconfig()?;
    let prompter: Arc<dyn Prompter> = Arc::new(TerminalPrompter::new());

    let mut config = load_config()?;
    let context = select_context(prompter.as_ref(), &mut config, current_context(&kubeconfig)?)?;
    if let Err(e) = save_config(&config) {
        warn!("Couldn't save loft config: {}", e);
    }

    let cluster = KubeCluster::connect(kubeconfig, Some(context.as_str())).await?;
    let options = StartOptions::new(args, context, cluster.endpoint.clone());

    let starter = Starter::new(
        options,
        Arc::new(cluster),
        Arc::new(SystemExecutor::new()),
        prompter,
        Arc::new(HttpsProbe::new()?),
        Arc::new(DnsMailResolver::from_system_conf()?),
    );

    let report = starter.run().await?;
    println!("{}", report.render());

    if let StartReport::Local { session, .. } = report {
        session.hold().await?;
    }
    Ok(())
}

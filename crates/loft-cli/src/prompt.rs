//! Operator questions.
//!
//! Rendering is delegated to a [`Prompter`]; each multiple-choice question the
//! installer asks is an enum implementing [`Choice`], so answers are matched by
//! variant instead of by comparing option strings.

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Select};
#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Renders questions and returns raw answers
#[cfg_attr(test, automock)]
pub trait Prompter: Send + Sync {
    /// Ask a multiple-choice question; returns the index of the chosen option
    fn select(&self, question: &str, options: &[String], default: usize) -> Result<usize>;

    /// Ask a free-text question
    fn input(&self, question: &str) -> Result<String>;
}

/// A multiple-choice question and its answers.
pub trait Choice: Copy + Sized + 'static {
    const QUESTION: &'static str;
    const OPTIONS: &'static [Self];
    const DEFAULT: Self;

    fn label(&self) -> &'static str;
}

/// Ask question `C` and map the selected index back to its variant.
pub fn ask<C: Choice + PartialEq>(prompter: &dyn Prompter) -> Result<C> {
    ask_with(prompter, C::QUESTION)
}

/// Ask question `C` using a question text computed at runtime.
pub fn ask_with<C: Choice + PartialEq>(prompter: &dyn Prompter, question: &str) -> Result<C> {
    let labels: Vec<String> = C::OPTIONS.iter().map(|o| o.label().to_string()).collect();
    let default = C::OPTIONS
        .iter()
        .position(|o| *o == C::DEFAULT)
        .unwrap_or(0);
    let index = prompter.select(question, &labels, default)?;
    C::OPTIONS
        .get(index)
        .copied()
        .ok_or_else(|| Error::Prompt(format!("answer index {} out of range", index)))
}

macro_rules! choice {
    (
        $(#[$meta:meta])*
        $name:ident, $question:expr, default = $default:ident,
        { $($variant:ident => $label:expr),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl Choice for $name {
            const QUESTION: &'static str = $question;
            const OPTIONS: &'static [Self] = &[$($name::$variant),+];
            const DEFAULT: Self = $name::$default;

            fn label(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }
    };
}

choice!(
    /// Confirmation of a cluster detected as remote
    RemoteClusterAnswer,
    "Seems like your cluster is running remotely (GKE, EKS, AKS, private cloud etc.). Is that correct?",
    default = Yes,
    {
        Yes => "Yes",
        NoLocal => "No, my cluster is running locally (docker desktop, minikube, kind etc.)",
    }
);

choice!(
    /// Confirmation of a cluster detected as local
    LocalClusterAnswer,
    "Seems like your cluster is running locally (docker desktop, minikube, kind etc.). Is that correct?",
    default = Yes,
    {
        Yes => "Yes",
        NoRemote => "No, I am using a remote cluster and want to access loft on a public domain",
    }
);

choice!(
    /// How loft should be reached on a remote cluster
    AccessMode,
    "How do you want to access loft?",
    default = PortForwarding,
    {
        PortForwarding => "via port-forwarding (no other configuration needed)",
        Ingress => "via ingress (you will need to configure DNS)",
    }
);

choice!(
    /// Whether to add an ingress to a local-only installation
    AddIngressAnswer,
    "Loft was installed without an ingress. Do you want to upgrade loft and install an ingress now?",
    default = No,
    {
        No => "No",
        Yes => "Yes, I want to deploy an ingress to let other people access loft.",
    }
);

choice!(
    /// Fallback offered when an existing remote installation is unreachable
    TunnelFallbackAnswer,
    "Loft seems to be not reachable. Do you want to use port-forwarding instead?",
    default = Yes,
    {
        Yes => "Yes",
        No => "No, I want to see the DNS message again",
    }
);

choice!(
    /// Whether to install ingress-nginx
    IngressControllerAnswer,
    "Ingress controller required. Should the nginx-ingress controller be installed?",
    default = Yes,
    {
        Yes => "Yes",
        No => "No, I already have an ingress controller installed",
    }
);

/// Ask for free text until `validate` accepts it, warning on every rejection.
pub async fn input_until_valid<F, Fut>(
    prompter: &dyn Prompter,
    question: &str,
    mut validate: F,
) -> Result<String>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    loop {
        let answer = prompter.input(question)?.trim().to_string();
        match validate(answer.clone()).await {
            Ok(()) => return Ok(answer),
            Err(Error::Validation { message }) => tracing::warn!("{}", message),
            Err(e) => return Err(e),
        }
    }
}

// =============================================================================
// Real Implementation
// =============================================================================

/// Terminal prompts rendered with dialoguer
#[derive(Default)]
pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Prompter for TerminalPrompter {
    fn select(&self, question: &str, options: &[String], default: usize) -> Result<usize> {
        Select::with_theme(&self.theme)
            .with_prompt(question)
            .items(options)
            .default(default)
            .interact()
            .map_err(|e| Error::Prompt(e.to_string()))
    }

    fn input(&self, question: &str) -> Result<String> {
        Input::<String>::with_theme(&self.theme)
            .with_prompt(question)
            .allow_empty(true)
            .interact_text()
            .map_err(|e| Error::Prompt(e.to_string()))
    }
}

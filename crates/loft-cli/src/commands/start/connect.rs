//! Making loft reachable: DNS wait for ingress installs, tunnel for local ones.

use std::time::Duration;

use console::style;
use tracing::{debug, info};

use crate::commands::port_forward::PortForwardSession;
use crate::poll::{poll_immediate, PollSpec};
use crate::probe::ReachabilityProbe;
use crate::{Error, Result};

const DNS_PROPAGATION: PollSpec =
    PollSpec::new(Duration::from_secs(5), Duration::from_secs(24 * 60 * 60));

/// Where loft is reached at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityTarget {
    Remote { host: String },
    Local { port: String },
}

impl ConnectivityTarget {
    pub fn url(&self) -> String {
        match self {
            ConnectivityTarget::Remote { host } => format!("https://{}", host),
            ConnectivityTarget::Local { port } => format!("https://localhost:{}", port),
        }
    }
}

/// Outcome of a successful `loft start`.
#[derive(Debug)]
pub enum StartReport {
    /// Loft is served through a port-forward owned by this process
    Local {
        url: String,
        password: String,
        session: PortForwardSession,
    },
    Remote {
        url: String,
        password: String,
    },
}

impl StartReport {
    pub fn url(&self) -> &str {
        match self {
            StartReport::Local { url, .. } | StartReport::Remote { url, .. } => url,
        }
    }

    pub fn password(&self) -> &str {
        match self {
            StartReport::Local { password, .. } | StartReport::Remote { password, .. } => password,
        }
    }

    /// The login block shown to the operator.
    pub fn render(&self) -> String {
        let (footer, certificate_guide) = match self {
            StartReport::Local { .. } => (
                "Loft was successfully installed and port-forwarding has been started.\nIf you stop this command, run 'loft start' again to restart port-forwarding.".to_string(),
                "",
            ),
            StartReport::Remote { url, .. } => (
                format!(
                    "Loft was successfully installed and can now be reached at: {}",
                    url
                ),
                "\nFollow this guide to add a valid certificate: https://loft.sh/docs/administration/ssl\n",
            ),
        };

        format!(
            r#"
##########################   LOGIN   ############################

Username: {username}
Password: {password}

Login via UI:  {ui}
Login via CLI: {cli}

!!! You must accept the untrusted certificate in your browser !!!
{certificate_guide}
#################################################################

{footer}

Thanks for using loft!
"#,
            username = style("admin").green().bold(),
            password = style(self.password()).green().bold(),
            ui = style(self.url()).green().bold(),
            cli = style(format!("loft login --insecure {}", self.url())).green().bold(),
        )
    }
}

fn dns_instructions(host: &str) -> String {
    format!(
        r#"
###################################     DNS CONFIGURATION REQUIRED     ##################################

Create a DNS A-record for {host} with the EXTERNAL-IP of your nginx-ingress controller.
To find this EXTERNAL-IP, run the following command and look at the output:

> kubectl get services -n ingress-nginx
                                                     |---------------|
NAME                       TYPE           CLUSTER-IP | EXTERNAL-IP   |  PORT(S)                      AGE
ingress-nginx-controller   LoadBalancer   10.0.0.244 | XX.XXX.XXX.XX |  80:30984/TCP,443:31758/TCP   19m
                                                     |^^^^^^^^^^^^^^^|

EXTERNAL-IP may be 'pending' for a while until your cloud provider has created a new load balancer.

#########################################################################################################

The command will wait until loft is reachable under the host. You can also abort and use port-forwarding instead
by running 'loft start' again.
"#
    )
}

/// Wait until loft answers on `https://<host>`, printing DNS instructions if it
/// doesn't right away.
///
/// Connection errors and non-200 answers keep the wait going; a malformed
/// `/version` body ends it.
pub async fn await_remote(probe: &dyn ReachabilityProbe, host: &str) -> Result<String> {
    let url = ConnectivityTarget::Remote {
        host: host.to_string(),
    }
    .url();

    if !probe.probe(&url).await? {
        println!("{}", dns_instructions(host));
        info!("Waiting for you to configure DNS, so loft can be reached on {}", url);

        let target = url.as_str();
        poll_immediate(DNS_PROPAGATION, "DNS configuration", || async move {
            match probe.probe(target).await {
                Err(e @ Error::BadResponse { .. }) => Err(e),
                Err(e) => {
                    debug!(error = %e, "probe failed");
                    Ok(false)
                }
                ok => ok,
            }
        })
        .await?;
    }

    info!("loft is reachable at {}", url);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::MockReachabilityProbe;

    #[test]
    fn target_urls() {
        assert_eq!(
            ConnectivityTarget::Remote {
                host: "loft.example.com".to_string()
            }
            .url(),
            "https://loft.example.com"
        );
        assert_eq!(
            ConnectivityTarget::Local {
                port: "9898".to_string()
            }
            .url(),
            "https://localhost:9898"
        );
    }

    #[test]
    fn remote_report_names_login_command() {
        let report = StartReport::Remote {
            url: "https://loft.example.com".to_string(),
            password: "pw".to_string(),
        };
        let text = console::strip_ansi_codes(&report.render()).to_string();
        assert!(text.contains("Username: admin"));
        assert!(text.contains("Password: pw"));
        assert!(text.contains("loft login --insecure https://loft.example.com"));
        assert!(text.contains("administration/ssl"));
    }

    #[test]
    fn dns_instructions_name_the_host() {
        assert!(dns_instructions("loft.example.com").contains("A-record for loft.example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn reachable_host_skips_dns_wait() {
        let mut probe = MockReachabilityProbe::new();
        probe
            .expect_probe()
            .withf(|url| url == "https://loft.example.com")
            .times(1)
            .returning(|_| Ok(true));

        let url = await_remote(&probe, "loft.example.com").await.unwrap();
        assert_eq!(url, "https://loft.example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn dns_wait_swallows_connection_failures() {
        let mut probe = MockReachabilityProbe::new();
        let mut calls = 0;
        probe.expect_probe().times(4).returning(move |_| {
            calls += 1;
            match calls {
                1 | 2 => Ok(false),
                3 => Err(Error::Other("connection refused".to_string())),
                _ => Ok(true),
            }
        });

        let start = tokio::time::Instant::now();
        await_remote(&probe, "loft.example.com").await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_body_ends_dns_wait() {
        let mut probe = MockReachabilityProbe::new();
        let mut calls = 0;
        probe.expect_probe().times(2).returning(move |url| {
            calls += 1;
            if calls == 1 {
                Ok(false)
            } else {
                Err(Error::bad_response(url, "{}"))
            }
        });

        let err = await_remote(&probe, "loft.example.com").await.unwrap_err();
        assert!(matches!(err, Error::BadResponse { .. }));
    }
}

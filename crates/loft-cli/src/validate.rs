//! Validation of operator input and classification of the cluster endpoint.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
#[cfg(test)]
use mockall::automock;
use regex::Regex;
use tracing::{debug, warn};
use url::{Host, Url};

use crate::{Error, Result};

/// Where the cluster API server appears to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterLocation {
    Local,
    Remote,
}

/// Classify a cluster API endpoint URL.
///
/// Private, loopback, link-local and IPv6 unique-local addresses, `localhost`,
/// and names under `.internal` or `.localhost` are local. Everything else,
/// including endpoints that fail to parse, is remote.
pub fn classify_endpoint(endpoint: &str) -> ClusterLocation {
    let url = match Url::parse(endpoint) {
        Ok(url) => url,
        Err(e) => {
            warn!("Couldn't parse kube context host url {}: {}", endpoint, e);
            return ClusterLocation::Remote;
        }
    };

    let local = match url.host() {
        Some(Host::Ipv4(ip)) => is_local_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_local_ip(IpAddr::V6(ip)),
        Some(Host::Domain(name)) => match name.parse::<IpAddr>() {
            Ok(ip) => is_local_ip(ip),
            Err(_) => is_local_name(name),
        },
        None => false,
    };

    if local {
        ClusterLocation::Local
    } else {
        ClusterLocation::Remote
    }
}

fn is_local_name(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "localhost" || name.ends_with(".internal") || name.ends_with(".localhost")
}

fn is_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_local_v4(v4),
            None => is_local_v6(v6),
        },
    }
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local()
}

fn is_local_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    // fc00::/7 unique local, fe80::/10 link local
    ip.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

const HOSTNAME_HINT: &str = "Please enter a valid hostname without protocol (https://), without path and without port, e.g. loft.my-domain.tld";

/// Validate a bare hostname: no scheme, no path, no port, and at least two
/// non-empty dot-separated labels.
pub fn validate_hostname(answer: &str) -> Result<()> {
    let invalid = || Error::validation(HOSTNAME_HINT);

    if answer.is_empty()
        || answer.contains("://")
        || answer.contains(['/', ':', '?', '#', '@'])
        || answer.chars().any(char::is_whitespace)
    {
        return Err(invalid());
    }

    let labels: Vec<&str> = answer.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(invalid());
    }

    let url = Url::parse(&format!("https://{}", answer)).map_err(|_| invalid())?;
    match url.host() {
        Some(Host::Domain(_)) | Some(Host::Ipv4(_)) => {}
        _ => return Err(invalid()),
    }
    if url.path() != "/" || url.port().is_some() {
        return Err(invalid());
    }

    Ok(())
}

fn email_regex() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^@]+@[^\.]+\..+$").ok())
        .as_ref()
}

/// Check the shape `localpart@domain.tld`.
pub fn validate_email_shape(email: &str) -> Result<()> {
    if email_regex().is_some_and(|re| re.is_match(email)) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "{} is not a valid email address",
            email
        )))
    }
}

/// Looks up mail exchange records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MailDomainResolver: Send + Sync {
    /// Whether `domain` has at least one MX record
    async fn has_mail_exchange(&self, domain: &str) -> bool;
}

/// Validate an admin email: regex shape first, then a live MX lookup on the
/// domain.
pub async fn validate_email(resolver: &dyn MailDomainResolver, email: &str) -> Result<()> {
    validate_email_shape(email)?;

    let domain = email.split('@').nth(1).unwrap_or_default();
    if !resolver.has_mail_exchange(domain).await {
        return Err(Error::validation(format!(
            "{} is not a valid email address",
            email
        )));
    }
    Ok(())
}

// =============================================================================
// Real Implementation
// =============================================================================

/// MX lookups through the system resolver configuration
pub struct DnsMailResolver {
    resolver: TokioAsyncResolver,
}

impl DnsMailResolver {
    pub fn from_system_conf() -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::Other(format!("failed to load resolver config: {}", e)))?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl MailDomainResolver for DnsMailResolver {
    async fn has_mail_exchange(&self, domain: &str) -> bool {
        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => lookup.iter().next().is_some(),
            Err(e) => {
                debug!(domain, error = %e, "MX lookup failed");
                false
            }
        }
    }
}

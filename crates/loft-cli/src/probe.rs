//! Reachability probe against loft's unauthenticated `/version` endpoint.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tracing::debug;

use crate::{Error, Result};

/// Per-request timeout for a single probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    version: String,
}

/// Checks whether a loft instance answers on a base URL
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// `Ok(true)` when `<base_url>/version` answers 200 with a version,
    /// `Ok(false)` for connection errors and non-200 statuses, and
    /// `Err(BadResponse)` for a 200 whose body is not a usable version.
    async fn probe(&self, base_url: &str) -> Result<bool>;
}

/// Probe over HTTPS without certificate verification
pub struct HttpsProbe {
    client: reqwest::Client,
}

impl HttpsProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(PROBE_TIMEOUT)
            .connect_timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| Error::Other(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpsProbe {
    async fn probe(&self, base_url: &str) -> Result<bool> {
        let url = format!("{}/version", base_url.trim_end_matches('/'));

        let resp = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(url = %url, error = %e, "probe failed");
                return Ok(false);
            }
        };
        if resp.status() != reqwest::StatusCode::OK {
            debug!(url = %url, status = %resp.status(), "probe not ready");
            return Ok(false);
        }

        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(url = %url, error = %e, "probe body read failed");
                return Ok(false);
            }
        };

        parse_version_body(&url, &body).map(|_| true)
    }
}

/// Extract the version from a 200 `/version` body.
pub fn parse_version_body(url: &str, body: &str) -> Result<String> {
    let parsed: VersionResponse = serde_json::from_str(body)
        .map_err(|e| Error::bad_response(url, format!("error decoding response: {}", e)))?;
    if parsed.version.is_empty() {
        return Err(Error::bad_response(url, body.to_string()));
    }
    Ok(parsed.version)
}

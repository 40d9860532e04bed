//! Build version and the newer-release check.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use regex::Regex;
use semver::Version;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::{Error, Result};

const LATEST_RELEASE_URL: &str = "https://api.github.com/repos/loft-sh/loft/releases/latest";

fn version_regex() -> Option<&'static Regex> {
    static VERSION: OnceLock<Option<Regex>> = OnceLock::new();
    VERSION
        .get_or_init(|| Regex::new(r"\d+\.\d+\.\d+").ok())
        .as_ref()
}

/// Strip anything before the first `x.y.z`, e.g. `v1.2.3` becomes `1.2.3`.
pub fn erase_version_prefix(raw: &str) -> Option<&str> {
    version_regex()?.find(raw).map(|m| &raw[m.start()..])
}

/// Version of the running binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub raw: String,
    /// `None` when `raw` does not contain a semver version
    pub version: Option<Version>,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self::parse(env!("CARGO_PKG_VERSION"))
    }

    pub fn parse(raw: &str) -> Self {
        let version = erase_version_prefix(raw).and_then(|v| Version::parse(v).ok());
        if version.is_none() {
            debug!(raw, "build version is not semver");
        }
        Self {
            raw: raw.to_string(),
            version,
        }
    }
}

/// Source of the latest published release tag
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn latest_tag(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: String,
}

/// GitHub releases API for `loft-sh/loft`
pub struct GithubReleases {
    client: reqwest::Client,
}

impl GithubReleases {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("loft-cli/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Other(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReleaseSource for GithubReleases {
    async fn latest_tag(&self) -> Result<String> {
        let resp = self
            .client
            .get(LATEST_RELEASE_URL)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Other(format!("release lookup failed: {}", e)))?;
        let release: LatestRelease = resp
            .json()
            .await
            .map_err(|e| Error::Other(format!("release lookup failed: {}", e)))?;
        Ok(release.tag_name)
    }
}

/// Looks up the latest release at most once per process.
pub struct UpdateCheck {
    source: Arc<dyn ReleaseSource>,
    latest: OnceCell<Option<Version>>,
}

impl UpdateCheck {
    pub fn new(source: Arc<dyn ReleaseSource>) -> Self {
        Self {
            source,
            latest: OnceCell::new(),
        }
    }

    /// Latest published version, or `None` if it could not be determined.
    pub async fn latest(&self) -> Option<&Version> {
        self.latest
            .get_or_init(|| async {
                match self.source.latest_tag().await {
                    Ok(tag) => erase_version_prefix(&tag).and_then(|v| Version::parse(v).ok()),
                    Err(e) => {
                        debug!(error = %e, "latest release lookup failed");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    /// The latest version if it is strictly newer than `build`.
    pub async fn newer_than(&self, build: &BuildInfo) -> Option<Version> {
        let current = build.version.as_ref()?;
        self.latest()
            .await
            .filter(|latest| *latest > current)
            .cloned()
    }

    pub async fn warn_if_outdated(&self, build: &BuildInfo) {
        if let Some(latest) = self.newer_than(build).await {
            warn!(
                "There is a newer version of loft: v{} (running {})",
                latest, build.raw
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_erased() {
        assert_eq!(erase_version_prefix("v1.2.3"), Some("1.2.3"));
        assert_eq!(erase_version_prefix("loft-0.3.1-beta.1"), Some("0.3.1-beta.1"));
        assert_eq!(erase_version_prefix("1.0"), None);
    }

    #[test]
    fn build_info_parses_semver() {
        let info = BuildInfo::parse("v0.4.2");
        assert_eq!(info.raw, "v0.4.2");
        assert_eq!(info.version, Some(Version::new(0, 4, 2)));
        assert_eq!(BuildInfo::parse("dev").version, None);
    }

    #[tokio::test]
    async fn latest_release_is_looked_up_once() {
        let mut source = MockReleaseSource::new();
        source
            .expect_latest_tag()
            .times(1)
            .returning(|| Ok("v9.0.0".to_string()));

        let check = UpdateCheck::new(Arc::new(source));
        let build = BuildInfo::parse("1.0.0");

        assert_eq!(check.newer_than(&build).await, Some(Version::new(9, 0, 0)));
        assert_eq!(check.newer_than(&build).await, Some(Version::new(9, 0, 0)));
    }

    #[tokio::test]
    async fn same_or_older_release_is_not_newer() {
        let mut source = MockReleaseSource::new();
        source
            .expect_latest_tag()
            .returning(|| Ok("v1.0.0".to_string()));

        let check = UpdateCheck::new(Arc::new(source));
        assert_eq!(check.newer_than(&BuildInfo::parse("1.0.0")).await, None);
        assert_eq!(check.newer_than(&BuildInfo::parse("1.2.0")).await, None);
    }

    #[tokio::test]
    async fn lookup_failure_is_ignored() {
        let mut source = MockReleaseSource::new();
        source
            .expect_latest_tag()
            .times(1)
            .returning(|| Err(Error::Other("rate limited".to_string())));

        let check = UpdateCheck::new(Arc::new(source));
        assert_eq!(check.newer_than(&BuildInfo::parse("1.0.0")).await, None);
        assert!(check.latest().await.is_none());
    }
}

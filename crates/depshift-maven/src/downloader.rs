use crate::error::FetchError;
use crate::http::HttpFetcher;
use crate::remote::{diagnostic_for, group_path};
use crate::throttle::Throttle;
use async_trait::async_trait;
use dashmap::DashMap;
use depshift_core::{
    ArtifactDownloader, Coordinate, DepShiftConfig, DiagnosticsSink, TracingSink,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// `<root>/<group path>/<artifact>/<version>/<artifact>-<version>.<extension>`
pub fn artifact_path(root: &Path, coordinate: &Coordinate, extension: &str) -> PathBuf {
    root.join(group_path(&coordinate.group))
        .join(&coordinate.artifact)
        .join(&coordinate.version)
        .join(format!(
            "{}-{}.{}",
            coordinate.artifact, coordinate.version, extension
        ))
}

/// Inverse of [`artifact_path`] for an archive below `root`.
pub fn coordinate_from_path(root: &Path, archive: &Path) -> Option<Coordinate> {
    let relative = archive.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    let [group @ .., artifact, version, file] = parts.as_slice() else {
        return None;
    };
    if group.is_empty() || !file.starts_with(&format!("{}-{}", artifact, version)) {
        return None;
    }
    Some(Coordinate::new(group.join("."), *artifact, *version))
}

/// Fetches binary archives from a Maven 2 repository into a local tree laid
/// out like the repository itself.
pub struct MavenDownloader {
    http: HttpFetcher,
    repository_url: String,
    throttle: Throttle,
    diagnostics: Arc<dyn DiagnosticsSink>,
    /// One lock per archive path being fetched.
    inflight: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl MavenDownloader {
    pub fn new(http: HttpFetcher, repository_url: impl Into<String>, throttle: Throttle) -> Self {
        Self {
            http,
            repository_url: repository_url.into().trim_end_matches('/').to_string(),
            throttle,
            diagnostics: Arc::new(TracingSink),
            inflight: DashMap::new(),
        }
    }

    pub fn from_config(config: &DepShiftConfig) -> crate::Result<Self> {
        Ok(Self::new(
            HttpFetcher::new(&config.network)?,
            config.source.repository_url.clone(),
            Throttle::per_second("repository", config.network.repository_qps),
        ))
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn archive_url(&self, coordinate: &Coordinate) -> String {
        format!(
            "{}/{}/{}/{}/{}-{}.jar",
            self.repository_url,
            group_path(&coordinate.group),
            coordinate.artifact,
            coordinate.version,
            coordinate.artifact,
            coordinate.version
        )
    }

    async fn download(&self, coordinate: &Coordinate, target: &Path) -> Result<u64, FetchError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.http
            .download(&self.archive_url(coordinate), &self.throttle, target)
            .await
    }
}

#[async_trait]
impl ArtifactDownloader for MavenDownloader {
    async fn fetch(&self, coordinate: &Coordinate, destination: &Path) -> Option<PathBuf> {
        let target = artifact_path(destination, coordinate, "jar");
        let lock = self.inflight.entry(target.clone()).or_default().clone();
        let _guard = lock.lock().await;

        let fetched = if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!(artifact = %coordinate, path = %target.display(), "Archive already present");
            Some(target.clone())
        } else {
            match self.download(coordinate, &target).await {
                Ok(bytes) => {
                    info!(artifact = %coordinate, bytes, "Downloaded archive");
                    Some(target.clone())
                }
                Err(e) => {
                    self.diagnostics
                        .report(diagnostic_for(&coordinate.to_string(), &e));
                    None
                }
            }
        };
        self.inflight.remove(&target);
        fetched
    }
}

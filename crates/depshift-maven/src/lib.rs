pub mod downloader;
pub mod error;
pub mod http;
pub mod local;
pub mod pom;
pub mod remote;
pub mod retry;
pub mod throttle;
pub mod usage;

pub use downloader::*;
pub use error::*;
pub use http::*;
pub use local::*;
pub use remote::RemoteSource;
pub use retry::*;
pub use throttle::*;

use depshift_core::{ArtifactDownloader, ArtifactSource, DepShiftConfig, DiagnosticsSink};
use std::sync::Arc;
use tracing::info;

/// The source and downloader selected by configuration.
///
/// Both share one HTTP client and one repository throttle so the configured
/// rate holds across metadata lookups and archive downloads.
pub struct MavenBackend {
    pub source: Arc<dyn ArtifactSource>,
    pub downloader: Arc<dyn ArtifactDownloader>,
}

impl MavenBackend {
    pub fn from_config(
        config: &DepShiftConfig,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Result<Self> {
        let http = HttpFetcher::new(&config.network)?;
        let repository = Throttle::per_second("repository", config.network.repository_qps);

        let downloader = MavenDownloader::new(
            http.clone(),
            config.source.repository_url.clone(),
            repository.clone(),
        )
        .with_diagnostics(diagnostics.clone());

        let source: Arc<dyn ArtifactSource> = match config.source.kind.as_str() {
            "local" => Arc::new(LocalSource::from_config(config).with_diagnostics(diagnostics)),
            _ => Arc::new(
                RemoteSource::new(
                    http,
                    config.source.repository_url.clone(),
                    config.source.usage_url.clone(),
                    repository,
                    Throttle::per_second("usage", config.network.scrape_qps),
                )
                .with_diagnostics(diagnostics),
            ),
        };
        info!(source = source.name(), "Artifact source ready");

        Ok(Self {
            source,
            downloader: Arc::new(downloader),
        })
    }
}

use crate::error::{FetchError, Result};
use crate::http::HttpFetcher;
use crate::pom::{parse_metadata_versions, parse_pom, Pom};
use crate::throttle::Throttle;
use crate::usage::{parse_usage_page, usage_pages};
use async_trait::async_trait;
use depshift_core::{
    ArtifactSource, Coordinate, DepShiftConfig, Diagnostic, DiagnosticKind, DiagnosticsSink,
    TracingSink, UnversionedCoordinate,
};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Maps a failed lookup to the diagnostic it is reported as.
pub(crate) fn diagnostic_for(subject: &str, error: &FetchError) -> Diagnostic {
    let kind = match error {
        FetchError::NotFound(_) | FetchError::Http { .. } => DiagnosticKind::NotFound,
        FetchError::Parse { .. } => DiagnosticKind::MalformedInput,
        _ => DiagnosticKind::Transient,
    };
    Diagnostic::new(kind, subject, error.to_string())
}

pub(crate) fn group_path(group: &str) -> String {
    group.replace('.', "/")
}

/// Live source: a Maven 2 repository for versions and POMs, plus a usage
/// listing site for reverse dependencies.
pub struct RemoteSource {
    http: HttpFetcher,
    repository_url: String,
    usage_url: String,
    repository: Throttle,
    scrape: Throttle,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl RemoteSource {
    pub fn new(
        http: HttpFetcher,
        repository_url: impl Into<String>,
        usage_url: impl Into<String>,
        repository: Throttle,
        scrape: Throttle,
    ) -> Self {
        Self {
            http,
            repository_url: repository_url.into().trim_end_matches('/').to_string(),
            usage_url: usage_url.into().trim_end_matches('/').to_string(),
            repository,
            scrape,
            diagnostics: Arc::new(TracingSink),
        }
    }

    pub fn from_config(config: &DepShiftConfig) -> Result<Self> {
        let http = HttpFetcher::new(&config.network)?;
        Ok(Self::new(
            http,
            config.source.repository_url.clone(),
            config.source.usage_url.clone(),
            Throttle::per_second("repository", config.network.repository_qps),
            Throttle::per_second("usage", config.network.scrape_qps),
        ))
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn metadata_url(&self, library: &UnversionedCoordinate) -> String {
        format!(
            "{}/{}/{}/maven-metadata.xml",
            self.repository_url,
            group_path(&library.group),
            library.artifact
        )
    }

    pub fn pom_url(&self, coordinate: &Coordinate) -> String {
        format!(
            "{}/{}/{}/{}/{}-{}.pom",
            self.repository_url,
            group_path(&coordinate.group),
            coordinate.artifact,
            coordinate.version,
            coordinate.artifact,
            coordinate.version
        )
    }

    pub fn usage_page_url(&self, library: &Coordinate, page: u32) -> String {
        format!(
            "{}/artifact/{}/{}/{}/usages?p={}",
            self.usage_url, library.group, library.artifact, library.version, page
        )
    }

    pub async fn pom(&self, coordinate: &Coordinate) -> Result<Pom> {
        let xml = self
            .http
            .get_text(&self.pom_url(coordinate), &self.repository)
            .await?;
        let pom = parse_pom(&xml);
        if pom.coordinate.is_none() && pom.dependencies.is_empty() {
            return Err(FetchError::Parse {
                what: format!("POM of {}", coordinate),
                reason: "no project coordinates".to_string(),
            });
        }
        Ok(pom)
    }

    async fn listed_clients(&self, library: &Coordinate, page: u32) -> Vec<UnversionedCoordinate> {
        let url = self.usage_page_url(library, page);
        match self.http.get_text(&url, &self.scrape).await {
            Ok(html) => parse_usage_page(&html),
            Err(FetchError::NotFound(_)) => Vec::new(),
            Err(e) => {
                self.diagnostics.report(diagnostic_for(&url, &e));
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ArtifactSource for RemoteSource {
    fn name(&self) -> &str {
        "remote"
    }

    async fn available_versions(&self, library: &UnversionedCoordinate) -> Vec<Coordinate> {
        match self
            .http
            .get_text(&self.metadata_url(library), &self.repository)
            .await
        {
            Ok(xml) => parse_metadata_versions(&xml)
                .into_iter()
                .map(|v| library.with_version(v))
                .collect(),
            Err(e) => {
                self.diagnostics
                    .report(diagnostic_for(&library.to_string(), &e));
                Vec::new()
            }
        }
    }

    async fn clients_of(&self, library: &Coordinate) -> Vec<Coordinate> {
        let mut pages = Box::pin(usage_pages(|page| self.listed_clients(library, page)));

        let mut clients = Vec::new();
        let mut listed = 0usize;
        while let Some(page) = pages.next().await {
            for candidate in page {
                listed += 1;
                for version in self.available_versions(&candidate).await {
                    if self.dependencies_of(&version).await.contains(library) {
                        clients.push(version);
                    }
                }
            }
        }

        info!(
            library = %library,
            listed,
            clients = clients.len(),
            "Resolved client versions"
        );
        clients
    }

    async fn exists(&self, coordinate: &Coordinate) -> bool {
        match self
            .http
            .probe(&self.pom_url(coordinate), &self.repository)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                self.diagnostics
                    .report(diagnostic_for(&coordinate.to_string(), &e));
                false
            }
        }
    }

    async fn dependencies_of(&self, artifact: &Coordinate) -> Vec<Coordinate> {
        match self.pom(artifact).await {
            Ok(pom) => {
                let dependencies: Vec<Coordinate> = pom.compile_dependencies().cloned().collect();
                debug!(artifact = %artifact, count = dependencies.len(), "Read POM");
                dependencies
            }
            Err(e) => {
                self.diagnostics
                    .report(diagnostic_for(&artifact.to_string(), &e));
                Vec::new()
            }
        }
    }
}

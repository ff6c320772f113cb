//! Sequences collection, matrix building, ranking, downloading and diffing
//! against the injected collaborators.

use crate::{
    export, AnalysisConfig, ApiNamespace, ArtifactDownloader, ArtifactSnapshot, ArtifactSource,
    CallGraphDiffer, ClientLink, CodeModelExtractor, Coordinate, DatasetStats, DepShiftError,
    DependencyDelta, Diagnostic, DiagnosticKind, DiagnosticsSink, DiffRequest,
    MigrationCandidate, MigrationCandidateRanker, MigrationTuple, Result, UnversionedCoordinate,
    UsageMatrix, UsageMatrixBuilder,
};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const LIBRARIES_DIR: &str = "libraries";
pub const CLIENTS_DIR: &str = "clients";
pub const MIGRATIONS_DIR: &str = "migrations";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub dataset_path: PathBuf,
    pub diff_concurrency: usize,
    pub top_candidates: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&AnalysisConfig::default())
    }
}

impl From<&AnalysisConfig> for PipelineOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            dataset_path: config.dataset_path.clone(),
            diff_concurrency: config.diff_concurrency.max(1),
            top_candidates: config.top_candidates,
        }
    }
}

/// Which library versions a collection covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelection {
    All,
    /// Links of one version only; no matrix or ranking.
    Single(String),
    /// Two versions, both checked for existence first.
    Pair(String, String),
}

#[derive(Debug, Clone)]
pub struct CollectedDataset {
    pub library: UnversionedCoordinate,
    pub selection: VersionSelection,
    pub versions: Vec<Coordinate>,
    pub links: Vec<ClientLink>,
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub dataset: CollectedDataset,
    pub matrix: Option<UsageMatrix>,
    pub candidates: Vec<MigrationCandidate>,
    pub stats: DatasetStats,
    pub output_dir: PathBuf,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadScope {
    /// Library jars of the first candidate and its migrated clients.
    TopCandidate,
    /// Every library version and the clients of every candidate.
    AllCandidates,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub fetched: Vec<PathBuf>,
    pub unavailable: Vec<Coordinate>,
}

#[derive(Debug, Clone)]
pub struct PairReport {
    pub client_old: Coordinate,
    pub client_new: Coordinate,
    pub delta: DependencyDelta,
    pub tuples: Vec<MigrationTuple>,
    /// Written tuple file; `None` when the pair was skipped.
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Sorted by `(client_old, client_new)`.
    pub pairs: Vec<PairReport>,
    pub skipped: usize,
    pub cancelled: bool,
}

impl MigrationReport {
    pub fn tuple_count(&self) -> usize {
        self.pairs.iter().map(|p| p.tuples.len()).sum()
    }

    pub fn tuples(&self) -> impl Iterator<Item = &MigrationTuple> {
        self.pairs.iter().flat_map(|p| p.tuples.iter())
    }
}

pub struct MigrationPipeline {
    source: Arc<dyn ArtifactSource>,
    downloader: Arc<dyn ArtifactDownloader>,
    differ: CallGraphDiffer,
    diagnostics: Arc<dyn DiagnosticsSink>,
    options: PipelineOptions,
    cancel: CancellationToken,
}

impl MigrationPipeline {
    pub fn new(
        source: Arc<dyn ArtifactSource>,
        downloader: Arc<dyn ArtifactDownloader>,
        extractor: Arc<dyn CodeModelExtractor>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            downloader,
            differ: CallGraphDiffer::new(extractor),
            diagnostics,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn source(&self) -> &dyn ArtifactSource {
        self.source.as_ref()
    }

    /// Output directory of one library: `<dataset>/<group>_<artifact>`.
    pub fn library_dir(&self, library: &UnversionedCoordinate) -> PathBuf {
        self.options
            .dataset_path
            .join(format!("{}_{}", library.group, library.artifact))
    }

    fn report(&self, kind: DiagnosticKind, subject: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.report(Diagnostic::new(kind, subject, message));
    }

    pub async fn collect(
        &self,
        library: &UnversionedCoordinate,
        selection: VersionSelection,
    ) -> Result<CollectedDataset> {
        let versions = match &selection {
            VersionSelection::All => self.source.available_versions(library).await,
            VersionSelection::Single(v) => {
                let coordinate = library.with_version(v.as_str());
                if !self.source.exists(&coordinate).await {
                    return Err(DepShiftError::NotFound(coordinate.to_string()));
                }
                vec![coordinate]
            }
            VersionSelection::Pair(v1, v2) => {
                let pair = [library.with_version(v1.as_str()), library.with_version(v2.as_str())];
                for coordinate in &pair {
                    if !self.source.exists(coordinate).await {
                        return Err(DepShiftError::NotFound(coordinate.to_string()));
                    }
                }
                pair.to_vec()
            }
        };
        info!(library = %library, versions = versions.len(), "Collected versions");

        let mut links = Vec::new();
        if self.cancel.is_cancelled() {
            info!("Collection cancelled before client lookup");
        } else if selection == VersionSelection::All {
            // Links to versions the source no longer lists are dropped.
            let known: HashSet<&Coordinate> = versions.iter().collect();
            links = self
                .source
                .clients_of_any(library)
                .await
                .into_iter()
                .filter(|link| known.contains(&link.library))
                .collect();
        } else {
            for version in &versions {
                if self.cancel.is_cancelled() {
                    info!("Collection cancelled, keeping clients found so far");
                    break;
                }
                let clients = self.source.clients_of(version).await;
                debug!(version = %version, clients = clients.len(), "Collected clients");
                links.extend(
                    clients
                        .into_iter()
                        .map(|client| ClientLink::new(version.clone(), client)),
                );
            }
        }
        info!(library = %library, links = links.len(), "Collected client links");

        Ok(CollectedDataset {
            library: library.clone(),
            selection,
            versions,
            links,
        })
    }

    /// Collects, builds the matrix, ranks and writes the outputs of one
    /// library. A single-version selection only writes `links.csv`.
    pub async fn analyze(
        &self,
        library: &UnversionedCoordinate,
        selection: VersionSelection,
    ) -> Result<AnalysisReport> {
        let dataset = self.collect(library, selection).await?;
        let output_dir = self.library_dir(library);
        export::write_links(&output_dir, &dataset.links)?;

        let (matrix, candidates) = if matches!(dataset.selection, VersionSelection::Single(_)) {
            (None, Vec::new())
        } else {
            let matrix = UsageMatrixBuilder::new().build(&dataset.versions, &dataset.links)?;
            let candidates = MigrationCandidateRanker::new().rank_until_cancelled(
                matrix.library_versions(),
                &matrix,
                matrix.clients(),
                &self.cancel,
            );
            export::write_matrix(&output_dir, &matrix)?;
            export::write_candidates(&output_dir, &candidates)?;
            (Some(matrix), candidates)
        };

        let stats = DatasetStats::compute(&dataset.versions, &dataset.links, &candidates);
        info!(
            library = %library,
            versions = stats.version_count,
            clients = stats.client_count,
            candidates = candidates.len(),
            output = %output_dir.display(),
            "Analysis complete"
        );

        Ok(AnalysisReport {
            dataset,
            matrix,
            candidates,
            stats,
            output_dir,
            cancelled: self.cancel.is_cancelled(),
        })
    }

    async fn fetch_into(&self, coordinate: &Coordinate, dir: &Path, summary: &mut DownloadSummary) {
        match self.downloader.fetch(coordinate, dir).await {
            Some(path) => summary.fetched.push(path),
            None => {
                self.report(DiagnosticKind::NotFound, coordinate.to_string(), "archive unavailable");
                summary.unavailable.push(coordinate.clone());
            }
        }
    }

    /// Downloads the library and client archives an analysis points at.
    pub async fn download(&self, report: &AnalysisReport, scope: DownloadScope) -> DownloadSummary {
        let libraries_dir = report.output_dir.join(LIBRARIES_DIR);
        let clients_dir = report.output_dir.join(CLIENTS_DIR);

        let mut libraries: Vec<&Coordinate> = Vec::new();
        let mut clients: Vec<&Coordinate> = Vec::new();

        if let VersionSelection::Single(_) = report.dataset.selection {
            libraries.extend(report.dataset.versions.iter());
            clients.extend(report.dataset.links.iter().map(|link| &link.client));
        } else {
            let candidates: &[MigrationCandidate] = match scope {
                DownloadScope::TopCandidate => &report.candidates[..report.candidates.len().min(1)],
                DownloadScope::AllCandidates => {
                    libraries.extend(report.dataset.versions.iter());
                    &report.candidates
                }
            };
            for candidate in candidates {
                libraries.push(&candidate.v1);
                libraries.push(&candidate.v2);
                clients.extend(candidate.clients_at_v1.iter());
                clients.extend(candidate.clients_at_v2.iter());
            }
        }

        let mut seen = HashSet::new();
        let mut summary = DownloadSummary::default();
        let queue = libraries
            .into_iter()
            .map(|c| (c, libraries_dir.as_path()))
            .chain(clients.into_iter().map(|c| (c, clients_dir.as_path())));
        for (coordinate, dir) in queue {
            if !seen.insert((coordinate, dir)) {
                continue;
            }
            if self.cancel.is_cancelled() {
                info!("Download cancelled");
                break;
            }
            self.fetch_into(coordinate, dir, &mut summary).await;
        }

        info!(
            fetched = summary.fetched.len(),
            unavailable = summary.unavailable.len(),
            "Download complete"
        );
        summary
    }

    async fn library_namespace(&self, library: &Coordinate, dir: &Path) -> Option<ApiNamespace> {
        let Some(path) = self.downloader.fetch(library, dir).await else {
            self.report(DiagnosticKind::NotFound, library.to_string(), "library archive unavailable");
            return None;
        };
        match self.differ.namespace_of(&ArtifactSnapshot::new(library.clone(), path)).await {
            Ok(namespace) => Some(namespace),
            Err(e) => {
                self.report(DiagnosticKind::ExtractionFailure, library.to_string(), e.to_string());
                None
            }
        }
    }

    /// Diffs one client pair for every dependency that changed between the
    /// two versions and writes the tuples into `output_dir`.
    pub async fn migrate_client_pair(
        &self,
        client_old: &Coordinate,
        client_new: &Coordinate,
        output_dir: &Path,
    ) -> Result<PairReport> {
        let subject = format!("{} -> {}", client_old, client_new);
        let deps_old = self.source.dependencies_of(client_old).await;
        let deps_new = self.source.dependencies_of(client_new).await;
        let delta = DependencyDelta::compute(&deps_old, &deps_new);
        debug!(
            pair = %subject,
            removed = delta.removed.len(),
            added = delta.added.len(),
            updated = delta.updated.len(),
            "Computed dependency delta"
        );

        let mut report = PairReport {
            client_old: client_old.clone(),
            client_new: client_new.clone(),
            delta,
            tuples: Vec::new(),
            output: None,
        };

        let libraries_dir = output_dir.join(LIBRARIES_DIR);
        let clients_dir = output_dir.join(CLIENTS_DIR);

        let (Some(path_old), Some(path_new)) = (
            self.downloader.fetch(client_old, &clients_dir).await,
            self.downloader.fetch(client_new, &clients_dir).await,
        ) else {
            self.report(DiagnosticKind::DiffSkipped, &subject, "client archive unavailable");
            return Ok(report);
        };
        let snapshot_old = ArtifactSnapshot::new(client_old.clone(), path_old);
        let snapshot_new = ArtifactSnapshot::new(client_new.clone(), path_new);

        for affected in report.delta.affected() {
            if self.cancel.is_cancelled() {
                return Err(DepShiftError::Cancelled);
            }
            let Some(namespace) = self.library_namespace(&affected.library, &libraries_dir).await
            else {
                continue;
            };
            let request = DiffRequest {
                client_old: client_old.clone(),
                client_new: client_new.clone(),
                affected_lib: affected.library.unversioned(),
                change: affected.change,
            };
            match self
                .differ
                .diff(&request, &snapshot_old, &snapshot_new, &namespace)
                .await
            {
                Ok(tuples) => report.tuples.extend(tuples),
                Err(e) => {
                    // Both call graphs are shared by every affected library.
                    self.report(DiagnosticKind::DiffSkipped, &subject, e.to_string());
                    report.tuples.clear();
                    return Ok(report);
                }
            }
        }

        let migrations_dir = output_dir.join(MIGRATIONS_DIR);
        report.output = Some(export::write_tuples(
            &migrations_dir,
            client_old,
            client_new,
            &report.tuples,
        )?);
        info!(pair = %subject, tuples = report.tuples.len(), "Diffed client pair");
        Ok(report)
    }

    /// Diffs many client pairs concurrently. Failed pairs are reported and
    /// left out; cancellation stops pairs that have not started yet.
    pub async fn migrate_pairs(
        &self,
        pairs: Vec<(Coordinate, Coordinate)>,
        output_dir: &Path,
    ) -> MigrationReport {
        let total = pairs.len();
        let outcomes: Vec<Option<PairReport>> = stream::iter(pairs)
            .map(|(old, new)| async move {
                if self.cancel.is_cancelled() {
                    return None;
                }
                match self.migrate_client_pair(&old, &new, output_dir).await {
                    Ok(report) => Some(report),
                    Err(DepShiftError::Cancelled) => None,
                    Err(e) => {
                        warn!(old = %old, new = %new, error = %e, "Client pair failed");
                        self.report(
                            DiagnosticKind::DiffSkipped,
                            format!("{} -> {}", old, new),
                            e.to_string(),
                        );
                        None
                    }
                }
            })
            .buffer_unordered(self.options.diff_concurrency.max(1))
            .collect()
            .await;

        let mut pairs: Vec<PairReport> = outcomes.into_iter().flatten().collect();
        pairs.sort_by(|a, b| (&a.client_old, &a.client_new).cmp(&(&b.client_old, &b.client_new)));
        let skipped = pairs.iter().filter(|p| p.output.is_none()).count() + (total - pairs.len());

        let report = MigrationReport {
            pairs,
            skipped,
            cancelled: self.cancel.is_cancelled(),
        };
        info!(
            pairs = total,
            tuples = report.tuple_count(),
            skipped = report.skipped,
            cancelled = report.cancelled,
            "Migration analysis complete"
        );
        report
    }

    /// Diffs the migrated clients of one ranked candidate.
    pub async fn migrate_candidate(
        &self,
        library: &UnversionedCoordinate,
        candidate: &MigrationCandidate,
        limit: Option<usize>,
    ) -> MigrationReport {
        let pairs: Vec<(Coordinate, Coordinate)> = candidate
            .client_pairs()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(old, new)| (old.clone(), new.clone()))
            .collect();
        info!(
            v1 = %candidate.v1,
            v2 = %candidate.v2,
            pairs = pairs.len(),
            "Diffing migrated clients"
        );
        self.migrate_pairs(pairs, &self.library_dir(library)).await
    }
}

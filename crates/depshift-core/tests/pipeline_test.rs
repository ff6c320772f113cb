use async_trait::async_trait;
use depshift_core::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn c(s: &str) -> Coordinate {
    s.parse().unwrap()
}

fn u(s: &str) -> UnversionedCoordinate {
    s.parse().unwrap()
}

#[derive(Default)]
struct MemorySource {
    versions: HashMap<UnversionedCoordinate, Vec<Coordinate>>,
    clients: HashMap<Coordinate, Vec<Coordinate>>,
    dependencies: HashMap<Coordinate, Vec<Coordinate>>,
}

#[async_trait]
impl ArtifactSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn available_versions(&self, library: &UnversionedCoordinate) -> Vec<Coordinate> {
        self.versions.get(library).cloned().unwrap_or_default()
    }

    async fn clients_of(&self, library: &Coordinate) -> Vec<Coordinate> {
        self.clients.get(library).cloned().unwrap_or_default()
    }

    async fn exists(&self, coordinate: &Coordinate) -> bool {
        self.versions
            .get(&coordinate.unversioned())
            .map_or(false, |vs| vs.contains(coordinate))
    }

    async fn dependencies_of(&self, artifact: &Coordinate) -> Vec<Coordinate> {
        self.dependencies.get(artifact).cloned().unwrap_or_default()
    }
}

/// Hands out a path for every coordinate not listed as missing.
#[derive(Default)]
struct MemoryDownloader {
    missing: HashSet<Coordinate>,
}

#[async_trait]
impl ArtifactDownloader for MemoryDownloader {
    async fn fetch(&self, coordinate: &Coordinate, destination: &Path) -> Option<PathBuf> {
        if self.missing.contains(coordinate) {
            return None;
        }
        Some(destination.join(format!("{}.jar", coordinate.file_stem())))
    }
}

#[derive(Default)]
struct MemoryExtractor {
    graphs: HashMap<Coordinate, Arc<CallGraph>>,
    declarations: HashMap<Coordinate, Arc<HashSet<String>>>,
}

#[async_trait]
impl CodeModelExtractor for MemoryExtractor {
    async fn declarations(&self, snapshot: &ArtifactSnapshot) -> Result<Arc<HashSet<String>>> {
        self.declarations
            .get(&snapshot.coordinate)
            .cloned()
            .ok_or_else(|| DepShiftError::Extraction(format!("no model for {}", snapshot.coordinate)))
    }

    async fn call_graph(&self, snapshot: &ArtifactSnapshot) -> Result<Arc<CallGraph>> {
        self.graphs
            .get(&snapshot.coordinate)
            .cloned()
            .ok_or_else(|| DepShiftError::Extraction(format!("no model for {}", snapshot.coordinate)))
    }
}

fn decls(ids: &[&str]) -> Arc<HashSet<String>> {
    Arc::new(ids.iter().map(|s| s.to_string()).collect())
}

/// `x:X` moves from `g:A:1.0` to `g:A:2.0` and drops `u:U:1` on the way.
fn scenario() -> (MemorySource, MemoryExtractor) {
    let mut source = MemorySource::default();
    source
        .versions
        .insert(u("g:A"), vec![c("g:A:1.0"), c("g:A:2.0")]);
    source.clients.insert(c("g:A:1.0"), vec![c("x:X:1.0"), c("y:Y:3")]);
    source.clients.insert(c("g:A:2.0"), vec![c("x:X:2.0"), c("y:Y:3")]);
    source
        .dependencies
        .insert(c("x:X:1.0"), vec![c("g:A:1.0"), c("u:U:1")]);
    source.dependencies.insert(c("x:X:2.0"), vec![c("g:A:2.0")]);

    let mut extractor = MemoryExtractor::default();
    extractor.graphs.insert(
        c("x:X:1.0"),
        Arc::new(CallGraph::from_facts([
            ("m1", "a.foo"),
            ("m2", "u.old"),
            ("m2", "z.keep"),
        ])),
    );
    extractor.graphs.insert(
        c("x:X:2.0"),
        Arc::new(CallGraph::from_facts([("m1", "a.bar"), ("m2", "z.keep")])),
    );
    extractor
        .declarations
        .insert(c("g:A:2.0"), decls(&["a.foo", "a.bar"]));
    extractor.declarations.insert(c("u:U:1"), decls(&["u.old"]));
    (source, extractor)
}

fn pipeline(
    source: MemorySource,
    downloader: MemoryDownloader,
    extractor: MemoryExtractor,
    sink: Arc<CollectingSink>,
    dataset: &Path,
) -> MigrationPipeline {
    MigrationPipeline::new(
        Arc::new(source),
        Arc::new(downloader),
        Arc::new(extractor),
        sink,
        PipelineOptions {
            dataset_path: dataset.to_path_buf(),
            diff_concurrency: 2,
            top_candidates: 5,
        },
    )
}

#[tokio::test]
async fn analyze_writes_matrix_links_and_candidates() {
    let dir = tempdir().unwrap();
    let (source, extractor) = scenario();
    let sink = Arc::new(CollectingSink::new());
    let pipeline = pipeline(source, MemoryDownloader::default(), extractor, sink, dir.path());

    let report = pipeline.analyze(&u("g:A"), VersionSelection::All).await.unwrap();

    assert_eq!(report.candidates.len(), 1);
    assert_eq!(report.candidates[0].migrated_count, 1);
    assert_eq!(report.candidates[0].clients_at_v1, vec![c("x:X:1.0")]);
    assert_eq!(report.stats.client_count, 2);
    assert!(!report.cancelled);

    let out = dir.path().join("g_A");
    assert_eq!(report.output_dir, out);
    let matrix = std::fs::read_to_string(out.join("versionMatrix.csv")).unwrap();
    assert_eq!(matrix, ",x:X,y:Y\n1.0,1.0,3\n2.0,2.0,3\n");
    assert!(out.join("links.csv").exists());
    assert_eq!(export::read_candidates(&out).unwrap(), report.candidates);
}

#[tokio::test]
async fn single_version_only_collects_links() {
    let dir = tempdir().unwrap();
    let (source, extractor) = scenario();
    let sink = Arc::new(CollectingSink::new());
    let pipeline = pipeline(source, MemoryDownloader::default(), extractor, sink, dir.path());

    let report = pipeline
        .analyze(&u("g:A"), VersionSelection::Single("1.0".into()))
        .await
        .unwrap();
    assert!(report.matrix.is_none());
    assert!(report.candidates.is_empty());
    assert_eq!(report.dataset.links.len(), 2);
    assert!(!report.output_dir.join("versionMatrix.csv").exists());

    let summary = pipeline.download(&report, DownloadScope::TopCandidate).await;
    assert_eq!(summary.fetched.len(), 3);
}

#[tokio::test]
async fn pair_selection_requires_both_versions() {
    let dir = tempdir().unwrap();
    let (source, extractor) = scenario();
    let sink = Arc::new(CollectingSink::new());
    let pipeline = pipeline(source, MemoryDownloader::default(), extractor, sink, dir.path());

    let err = pipeline
        .collect(&u("g:A"), VersionSelection::Pair("1.0".into(), "9.9".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, DepShiftError::NotFound(ref s) if s == "g:A:9.9"));
}

#[tokio::test]
async fn migrate_candidate_reports_removed_and_updated_calls() {
    let dir = tempdir().unwrap();
    let (source, extractor) = scenario();
    let sink = Arc::new(CollectingSink::new());
    let pipeline = pipeline(source, MemoryDownloader::default(), extractor, sink.clone(), dir.path());

    let analysis = pipeline.analyze(&u("g:A"), VersionSelection::All).await.unwrap();
    let report = pipeline
        .migrate_candidate(&u("g:A"), &analysis.candidates[0], None)
        .await;

    assert_eq!(report.pairs.len(), 1);
    assert_eq!(report.skipped, 0);
    let pair = &report.pairs[0];
    assert_eq!(pair.delta.removed.len(), 1);
    assert_eq!(pair.delta.updated.len(), 1);

    let tuples: Vec<&MigrationTuple> = report.tuples().collect();
    assert_eq!(tuples.len(), 2);

    assert_eq!(tuples[0].change_type, ChangeType::Removed);
    assert_eq!(tuples[0].affected_lib, u("u:U"));
    assert_eq!(tuples[0].caller, "m2");
    assert_eq!(tuples[0].callee, "u.old");
    assert_eq!(tuples[0].body_before, vec!["z.keep".to_string()]);
    assert_eq!(tuples[0].body_after, vec!["u.old".to_string(), "z.keep".to_string()]);

    assert_eq!(tuples[1].change_type, ChangeType::Updated);
    assert_eq!(tuples[1].caller, "m1");
    assert_eq!(tuples[1].body_before, vec!["a.foo".to_string()]);
    assert_eq!(tuples[1].body_after, vec!["a.bar".to_string()]);

    let written = pair.output.clone().unwrap();
    assert_eq!(
        written,
        dir.path()
            .join("g_A")
            .join("migrations")
            .join("x_X_1.0__x_X_2.0.json")
    );
    let on_disk: Vec<MigrationTuple> =
        serde_json::from_str(&std::fs::read_to_string(written).unwrap()).unwrap();
    assert_eq!(on_disk.len(), 2);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn missing_client_archive_skips_the_pair() {
    let dir = tempdir().unwrap();
    let (source, extractor) = scenario();
    let sink = Arc::new(CollectingSink::new());
    let downloader = MemoryDownloader {
        missing: HashSet::from([c("x:X:2.0")]),
    };
    let pipeline = pipeline(source, downloader, extractor, sink.clone(), dir.path());

    let report = pipeline
        .migrate_pairs(vec![(c("x:X:1.0"), c("x:X:2.0"))], dir.path())
        .await;
    assert_eq!(report.tuple_count(), 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(sink.count(DiagnosticKind::DiffSkipped), 1);
}

#[tokio::test]
async fn missing_library_model_only_drops_that_library() {
    let dir = tempdir().unwrap();
    let (source, mut extractor) = scenario();
    extractor.declarations.remove(&c("u:U:1"));
    let sink = Arc::new(CollectingSink::new());
    let pipeline = pipeline(source, MemoryDownloader::default(), extractor, sink.clone(), dir.path());

    let report = pipeline
        .migrate_pairs(vec![(c("x:X:1.0"), c("x:X:2.0"))], dir.path())
        .await;
    assert_eq!(report.tuple_count(), 1);
    assert_eq!(sink.count(DiagnosticKind::ExtractionFailure), 1);
}

#[tokio::test]
async fn missing_client_model_skips_the_pair() {
    let dir = tempdir().unwrap();
    let (source, mut extractor) = scenario();
    extractor.graphs.remove(&c("x:X:1.0"));
    let sink = Arc::new(CollectingSink::new());
    let pipeline = pipeline(source, MemoryDownloader::default(), extractor, sink.clone(), dir.path());

    let report = pipeline
        .migrate_pairs(vec![(c("x:X:1.0"), c("x:X:2.0"))], dir.path())
        .await;
    assert_eq!(report.tuple_count(), 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(sink.count(DiagnosticKind::DiffSkipped), 1);
}

#[tokio::test]
async fn cancelled_pipeline_keeps_partial_results() {
    let dir = tempdir().unwrap();
    let (source, extractor) = scenario();
    let sink = Arc::new(CollectingSink::new());
    let cancel = CancellationToken::new();
    let pipeline = pipeline(source, MemoryDownloader::default(), extractor, sink, dir.path())
        .with_cancellation(cancel.clone());
    cancel.cancel();

    let report = pipeline.analyze(&u("g:A"), VersionSelection::All).await.unwrap();
    assert!(report.cancelled);
    assert!(report.candidates.is_empty());
    assert!(report.dataset.links.is_empty());

    let migration = pipeline
        .migrate_pairs(vec![(c("x:X:1.0"), c("x:X:2.0"))], dir.path())
        .await;
    assert!(migration.cancelled);
    assert!(migration.pairs.is_empty());
}

#[test]
fn default_clients_of_any_walks_every_version() {
    let (source, _) = scenario();
    let links = tokio_test::block_on(source.clients_of_any(&u("g:A")));
    assert_eq!(links.len(), 4);
    assert_eq!(links[0], ClientLink::new(c("g:A:1.0"), c("x:X:1.0")));
    assert_eq!(links[3], ClientLink::new(c("g:A:2.0"), c("y:Y:3")));
}

#[tokio::test]
async fn unchanged_dependency_is_not_diffed() {
    let dir = tempdir().unwrap();
    let (mut source, mut extractor) = scenario();
    source
        .dependencies
        .insert(c("x:X:1.0"), vec![c("g:A:1.0"), c("k:K:1")]);
    source
        .dependencies
        .insert(c("x:X:2.0"), vec![c("g:A:2.0"), c("k:K:1")]);
    extractor.graphs.insert(
        c("x:X:1.0"),
        Arc::new(CallGraph::from_facts([("m1", "a.foo"), ("m1", "k.log")])),
    );
    extractor.graphs.insert(
        c("x:X:2.0"),
        Arc::new(CallGraph::from_facts([("m1", "a.bar"), ("m1", "k.log")])),
    );
    extractor.declarations.insert(c("k:K:1"), decls(&["k.log"]));
    let sink = Arc::new(CollectingSink::new());
    let pipeline = pipeline(source, MemoryDownloader::default(), extractor, sink.clone(), dir.path());

    let report = pipeline
        .migrate_pairs(vec![(c("x:X:1.0"), c("x:X:2.0"))], dir.path())
        .await;
    assert_eq!(report.pairs[0].delta.updated.len(), 2);

    let tuples: Vec<&MigrationTuple> = report.tuples().collect();
    assert_eq!(tuples.len(), 1);
    assert_eq!(tuples[0].affected_lib, u("g:A"));
    assert_eq!(tuples[0].change_type, ChangeType::Updated);
    assert!(sink.is_empty());
}

/// Answers whole-library lookups in one pass and counts how it was asked.
struct SinglePassSource {
    inner: MemorySource,
    whole_library: AtomicUsize,
    per_version: AtomicUsize,
}

#[async_trait]
impl ArtifactSource for SinglePassSource {
    fn name(&self) -> &str {
        "single-pass"
    }

    async fn available_versions(&self, library: &UnversionedCoordinate) -> Vec<Coordinate> {
        self.inner.available_versions(library).await
    }

    async fn clients_of(&self, library: &Coordinate) -> Vec<Coordinate> {
        self.per_version.fetch_add(1, Ordering::SeqCst);
        self.inner.clients_of(library).await
    }

    async fn exists(&self, coordinate: &Coordinate) -> bool {
        self.inner.exists(coordinate).await
    }

    async fn dependencies_of(&self, artifact: &Coordinate) -> Vec<Coordinate> {
        self.inner.dependencies_of(artifact).await
    }

    async fn clients_of_any(&self, library: &UnversionedCoordinate) -> Vec<ClientLink> {
        self.whole_library.fetch_add(1, Ordering::SeqCst);
        let mut links: Vec<ClientLink> = self
            .inner
            .clients
            .iter()
            .filter(|(version, _)| version.unversioned() == *library)
            .flat_map(|(version, clients)| {
                clients
                    .iter()
                    .map(|client| ClientLink::new(version.clone(), client.clone()))
            })
            .collect();
        // Stale link to a version `available_versions` does not list.
        links.push(ClientLink::new(c("g:A:0.1"), c("w:W:1")));
        links
    }
}

#[tokio::test]
async fn full_collection_uses_single_pass_lookup() {
    let dir = tempdir().unwrap();
    let (inner, extractor) = scenario();
    let source = Arc::new(SinglePassSource {
        inner,
        whole_library: AtomicUsize::new(0),
        per_version: AtomicUsize::new(0),
    });
    let pipeline = MigrationPipeline::new(
        source.clone(),
        Arc::new(MemoryDownloader::default()),
        Arc::new(extractor),
        Arc::new(CollectingSink::new()),
        PipelineOptions {
            dataset_path: dir.path().to_path_buf(),
            diff_concurrency: 2,
            top_candidates: 5,
        },
    );

    let dataset = pipeline.collect(&u("g:A"), VersionSelection::All).await.unwrap();
    assert_eq!(dataset.links.len(), 4);
    assert_eq!(source.whole_library.load(Ordering::SeqCst), 1);
    assert_eq!(source.per_version.load(Ordering::SeqCst), 0);

    pipeline
        .collect(&u("g:A"), VersionSelection::Single("1.0".into()))
        .await
        .unwrap();
    assert_eq!(source.whole_library.load(Ordering::SeqCst), 1);
    assert_eq!(source.per_version.load(Ordering::SeqCst), 1);
}

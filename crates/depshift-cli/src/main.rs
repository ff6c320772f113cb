use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use depshift_core::{
    export, ArtifactSnapshot, CodeModelExtractor, CollectingSink, ConfigManager, Coordinate,
    DepShiftConfig, DiagnosticKind, DiagnosticsSink, LoggingConfig, MigrationPipeline,
    MigrationReport, PipelineOptions, TeeSink, TracingSink, UnversionedCoordinate,
    VersionSelection, CLIENTS_DIR, LIBRARIES_DIR,
};
use depshift_core::{AnalysisReport, DownloadScope};
use depshift_extract::{extractor_from_config, find_archives, write_focus_files};
use depshift_maven::{coordinate_from_path, MavenBackend};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabled::builder::Builder;
use tabled::settings::Style;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, Registry};

#[derive(Parser)]
#[command(name = "depshift")]
#[command(about = "Mine library migrations from dependency graphs and client call graphs", long_about = None)]
#[command(version, propagate_version = true)]
struct Cli {
    /// Output format (json, pretty, table)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Configuration file
    #[arg(short, long, global = true, env = "DEPSHIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// List the released versions of a library
    Versions {
        /// Library as group:artifact
        library: String,
    },

    /// Collect clients, build the usage matrix and rank migration candidates
    Analyze {
        /// Library as group:artifact
        library: String,

        /// First (or only) library version
        #[arg(long)]
        v1: Option<String>,

        /// Second library version
        #[arg(long)]
        v2: Option<String>,
    },

    /// Download library and client archives of an analysis
    Download {
        /// Library as group:artifact
        library: String,

        #[arg(long)]
        v1: Option<String>,

        #[arg(long)]
        v2: Option<String>,

        /// Clients of every candidate instead of the top one
        #[arg(long)]
        all: bool,
    },

    /// Diff the migrated clients of one ranked candidate
    Migrate {
        /// Library as group:artifact
        library: String,

        /// 1-based rank of the candidate
        #[arg(long, default_value_t = 1)]
        candidate: usize,

        /// Maximum number of client pairs
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Diff explicit client pairs, one `clientOld,clientNew` per line
    DiffPairs {
        file: PathBuf,
    },

    /// Extract and cache code models, writing focus files next to each archive
    Models {
        /// Directory to scan instead of the dataset path
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Write a default configuration file
    InitConfig {
        /// Target path (default: ./.depshift.toml)
        path: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct CandidateRow {
    rank: usize,
    v1: String,
    v2: String,
    migrated: usize,
}

#[derive(Serialize)]
struct PairRow {
    client_old: String,
    client_new: String,
    removed: usize,
    added: usize,
    updated: usize,
    tuples: usize,
    output: String,
}

#[derive(Serialize)]
struct ModelRow {
    archive: String,
    coordinate: String,
    callers: usize,
    invocations: usize,
    focus_callers: usize,
}

/// Everything a command needs besides its own arguments.
struct Session {
    config: DepShiftConfig,
    diagnostics: Arc<CollectingSink>,
    cancel: CancellationToken,
}

impl Session {
    fn sink(&self) -> Arc<dyn DiagnosticsSink> {
        Arc::new(TeeSink::new(TracingSink, self.diagnostics.clone()))
    }

    fn pipeline(&self) -> Result<MigrationPipeline> {
        let sink = self.sink();
        let backend = MavenBackend::from_config(&self.config, sink.clone())
            .context("Failed to set up the artifact source")?;
        let extractor = extractor_from_config(&self.config)
            .context("Failed to set up the code model extractor")?;
        Ok(MigrationPipeline::new(
            backend.source,
            backend.downloader,
            Arc::new(extractor),
            sink,
            PipelineOptions::from(&self.config.analysis),
        )
        .with_cancellation(self.cancel.clone()))
    }

    fn diagnostics_summary(&self) -> Value {
        let kinds = [
            DiagnosticKind::NotFound,
            DiagnosticKind::Transient,
            DiagnosticKind::MalformedInput,
            DiagnosticKind::ExtractionFailure,
            DiagnosticKind::DiffSkipped,
        ];
        let mut summary = serde_json::Map::new();
        for kind in kinds {
            let count = self.diagnostics.count(kind);
            if count > 0 {
                summary.insert(kind.to_string(), json!(count));
            }
        }
        Value::Object(summary)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { path } = &cli.command {
        let path = path.clone().unwrap_or_else(|| PathBuf::from(".depshift.toml"));
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        ConfigManager::create_default_config(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{} {}", "Wrote".green(), path.display());
        return Ok(());
    }

    let manager =
        ConfigManager::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&manager.config().logging, cli.verbose);
    if let Some(path) = manager.config_path() {
        info!(path = %path.display(), "Loaded configuration");
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing with partial results");
            on_interrupt.cancel();
        }
    });

    let session = Session {
        config: manager.config().clone(),
        diagnostics: Arc::new(CollectingSink::new()),
        cancel,
    };

    let result = execute_command(&cli, &session).await?;
    print_output(&cli.output, &result)?;
    Ok(())
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };
    let registry = Registry::default().with(filter);
    let installed = match logging.format.as_str() {
        "json" => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        ),
        "compact" => tracing::subscriber::set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            ),
        ),
        _ => tracing::subscriber::set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            ),
        ),
    };
    installed.ok();
}

fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.blue} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
    );
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn parse_library(library: &str) -> Result<UnversionedCoordinate> {
    library
        .parse()
        .with_context(|| format!("Invalid library coordinate '{}'", library))
}

fn selection(v1: &Option<String>, v2: &Option<String>) -> VersionSelection {
    match (v1, v2) {
        (Some(a), Some(b)) => VersionSelection::Pair(a.clone(), b.clone()),
        (Some(v), None) | (None, Some(v)) => VersionSelection::Single(v.clone()),
        (None, None) => VersionSelection::All,
    }
}

async fn execute_command(cli: &Cli, session: &Session) -> Result<Value> {
    match &cli.command {
        Commands::Versions { library } => execute_versions(session, library).await,
        Commands::Analyze { library, v1, v2 } => {
            let pipeline = session.pipeline()?;
            let report = run_analysis(&pipeline, library, selection(v1, v2)).await?;
            Ok(analysis_value(session, &pipeline, &report))
        }
        Commands::Download {
            library,
            v1,
            v2,
            all,
        } => execute_download(session, library, selection(v1, v2), *all).await,
        Commands::Migrate {
            library,
            candidate,
            limit,
        } => execute_migrate(session, library, *candidate, *limit).await,
        Commands::DiffPairs { file } => execute_diff_pairs(session, file).await,
        Commands::Models { dir } => execute_models(session, dir.as_deref()).await,
        Commands::InitConfig { .. } => Ok(Value::Null),
    }
}

async fn execute_versions(session: &Session, library: &str) -> Result<Value> {
    let library = parse_library(library)?;
    let backend = MavenBackend::from_config(&session.config, session.sink())
        .context("Failed to set up the artifact source")?;
    let versions = backend.source.available_versions(&library).await;
    let rows: Vec<Value> = versions
        .iter()
        .map(|v| json!({ "version": v.version, "coordinate": v.to_string() }))
        .collect();
    Ok(Value::Array(rows))
}

async fn run_analysis(
    pipeline: &MigrationPipeline,
    library: &str,
    selection: VersionSelection,
) -> Result<AnalysisReport> {
    let library = parse_library(library)?;
    let pb = spinner(format!("Collecting clients of {}", library));
    let report = pipeline
        .analyze(&library, selection)
        .await
        .with_context(|| format!("Analysis of {} failed", library));
    pb.finish_and_clear();
    report
}

fn candidate_rows(report: &AnalysisReport, limit: usize) -> Vec<CandidateRow> {
    report
        .candidates
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, c)| CandidateRow {
            rank: i + 1,
            v1: c.v1.version.clone(),
            v2: c.v2.version.clone(),
            migrated: c.migrated_count,
        })
        .collect()
}

fn analysis_value(session: &Session, pipeline: &MigrationPipeline, report: &AnalysisReport) -> Value {
    let stats = &report.stats;
    json!({
        "library": report.dataset.library.to_string(),
        "versions": stats.version_count,
        "first_version": stats.first_version,
        "last_version": stats.last_version,
        "clients": stats.client_count,
        "links": stats.link_count,
        "orphan_versions": stats.orphan_versions.len(),
        "density": format!("{:.4}", stats.density),
        "clients_per_version": format!(
            "avg {:.1}, min {}, max {}",
            stats.avg_clients_per_version,
            stats.min_clients_per_version,
            stats.max_clients_per_version
        ),
        "candidates": candidate_rows(report, pipeline.options().top_candidates),
        "output_dir": report.output_dir.display().to_string(),
        "cancelled": report.cancelled,
        "diagnostics": session.diagnostics_summary(),
    })
}

async fn execute_download(
    session: &Session,
    library: &str,
    selection: VersionSelection,
    all: bool,
) -> Result<Value> {
    let pipeline = session.pipeline()?;
    let report = run_analysis(&pipeline, library, selection).await?;

    let scope = if all {
        DownloadScope::AllCandidates
    } else {
        DownloadScope::TopCandidate
    };
    let pb = spinner("Downloading archives");
    let summary = pipeline.download(&report, scope).await;
    pb.finish_and_clear();

    Ok(json!({
        "library": report.dataset.library.to_string(),
        "downloaded": summary.fetched.len(),
        "unavailable": summary
            .unavailable
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>(),
        "output_dir": report.output_dir.display().to_string(),
        "cancelled": session.cancel.is_cancelled(),
        "diagnostics": session.diagnostics_summary(),
    }))
}

async fn execute_migrate(
    session: &Session,
    library: &str,
    rank: usize,
    limit: Option<usize>,
) -> Result<Value> {
    if rank == 0 {
        bail!("Candidate ranks start at 1");
    }
    let pipeline = session.pipeline()?;
    let coordinate = parse_library(library)?;
    let library_dir = pipeline.library_dir(&coordinate);

    let candidates = match export::read_candidates(&library_dir) {
        Ok(candidates) => candidates,
        Err(_) => {
            info!(library = %coordinate, "No stored candidates, running analysis first");
            run_analysis(&pipeline, library, VersionSelection::All)
                .await?
                .candidates
        }
    };
    let Some(candidate) = candidates.get(rank - 1) else {
        bail!(
            "{} has {} ranked candidates, no candidate #{}",
            coordinate,
            candidates.len(),
            rank
        );
    };

    let pb = spinner(format!(
        "Diffing clients migrating {} -> {}",
        candidate.v1.version, candidate.v2.version
    ));
    let report = pipeline.migrate_candidate(&coordinate, candidate, limit).await;
    pb.finish_and_clear();

    Ok(migration_value(session, &report))
}

/// Reads `clientOld,clientNew` lines, skipping blanks and `#` comments.
fn read_pairs(path: &Path) -> Result<Vec<(Coordinate, Coordinate)>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut pairs = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((old, new)) = line.split_once(',') else {
            warn!(line = index + 1, "Skipping line without a client pair");
            continue;
        };
        match (old.trim().parse(), new.trim().parse()) {
            (Ok(old), Ok(new)) => pairs.push((old, new)),
            _ => warn!(line = index + 1, "Skipping malformed client pair"),
        }
    }
    Ok(pairs)
}

async fn execute_diff_pairs(session: &Session, file: &Path) -> Result<Value> {
    let pairs = read_pairs(file)?;
    let pipeline = session.pipeline()?;
    let output_dir = pipeline.options().dataset_path.clone();

    let pb = spinner(format!("Diffing {} client pairs", pairs.len()));
    let report = pipeline.migrate_pairs(pairs, &output_dir).await;
    pb.finish_and_clear();

    Ok(migration_value(session, &report))
}

fn migration_value(session: &Session, report: &MigrationReport) -> Value {
    let rows: Vec<PairRow> = report
        .pairs
        .iter()
        .map(|pair| PairRow {
            client_old: pair.client_old.to_string(),
            client_new: pair.client_new.to_string(),
            removed: pair.delta.removed.len(),
            added: pair.delta.added.len(),
            updated: pair.delta.updated.len(),
            tuples: pair.tuples.len(),
            output: pair
                .output
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "skipped".to_string()),
        })
        .collect();
    json!({
        "pairs": rows,
        "tuples": report.tuple_count(),
        "skipped": report.skipped,
        "cancelled": report.cancelled,
        "diagnostics": session.diagnostics_summary(),
    })
}

/// Maps an archive to its coordinate through the repository layout below the
/// nearest `libraries/` or `clients/` directory.
fn archive_coordinate(archive: &Path) -> Option<Coordinate> {
    let root = archive.ancestors().find(|dir| {
        dir.file_name()
            .is_some_and(|name| name == LIBRARIES_DIR || name == CLIENTS_DIR)
    })?;
    coordinate_from_path(root, archive)
}

async fn execute_models(session: &Session, dir: Option<&Path>) -> Result<Value> {
    let root = dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| session.config.analysis.dataset_path.clone());
    let extractor = extractor_from_config(&session.config)
        .context("Failed to set up the code model extractor")?;
    let threshold = session.config.analysis.focus_threshold;

    let archives = find_archives(&root);
    let pb = ProgressBar::new(archives.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏ "),
    );

    let mut rows = Vec::new();
    for archive in &archives {
        if session.cancel.is_cancelled() {
            break;
        }
        pb.inc(1);
        let Some(coordinate) = archive_coordinate(archive) else {
            warn!(archive = %archive.display(), "Archive outside the repository layout, skipped");
            continue;
        };
        pb.set_message(coordinate.to_string());

        let snapshot = ArtifactSnapshot::new(coordinate.clone(), archive.clone());
        let graph = match extractor.call_graph(&snapshot).await {
            Ok(graph) => graph,
            Err(e) => {
                session.sink().report(depshift_core::Diagnostic::new(
                    DiagnosticKind::ExtractionFailure,
                    coordinate.to_string(),
                    e.to_string(),
                ));
                continue;
            }
        };
        let focus = write_focus_files(archive, &graph, threshold)
            .await
            .with_context(|| format!("Failed to write focus files for {}", archive.display()))?;

        rows.push(ModelRow {
            archive: archive.display().to_string(),
            coordinate: coordinate.to_string(),
            callers: graph.caller_count(),
            invocations: graph.invocation_count(),
            focus_callers: focus.callers,
        });
    }
    pb.finish_and_clear();

    let stats = extractor.stats();
    Ok(json!({
        "backend": extractor.backend_name(),
        "archives": archives.len(),
        "models": rows,
        "extracted": stats.extractions,
        "cache_hits": stats.memory_hits + stats.disk_hits,
        "discarded_cache_entries": stats.discarded,
        "cancelled": session.cancel.is_cancelled(),
        "diagnostics": session.diagnostics_summary(),
    }))
}

fn print_output(format: &OutputFormat, value: &Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value)?;
        }
        OutputFormat::Table => {
            print_table(value)?;
        }
    }
    Ok(())
}

fn print_pretty(value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    Value::String(s) => {
                        println!("{}: {}", key_colored, s.green());
                    }
                    Value::Number(n) => {
                        println!("{}: {}", key_colored, n.to_string().yellow());
                    }
                    Value::Bool(b) => {
                        let val_colored = if *b { "true".green() } else { "false".red() };
                        println!("{}: {}", key_colored, val_colored);
                    }
                    Value::Array(items) if is_rows(items) => {
                        println!("{}:", key_colored);
                        println!("{}", render_table(items));
                    }
                    Value::Null => {
                        println!("{}: {}", key_colored, "-".dimmed());
                    }
                    _ => {
                        println!("{}: {}", key_colored, val);
                    }
                }
            }
        }
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                println!("\n{}{}:", "Item ".cyan(), (i + 1).to_string().yellow());
                print_pretty(item)?;
            }
        }
        _ => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}

fn print_table(value: &Value) -> Result<()> {
    match value {
        Value::Array(items) if is_rows(items) => {
            println!("{}", render_table(items));
            Ok(())
        }
        _ => print_pretty(value),
    }
}

fn is_rows(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(Value::is_object)
}

fn render_table(rows: &[Value]) -> String {
    let headers: Vec<String> = rows
        .first()
        .and_then(Value::as_object)
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default();

    let mut builder = Builder::default();
    builder.push_record(headers.clone());
    for row in rows {
        builder.push_record(headers.iter().map(|h| match row.get(h) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }));
    }
    builder.build().with(Style::rounded()).to_string()
}

use async_trait::async_trait;
use depshift_core::{
    ArtifactSource, ClientLink, Coordinate, DepShiftConfig, Diagnostic, DiagnosticKind,
    DiagnosticsSink, TracingSink, UnversionedCoordinate,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Successive-release pairs, `"older","newer"`.
pub const VERSIONS_FILE: &str = "next_all.csv";
/// Dependency edges, `"client","library"[,"scope"]`.
pub const LINKS_FILE: &str = "links_all.csv";

/// One row of a dataset file, quotes stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub source: String,
    pub target: String,
    pub scope: Option<String>,
}

impl Row {
    pub fn parse(line: &str) -> Option<Row> {
        let mut fields = line.split(',').map(|f| f.trim().trim_matches('"'));
        let source = fields.next().filter(|f| !f.is_empty())?;
        let target = fields.next().filter(|f| !f.is_empty())?;
        let scope = fields
            .next()
            .filter(|f| !f.is_empty())
            .map(|f| f.to_string());
        Some(Row {
            source: source.to_string(),
            target: target.to_string(),
            scope,
        })
    }

    /// Rows without a scope column count as compile dependencies.
    pub fn is_compile(&self) -> bool {
        self.scope.as_deref().map_or(true, |s| s == "compile")
    }
}

/// Offline source backed by a dependency-graph dump.
///
/// Both files are streamed on every query; nothing is held in memory between
/// calls.
pub struct LocalSource {
    dir: PathBuf,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl LocalSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            diagnostics: Arc::new(TracingSink),
        }
    }

    pub fn from_config(config: &DepShiftConfig) -> Self {
        Self::new(config.source.local_dataset_dir.clone())
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Feeds every well-formed row of `file` to `visit`.
    ///
    /// Malformed rows are skipped and reported once per scan with their count.
    async fn scan<F>(&self, file: &str, mut visit: F)
    where
        F: FnMut(Row) + Send,
    {
        let path = self.dir.join(file);
        let handle = match File::open(&path).await {
            Ok(handle) => handle,
            Err(e) => {
                self.diagnostics.report(Diagnostic::new(
                    DiagnosticKind::NotFound,
                    path.display().to_string(),
                    e.to_string(),
                ));
                return;
            }
        };

        let mut lines = BufReader::new(handle).lines();
        let mut malformed = 0usize;
        let mut first_malformed = None;
        let mut line_no = 0usize;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    self.diagnostics.report(Diagnostic::new(
                        DiagnosticKind::MalformedInput,
                        path.display().to_string(),
                        format!("read stopped after line {}: {}", line_no, e),
                    ));
                    break;
                }
            };
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match Row::parse(&line) {
                Some(row) => visit(row),
                None => {
                    malformed += 1;
                    first_malformed.get_or_insert(line_no);
                }
            }
        }

        if malformed > 0 {
            self.diagnostics.report(Diagnostic::new(
                DiagnosticKind::MalformedInput,
                path.display().to_string(),
                format!(
                    "skipped {} malformed rows, first at line {}",
                    malformed,
                    first_malformed.unwrap_or_default()
                ),
            ));
        }
        debug!(file = %path.display(), lines = line_no, "Scanned dataset file");
    }

    fn parse_coordinate(&self, field: &str, file: &str) -> Option<Coordinate> {
        match field.parse::<Coordinate>() {
            Ok(coordinate) => Some(coordinate),
            Err(e) => {
                self.diagnostics.report(Diagnostic::new(
                    DiagnosticKind::MalformedInput,
                    file,
                    e.to_string(),
                ));
                None
            }
        }
    }
}

fn prefix_of(library: &UnversionedCoordinate) -> String {
    format!("{}:", library)
}

#[async_trait]
impl ArtifactSource for LocalSource {
    fn name(&self) -> &str {
        "local"
    }

    async fn available_versions(&self, library: &UnversionedCoordinate) -> Vec<Coordinate> {
        let prefix = prefix_of(library);
        let mut fields = Vec::new();
        self.scan(VERSIONS_FILE, |row| {
            if row.source.starts_with(&prefix) {
                fields.push(row.source);
            }
            if row.target.starts_with(&prefix) {
                fields.push(row.target);
            }
        })
        .await;

        let mut seen = HashSet::new();
        let versions: Vec<Coordinate> = fields
            .iter()
            .filter_map(|f| self.parse_coordinate(f, VERSIONS_FILE))
            .filter(|c| c.unversioned() == *library && seen.insert(c.version.clone()))
            .collect();
        info!(library = %library, versions = versions.len(), "Listed versions");
        versions
    }

    async fn clients_of(&self, library: &Coordinate) -> Vec<Coordinate> {
        let wanted = library.to_string();
        let mut fields = Vec::new();
        self.scan(LINKS_FILE, |row| {
            if row.target == wanted && row.is_compile() {
                fields.push(row.source);
            }
        })
        .await;

        let mut seen = HashSet::new();
        fields
            .iter()
            .filter_map(|f| self.parse_coordinate(f, LINKS_FILE))
            .filter(|c| seen.insert(c.clone()))
            .collect()
    }

    async fn exists(&self, coordinate: &Coordinate) -> bool {
        let wanted = coordinate.to_string();
        let mut found = false;
        self.scan(VERSIONS_FILE, |row| {
            found |= row.source == wanted || row.target == wanted;
        })
        .await;
        found
    }

    async fn dependencies_of(&self, artifact: &Coordinate) -> Vec<Coordinate> {
        let wanted = artifact.to_string();
        let mut fields = Vec::new();
        self.scan(LINKS_FILE, |row| {
            if row.source == wanted && row.is_compile() {
                fields.push(row.target);
            }
        })
        .await;

        fields
            .iter()
            .filter_map(|f| self.parse_coordinate(f, LINKS_FILE))
            .collect()
    }

    /// One pass over the links file instead of one per version.
    async fn clients_of_any(&self, library: &UnversionedCoordinate) -> Vec<ClientLink> {
        let prefix = prefix_of(library);
        let mut rows = Vec::new();
        self.scan(LINKS_FILE, |row| {
            if row.target.starts_with(&prefix) && row.is_compile() {
                rows.push(row);
            }
        })
        .await;

        let mut seen = HashSet::new();
        let links: Vec<ClientLink> = rows
            .into_iter()
            .filter_map(|row| {
                let library = self.parse_coordinate(&row.target, LINKS_FILE)?;
                let client = self.parse_coordinate(&row.source, LINKS_FILE)?;
                Some(ClientLink::new(library, client))
            })
            .filter(|link| link.library.unversioned() == *library && seen.insert(link.clone()))
            .collect();
        info!(library = %library, links = links.len(), "Collected client links");
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_rows() {
        let row = Row::parse(r#""a:b:1","c:d:2","test""#).unwrap();
        assert_eq!(row.source, "a:b:1");
        assert_eq!(row.target, "c:d:2");
        assert!(!row.is_compile());

        let row = Row::parse(r#""a:b:1","c:d:2""#).unwrap();
        assert!(row.is_compile());

        assert_eq!(Row::parse("lonely"), None);
        assert_eq!(Row::parse(r#""","x""#), None);
    }
}

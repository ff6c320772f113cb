use crate::error::{ExtractError, Result};
use crate::model::{CodeModel, ModelBackend};
use async_trait::async_trait;
use depshift_core::CallGraph;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CALLS_SUFFIX: &str = ".calls";
pub const DECLARATIONS_SUFFIX: &str = ".decls";

/// `<archive><suffix>`, next to the archive.
pub fn sidecar(archive: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(archive.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Reads `caller#callee` lines; lines without both halves are skipped and
/// counted.
pub fn parse_calls(text: &str) -> (CallGraph, usize) {
    let mut graph = CallGraph::new();
    let mut skipped = 0;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.split_once('#') {
            Some((caller, callee)) if !caller.is_empty() && !callee.is_empty() => {
                graph.push(caller, callee)
            }
            _ => skipped += 1,
        }
    }
    (graph, skipped)
}

pub fn parse_declarations(text: &str) -> HashSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads models precomputed by an external tool and stored as sidecar files.
#[derive(Debug, Default, Clone)]
pub struct FactFileExtractor;

impl FactFileExtractor {
    pub fn new() -> Self {
        Self
    }

    async fn read_sidecar(&self, archive: &Path, suffix: &str) -> Result<Option<String>> {
        let path = sidecar(archive, suffix);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ModelBackend for FactFileExtractor {
    fn name(&self) -> &str {
        "facts"
    }

    async fn extract(&self, archive: &Path) -> Result<CodeModel> {
        let calls = self.read_sidecar(archive, CALLS_SUFFIX).await?;
        let declarations = self.read_sidecar(archive, DECLARATIONS_SUFFIX).await?;
        if calls.is_none() && declarations.is_none() {
            return Err(ExtractError::MissingModel(archive.to_path_buf()));
        }

        let (call_graph, skipped) = parse_calls(calls.as_deref().unwrap_or_default());
        if skipped > 0 {
            warn!(
                archive = %archive.display(),
                skipped,
                "Skipped malformed call facts"
            );
        }
        let declarations = parse_declarations(declarations.as_deref().unwrap_or_default());
        debug!(
            archive = %archive.display(),
            callers = call_graph.caller_count(),
            declarations = declarations.len(),
            "Read fact files"
        );
        Ok(CodeModel {
            declarations,
            call_graph,
        })
    }
}

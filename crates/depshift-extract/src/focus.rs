//! Focus files: the callers of an archive that make many calls outside it.

use depshift_core::CallGraph;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::facts::sidecar;

pub const FOCUS_SUFFIX: &str = ".focus";
pub const MARKDOWN_FOCUS_SUFFIX: &str = ".md.focus";

/// Drops `|` delimiters and the `java+method:///` and `java+constructor:///`
/// schemes from a model id.
pub fn strip_id(id: &str) -> String {
    id.replace('|', "")
        .replace("java+constructor:///", "")
        .replace("java+method:///", "")
}

/// Callers with more than `threshold` invocations of ids the graph does not
/// itself define as callers, in caller order.
pub fn callers_of_interest(graph: &CallGraph, threshold: usize) -> Vec<&str> {
    let internal: HashSet<&str> = graph.callers().collect();
    graph
        .iter()
        .filter(|(_, callees)| {
            callees
                .iter()
                .filter(|callee| !internal.contains(callee.as_str()))
                .count()
                > threshold
        })
        .map(|(caller, _)| caller)
        .collect()
}

/// Contents of the `.focus` and `.md.focus` files.
pub fn render_focus(graph: &CallGraph, threshold: usize) -> (String, String) {
    let mut focus = String::new();
    let mut markdown = String::new();
    for caller in callers_of_interest(graph, threshold) {
        let stripped = strip_id(caller);
        let _ = writeln!(markdown, "{}", stripped);
        for callee in graph.invocations(caller) {
            let _ = writeln!(focus, "{}#{}", stripped, strip_id(callee));
        }
    }
    (focus, markdown)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusFiles {
    pub focus: PathBuf,
    pub markdown: PathBuf,
    pub callers: usize,
}

pub async fn write_focus_files(
    archive: &Path,
    graph: &CallGraph,
    threshold: usize,
) -> std::io::Result<FocusFiles> {
    let (focus, markdown) = render_focus(graph, threshold);
    let files = FocusFiles {
        focus: sidecar(archive, FOCUS_SUFFIX),
        markdown: sidecar(archive, MARKDOWN_FOCUS_SUFFIX),
        callers: markdown.lines().count(),
    };
    tokio::fs::write(&files.focus, focus).await?;
    tokio::fs::write(&files.markdown, markdown).await?;
    Ok(files)
}

//! On-disk outputs of an analysis run.
//!
//! Layout under the dataset directory of one library:
//! `versionMatrix.csv`, `links.csv`, `candidates.json`, and one
//! `<clientOld>__<clientNew>.json` file per diffed client pair.

use crate::{ClientLink, Coordinate, MigrationCandidate, MigrationTuple, Result, UsageMatrix};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MATRIX_FILE: &str = "versionMatrix.csv";
pub const LINKS_FILE: &str = "links.csv";
pub const CANDIDATES_FILE: &str = "candidates.json";

/// Quotes a field when it holds a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Header `,client1,client2,...`, then `version,cell1,cell2,...` per row.
pub fn render_matrix_csv(matrix: &UsageMatrix) -> String {
    let mut out = String::new();
    for client in matrix.clients() {
        out.push(',');
        out.push_str(&csv_field(&client.to_string()));
    }
    out.push('\n');

    for (library, cells) in matrix.rows() {
        out.push_str(&csv_field(&library.version));
        for cell in cells {
            out.push(',');
            if let Some(version) = cell {
                out.push_str(&csv_field(version));
            }
        }
        out.push('\n');
    }
    out
}

pub fn render_links_csv(links: &[ClientLink]) -> String {
    let mut out = String::new();
    for link in links {
        let _ = writeln!(
            out,
            "{},{}",
            csv_field(&link.library.to_string()),
            csv_field(&link.client.to_string())
        );
    }
    out
}

/// `<old>__<new>.json` with `:` replaced by `_`.
pub fn pair_file_name(client_old: &Coordinate, client_new: &Coordinate) -> String {
    format!("{}__{}.json", client_old.file_stem(), client_new.file_stem())
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, content)?;
    debug!(path = %path.display(), bytes = content.len(), "Wrote output file");
    Ok(())
}

pub fn write_matrix(dir: &Path, matrix: &UsageMatrix) -> Result<PathBuf> {
    let path = dir.join(MATRIX_FILE);
    write_file(&path, &render_matrix_csv(matrix))?;
    Ok(path)
}

pub fn write_links(dir: &Path, links: &[ClientLink]) -> Result<PathBuf> {
    let path = dir.join(LINKS_FILE);
    write_file(&path, &render_links_csv(links))?;
    Ok(path)
}

pub fn write_candidates(dir: &Path, candidates: &[MigrationCandidate]) -> Result<PathBuf> {
    let path = dir.join(CANDIDATES_FILE);
    write_file(&path, &serde_json::to_string_pretty(candidates)?)?;
    Ok(path)
}

pub fn read_candidates(dir: &Path) -> Result<Vec<MigrationCandidate>> {
    let content = fs::read_to_string(dir.join(CANDIDATES_FILE))?;
    Ok(serde_json::from_str(&content)?)
}

/// Writes the tuples of one client pair as a pretty JSON array.
pub fn write_tuples(
    dir: &Path,
    client_old: &Coordinate,
    client_new: &Coordinate,
    tuples: &[MigrationTuple],
) -> Result<PathBuf> {
    let path = dir.join(pair_file_name(client_old, client_new));
    write_file(&path, &serde_json::to_string_pretty(tuples)?)?;
    Ok(path)
}

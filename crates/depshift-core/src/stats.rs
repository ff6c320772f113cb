use crate::{ClientLink, Coordinate, MigrationCandidate, UnversionedCoordinate};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Usage count of one library version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionUsage {
    pub version: String,
    pub clients: usize,
}

/// Summary of a collected dataset, printed after `analyze`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetStats {
    pub version_count: usize,
    pub first_version: Option<String>,
    pub last_version: Option<String>,
    pub client_count: usize,
    pub link_count: usize,
    /// Library versions no client links to.
    pub orphan_versions: Vec<String>,
    /// `links / (versions × clients)`, 0 when either side is empty.
    pub density: f64,
    pub avg_clients_per_version: f64,
    pub min_clients_per_version: usize,
    pub max_clients_per_version: usize,
    /// Sorted by descending client count, ties in version order.
    pub usage: Vec<VersionUsage>,
    pub top_candidates: Vec<MigrationCandidate>,
    pub generated_at: DateTime<Utc>,
}

impl DatasetStats {
    pub const TOP_CANDIDATES: usize = 10;

    pub fn compute(
        versions: &[Coordinate],
        links: &[ClientLink],
        candidates: &[MigrationCandidate],
    ) -> Self {
        let clients: BTreeSet<UnversionedCoordinate> =
            links.iter().map(|link| link.client.unversioned()).collect();

        let mut per_version: HashMap<&Coordinate, usize> = HashMap::new();
        for link in links {
            *per_version.entry(&link.library).or_default() += 1;
        }

        let mut usage: Vec<VersionUsage> = versions
            .iter()
            .map(|v| VersionUsage {
                version: v.version.clone(),
                clients: per_version.get(v).copied().unwrap_or(0),
            })
            .collect();
        usage.sort_by(|a, b| b.clients.cmp(&a.clients));

        let orphan_versions = versions
            .iter()
            .filter(|v| !per_version.contains_key(v))
            .map(|v| v.version.clone())
            .collect();

        let counts: Vec<usize> = usage.iter().map(|u| u.clients).collect();
        let total = versions.len() * clients.len();

        Self {
            version_count: versions.len(),
            first_version: versions.first().map(|v| v.version.clone()),
            last_version: versions.last().map(|v| v.version.clone()),
            client_count: clients.len(),
            link_count: links.len(),
            orphan_versions,
            density: if total == 0 {
                0.0
            } else {
                links.len() as f64 / total as f64
            },
            avg_clients_per_version: if counts.is_empty() {
                0.0
            } else {
                counts.iter().sum::<usize>() as f64 / counts.len() as f64
            },
            min_clients_per_version: counts.iter().copied().min().unwrap_or(0),
            max_clients_per_version: counts.iter().copied().max().unwrap_or(0),
            usage,
            top_candidates: candidates.iter().take(Self::TOP_CANDIDATES).cloned().collect(),
            generated_at: Utc::now(),
        }
    }
}

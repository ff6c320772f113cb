use crate::{Coordinate, UnversionedCoordinate, UsageMatrix};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A pair of library versions and the shared clients that changed their own
/// version between depending on `v1` and depending on `v2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationCandidate {
    pub v1: Coordinate,
    pub v2: Coordinate,
    pub migrated_count: usize,
    /// Migrated clients pinned to the version they used against `v1`.
    pub clients_at_v1: Vec<Coordinate>,
    /// Same clients, same order, pinned to the version used against `v2`.
    pub clients_at_v2: Vec<Coordinate>,
}

impl MigrationCandidate {
    /// `(client at v1, client at v2)` pairs, one per migrated client.
    pub fn client_pairs(&self) -> impl Iterator<Item = (&Coordinate, &Coordinate)> {
        self.clients_at_v1.iter().zip(self.clients_at_v2.iter())
    }
}

/// Ranks every pair of library versions by migration volume.
#[derive(Debug, Default, Clone, Copy)]
pub struct MigrationCandidateRanker;

impl MigrationCandidateRanker {
    pub fn new() -> Self {
        Self
    }

    /// Ranks over the rows and clients recorded in `matrix`.
    pub fn rank_matrix(&self, matrix: &UsageMatrix) -> Vec<MigrationCandidate> {
        self.rank(matrix.library_versions(), matrix, matrix.clients())
    }

    pub fn rank(
        &self,
        library_versions: &[Coordinate],
        matrix: &UsageMatrix,
        clients: &BTreeSet<UnversionedCoordinate>,
    ) -> Vec<MigrationCandidate> {
        self.rank_until_cancelled(library_versions, matrix, clients, &CancellationToken::new())
    }

    /// Output is sorted by descending `migrated_count`; equal counts keep the
    /// `(i, j)` enumeration order. A cancelled run returns the pairs compared
    /// so far, ranked the same way.
    pub fn rank_until_cancelled(
        &self,
        library_versions: &[Coordinate],
        matrix: &UsageMatrix,
        clients: &BTreeSet<UnversionedCoordinate>,
        cancel: &CancellationToken,
    ) -> Vec<MigrationCandidate> {
        if library_versions.len() < 2 {
            return Vec::new();
        }

        let users: Vec<BTreeSet<&UnversionedCoordinate>> = library_versions
            .iter()
            .map(|library| {
                clients
                    .iter()
                    .filter(|client| matrix.contains(library, client))
                    .collect()
            })
            .collect();

        let mut candidates = Vec::new();
        'pairs: for i in 0..library_versions.len() - 1 {
            for j in (i + 1)..library_versions.len() {
                if cancel.is_cancelled() {
                    info!(compared = candidates.len(), "Ranking cancelled, keeping partial result");
                    break 'pairs;
                }
                let (vi, vj) = (&library_versions[i], &library_versions[j]);
                let mut clients_at_v1 = Vec::new();
                let mut clients_at_v2 = Vec::new();

                for client in users[i].intersection(&users[j]) {
                    let (Some(at_vi), Some(at_vj)) = (matrix.get(vi, client), matrix.get(vj, client))
                    else {
                        continue;
                    };
                    if at_vi != at_vj {
                        clients_at_v1.push(client.with_version(at_vi));
                        clients_at_v2.push(client.with_version(at_vj));
                    }
                }

                debug!(v1 = %vi, v2 = %vj, migrated = clients_at_v1.len(), "Compared versions");
                candidates.push(MigrationCandidate {
                    v1: vi.clone(),
                    v2: vj.clone(),
                    migrated_count: clients_at_v1.len(),
                    clients_at_v1,
                    clients_at_v2,
                });
            }
        }

        // Vec::sort_by is stable, which keeps the enumeration order for ties.
        candidates.sort_by(|a, b| b.migrated_count.cmp(&a.migrated_count));
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientLink, UsageMatrixBuilder};

    fn c(s: &str) -> Coordinate {
        s.parse().unwrap()
    }

    fn matrix(versions: &[Coordinate], links: &[(&str, &str)]) -> UsageMatrix {
        let links: Vec<ClientLink> = links
            .iter()
            .map(|(lib, client)| ClientLink::new(c(lib), c(client)))
            .collect();
        UsageMatrixBuilder::new().build(versions, &links).unwrap()
    }

    #[test]
    fn single_migrating_client() {
        let versions = vec![c("g:A:1.0"), c("g:A:2.0")];
        let m = matrix(&versions, &[("g:A:1.0", "x:X:1.0"), ("g:A:2.0", "x:X:2.0")]);
        let ranked = MigrationCandidateRanker::new().rank_matrix(&m);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].v1, c("g:A:1.0"));
        assert_eq!(ranked[0].v2, c("g:A:2.0"));
        assert_eq!(ranked[0].migrated_count, 1);
        assert_eq!(ranked[0].clients_at_v1, vec![c("x:X:1.0")]);
        assert_eq!(ranked[0].clients_at_v2, vec![c("x:X:2.0")]);
    }

    #[test]
    fn client_on_same_version_is_not_a_migration() {
        let versions = vec![c("g:A:1.0"), c("g:A:2.0")];
        let m = matrix(&versions, &[("g:A:1.0", "x:X:1.0"), ("g:A:2.0", "x:X:1.0")]);
        let ranked = MigrationCandidateRanker::new().rank_matrix(&m);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].migrated_count, 0);
        assert!(ranked[0].clients_at_v1.is_empty());
    }

    #[test]
    fn fewer_than_two_versions_yield_nothing() {
        let versions = vec![c("g:A:1.0")];
        let m = matrix(&versions, &[("g:A:1.0", "x:X:1.0")]);
        assert!(MigrationCandidateRanker::new().rank_matrix(&m).is_empty());
        assert!(MigrationCandidateRanker::new()
            .rank(&[], &UsageMatrix::default(), &BTreeSet::new())
            .is_empty());
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let versions = vec![c("g:A:1"), c("g:A:2"), c("g:A:3")];
        // (1,2) = 0, (1,3) = 1, (2,3) = 1
        let m = matrix(
            &versions,
            &[
                ("g:A:1", "x:X:1"),
                ("g:A:2", "x:X:1"),
                ("g:A:3", "x:X:2"),
            ],
        );
        let ranked = MigrationCandidateRanker::new().rank_matrix(&m);
        let order: Vec<(String, String, usize)> = ranked
            .iter()
            .map(|r| (r.v1.version.clone(), r.v2.version.clone(), r.migrated_count))
            .collect();
        assert_eq!(
            order,
            vec![
                ("1".to_string(), "3".to_string(), 1),
                ("2".to_string(), "3".to_string(), 1),
                ("1".to_string(), "2".to_string(), 0),
            ]
        );
    }

    #[test]
    fn cancelled_ranking_returns_partial_result() {
        let versions = vec![c("g:A:1"), c("g:A:2"), c("g:A:3")];
        let m = matrix(&versions, &[("g:A:1", "x:X:1"), ("g:A:2", "x:X:2")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ranked =
            MigrationCandidateRanker::new().rank_until_cancelled(&versions, &m, m.clients(), &cancel);
        assert!(ranked.is_empty());
    }

    #[test]
    fn migrated_count_never_exceeds_the_smaller_user_set() {
        let versions = vec![c("g:A:1"), c("g:A:2"), c("g:A:3"), c("g:A:4")];
        let m = matrix(
            &versions,
            &[
                ("g:A:1", "a:P:1"),
                ("g:A:2", "a:P:2"),
                ("g:A:3", "a:P:3"),
                ("g:A:1", "b:Q:1"),
                ("g:A:3", "b:Q:2"),
                ("g:A:4", "b:Q:3"),
                ("g:A:2", "c:R:1"),
                ("g:A:4", "c:R:1"),
                ("g:A:1", "d:S:1"),
                ("g:A:1", "e:T:1"),
                ("g:A:4", "e:T:9"),
            ],
        );
        let ranked = MigrationCandidateRanker::new().rank_matrix(&m);

        assert_eq!(ranked.len(), 6);
        for candidate in &ranked {
            let bound = m.users_of(&candidate.v1).len().min(m.users_of(&candidate.v2).len());
            assert!(
                candidate.migrated_count <= bound,
                "{} -> {}: {} > {}",
                candidate.v1,
                candidate.v2,
                candidate.migrated_count,
                bound
            );
            assert_eq!(candidate.clients_at_v1.len(), candidate.migrated_count);
            assert_eq!(candidate.clients_at_v2.len(), candidate.migrated_count);
        }
        assert_eq!(ranked[0].migrated_count, 2);
        assert_eq!((ranked[0].v1.version.as_str(), ranked[0].v2.version.as_str()), ("1", "3"));
    }

    #[test]
    fn client_pairs_line_up() {
        let versions = vec![c("g:A:1"), c("g:A:2")];
        let m = matrix(
            &versions,
            &[
                ("g:A:1", "a:P:1"),
                ("g:A:2", "a:P:2"),
                ("g:A:1", "b:Q:5"),
                ("g:A:2", "b:Q:6"),
            ],
        );
        let ranked = MigrationCandidateRanker::new().rank_matrix(&m);
        let pairs: Vec<(String, String)> = ranked[0]
            .client_pairs()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a:P:1".to_string(), "a:P:2".to_string()),
                ("b:Q:5".to_string(), "b:Q:6".to_string()),
            ]
        );
    }
}

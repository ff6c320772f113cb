//! Library version × client lookup table.
//!
//! A cell answers "which version of client `c` was observed depending on
//! library version `v`". Cells are single-valued: when the link data contains
//! the same cell twice, the last link in list order wins.

use crate::{ClientLink, Coordinate, DepShiftError, Result, UnversionedCoordinate};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageMatrix {
    library_versions: Vec<Coordinate>,
    clients: BTreeSet<UnversionedCoordinate>,
    cells: HashMap<Coordinate, HashMap<UnversionedCoordinate, String>>,
}

impl UsageMatrix {
    /// Client version observed for `(library, client)`, if any.
    pub fn get(&self, library: &Coordinate, client: &UnversionedCoordinate) -> Option<&str> {
        self.cells
            .get(library)
            .and_then(|row| row.get(client))
            .map(String::as_str)
    }

    pub fn contains(&self, library: &Coordinate, client: &UnversionedCoordinate) -> bool {
        self.get(library, client).is_some()
    }

    /// Rows in the order the versions were supplied.
    pub fn library_versions(&self) -> &[Coordinate] {
        &self.library_versions
    }

    /// Distinct unversioned clients over all links, in ascending order.
    pub fn clients(&self) -> &BTreeSet<UnversionedCoordinate> {
        &self.clients
    }

    /// Clients with a defined cell in the row of `library`.
    pub fn users_of(&self, library: &Coordinate) -> HashSet<&UnversionedCoordinate> {
        self.cells
            .get(library)
            .map(|row| row.keys().collect())
            .unwrap_or_default()
    }

    /// Number of defined cells.
    pub fn filled_cells(&self) -> usize {
        self.cells.values().map(HashMap::len).sum()
    }

    /// Filled cells over all cells; 0 for an empty matrix.
    pub fn density(&self) -> f64 {
        let total = self.library_versions.len() * self.clients.len();
        if total == 0 {
            0.0
        } else {
            self.filled_cells() as f64 / total as f64
        }
    }

    /// One row per library version, cells aligned with [`UsageMatrix::clients`].
    pub fn rows(&self) -> impl Iterator<Item = (&Coordinate, Vec<Option<&str>>)> + '_ {
        self.library_versions.iter().map(move |library| {
            let cells = self
                .clients
                .iter()
                .map(|client| self.get(library, client))
                .collect();
            (library, cells)
        })
    }
}

/// Builds a [`UsageMatrix`] from client links. Holds no state between calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct UsageMatrixBuilder;

impl UsageMatrixBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Every `link.library` must be one of `library_versions`; callers filter
    /// links beforehand.
    pub fn build(&self, library_versions: &[Coordinate], links: &[ClientLink]) -> Result<UsageMatrix> {
        let known: HashSet<&Coordinate> = library_versions.iter().collect();
        let mut matrix = UsageMatrix {
            library_versions: library_versions.to_vec(),
            ..UsageMatrix::default()
        };

        for link in links {
            if !known.contains(&link.library) {
                return Err(DepShiftError::InvalidInput(format!(
                    "link {} -> {} refers to a library version outside the analysed set",
                    link.client, link.library
                )));
            }
            let client = link.client.unversioned();
            matrix.clients.insert(client.clone());
            matrix
                .cells
                .entry(link.library.clone())
                .or_default()
                .insert(client, link.client.version.clone());
        }

        tracing::debug!(
            versions = matrix.library_versions.len(),
            clients = matrix.clients.len(),
            cells = matrix.filled_cells(),
            "Built usage matrix"
        );
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> Coordinate {
        s.parse().unwrap()
    }

    fn u(s: &str) -> UnversionedCoordinate {
        s.parse().unwrap()
    }

    #[test]
    fn records_client_version_per_library_version() {
        let versions = vec![c("g:A:1.0"), c("g:A:2.0")];
        let links = vec![
            ClientLink::new(c("g:A:1.0"), c("x:X:1.0")),
            ClientLink::new(c("g:A:2.0"), c("x:X:2.0")),
        ];
        let matrix = UsageMatrixBuilder::new().build(&versions, &links).unwrap();

        assert_eq!(matrix.get(&c("g:A:1.0"), &u("x:X")), Some("1.0"));
        assert_eq!(matrix.get(&c("g:A:2.0"), &u("x:X")), Some("2.0"));
        assert_eq!(matrix.clients().len(), 1);
        assert_eq!(matrix.filled_cells(), 2);
        assert!((matrix.density() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn last_write_wins_for_duplicate_cells() {
        let versions = vec![c("g:A:1.0")];
        let links = vec![
            ClientLink::new(c("g:A:1.0"), c("x:X:1.0")),
            ClientLink::new(c("g:A:1.0"), c("x:X:1.1")),
            ClientLink::new(c("g:A:1.0"), c("x:X:0.9")),
        ];
        let matrix = UsageMatrixBuilder::new().build(&versions, &links).unwrap();
        assert_eq!(matrix.get(&c("g:A:1.0"), &u("x:X")), Some("0.9"));
        assert_eq!(matrix.filled_cells(), 1);
    }

    #[test]
    fn empty_links_give_empty_rows() {
        let versions = vec![c("g:A:1.0"), c("g:A:2.0")];
        let matrix = UsageMatrixBuilder::new().build(&versions, &[]).unwrap();
        assert!(matrix.clients().is_empty());
        assert_eq!(matrix.density(), 0.0);
        let rows: Vec<_> = matrix.rows().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|(_, cells)| cells.is_empty()));
    }

    #[test]
    fn rejects_links_to_unknown_versions() {
        let versions = vec![c("g:A:1.0")];
        let links = vec![ClientLink::new(c("g:A:3.0"), c("x:X:1.0"))];
        let err = UsageMatrixBuilder::new().build(&versions, &links).unwrap_err();
        assert!(matches!(err, DepShiftError::InvalidInput(_)));
    }

    #[test]
    fn rows_align_with_sorted_clients() {
        let versions = vec![c("g:A:1.0"), c("g:A:2.0")];
        let links = vec![
            ClientLink::new(c("g:A:1.0"), c("z:Z:3")),
            ClientLink::new(c("g:A:2.0"), c("b:B:1")),
        ];
        let matrix = UsageMatrixBuilder::new().build(&versions, &links).unwrap();
        let rows: Vec<_> = matrix.rows().collect();
        assert_eq!(rows[0].1, vec![None, Some("3")]);
        assert_eq!(rows[1].1, vec![Some("1"), None]);
    }
}

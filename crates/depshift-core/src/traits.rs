use crate::{ArtifactSnapshot, CallGraph, ClientLink, Coordinate, Result, UnversionedCoordinate};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where versions, clients and dependency lists come from.
///
/// Lookups fail softly: once an implementation has exhausted its own retries
/// (or hit a permanent "not found"), it returns an empty result.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    fn name(&self) -> &str;

    /// Every released version of `library`, in the source's order.
    async fn available_versions(&self, library: &UnversionedCoordinate) -> Vec<Coordinate>;

    /// Clients depending directly, with compile scope, on `library`.
    async fn clients_of(&self, library: &Coordinate) -> Vec<Coordinate>;

    async fn exists(&self, coordinate: &Coordinate) -> bool;

    /// Direct compile dependencies of `artifact`.
    async fn dependencies_of(&self, artifact: &Coordinate) -> Vec<Coordinate>;

    /// Clients of every version of `library`.
    async fn clients_of_any(&self, library: &UnversionedCoordinate) -> Vec<ClientLink> {
        let mut links = Vec::new();
        for version in self.available_versions(library).await {
            for client in self.clients_of(&version).await {
                links.push(ClientLink::new(version.clone(), client));
            }
        }
        links
    }
}

#[async_trait]
pub trait ArtifactDownloader: Send + Sync {
    /// Stores the archive of `coordinate` under `destination` and returns its
    /// path, or `None` when the artifact is permanently unavailable.
    async fn fetch(&self, coordinate: &Coordinate, destination: &Path) -> Option<PathBuf>;
}

/// Static-analysis front end producing declarations and call-graph facts for
/// one archive.
#[async_trait]
pub trait CodeModelExtractor: Send + Sync {
    async fn declarations(&self, snapshot: &ArtifactSnapshot) -> Result<Arc<HashSet<String>>>;

    async fn call_graph(&self, snapshot: &ArtifactSnapshot) -> Result<Arc<CallGraph>>;
}

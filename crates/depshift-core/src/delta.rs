use crate::{ChangeType, Coordinate, UnversionedCoordinate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Versions of a dependency present on both sides of a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChange {
    pub from: String,
    pub to: String,
}

impl VersionChange {
    pub fn is_bump(&self) -> bool {
        self.from != self.to
    }
}

/// Direct-dependency difference between two versions of one client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDelta {
    pub removed: BTreeSet<Coordinate>,
    pub added: BTreeSet<Coordinate>,
    /// Keyed by unversioned coordinate, present on both sides.
    pub updated: BTreeMap<UnversionedCoordinate, VersionChange>,
}

/// A library whose usage should be diffed, with the coordinate its API
/// namespace is taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffectedDependency {
    pub library: Coordinate,
    pub change: ChangeType,
}

impl DependencyDelta {
    pub fn compute<'a, I, J>(deps_old: I, deps_new: J) -> Self
    where
        I: IntoIterator<Item = &'a Coordinate>,
        J: IntoIterator<Item = &'a Coordinate>,
    {
        let deps_old: Vec<&Coordinate> = deps_old.into_iter().collect();
        let deps_new: Vec<&Coordinate> = deps_new.into_iter().collect();

        let unversioned_old: HashSet<UnversionedCoordinate> =
            deps_old.iter().map(|d| d.unversioned()).collect();
        let unversioned_new: HashSet<UnversionedCoordinate> =
            deps_new.iter().map(|d| d.unversioned()).collect();

        let mut delta = DependencyDelta::default();

        for old in &deps_old {
            let key = old.unversioned();
            if !unversioned_new.contains(&key) {
                delta.removed.insert((*old).clone());
            }
        }
        for new in &deps_new {
            let key = new.unversioned();
            if !unversioned_old.contains(&key) {
                delta.added.insert((*new).clone());
                continue;
            }
            // With duplicate unversioned entries on one side the first one seen
            // is kept.
            if delta.updated.contains_key(&key) {
                continue;
            }
            let from = deps_old
                .iter()
                .find(|d| d.group == new.group && d.artifact == new.artifact)
                .map(|d| d.version.clone())
                .unwrap_or_default();
            delta.updated.insert(
                key,
                VersionChange {
                    from,
                    to: new.version.clone(),
                },
            );
        }

        delta
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.updated.is_empty()
    }

    /// Diff requests driven by this delta: removed libraries keep their old
    /// coordinate, updated libraries use the version moved to. Shared
    /// dependencies whose version did not move are not diffed.
    pub fn affected(&self) -> Vec<AffectedDependency> {
        let removed = self.removed.iter().map(|library| AffectedDependency {
            library: library.clone(),
            change: ChangeType::Removed,
        });
        let added = self.added.iter().map(|library| AffectedDependency {
            library: library.clone(),
            change: ChangeType::Added,
        });
        let updated = self
            .updated
            .iter()
            .filter(|(_, change)| change.is_bump())
            .map(|(lib, change)| AffectedDependency {
                library: lib.with_version(change.to.clone()),
                change: ChangeType::Updated,
            });
        removed.chain(added).chain(updated).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> Coordinate {
        s.parse().unwrap()
    }

    #[test]
    fn splits_dependencies_into_three_disjoint_groups() {
        let old = vec![c("a:keep:1"), c("a:gone:1"), c("a:bump:1")];
        let new = vec![c("a:keep:1"), c("a:fresh:2"), c("a:bump:2")];
        let delta = DependencyDelta::compute(&old, &new);

        assert_eq!(delta.removed, BTreeSet::from([c("a:gone:1")]));
        assert_eq!(delta.added, BTreeSet::from([c("a:fresh:2")]));
        assert_eq!(delta.updated.len(), 2);

        let bump = &delta.updated[&"a:bump".parse::<UnversionedCoordinate>().unwrap()];
        assert_eq!(bump.from, "1");
        assert_eq!(bump.to, "2");
        assert!(bump.is_bump());
        assert!(!delta.updated[&"a:keep".parse::<UnversionedCoordinate>().unwrap()].is_bump());
    }

    #[test]
    fn every_dependency_lands_in_exactly_one_group() {
        let old = vec![c("g:a:1"), c("g:b:1"), c("g:c:1"), c("h:d:3")];
        let new = vec![c("g:b:2"), c("g:c:1"), c("g:e:1")];
        let delta = DependencyDelta::compute(&old, &new);

        let removed: HashSet<_> = delta.removed.iter().map(Coordinate::unversioned).collect();
        let added: HashSet<_> = delta.added.iter().map(Coordinate::unversioned).collect();
        let updated: HashSet<_> = delta.updated.keys().cloned().collect();

        assert!(removed.is_disjoint(&added));
        assert!(removed.is_disjoint(&updated));
        assert!(added.is_disjoint(&updated));

        for dep in old.iter().chain(new.iter()) {
            let key = dep.unversioned();
            let hits = [&removed, &added, &updated]
                .iter()
                .filter(|set| set.contains(&key))
                .count();
            assert_eq!(hits, 1, "{} should be in exactly one group", dep);
        }
    }

    #[test]
    fn affected_uses_new_version_for_updates() {
        let old = vec![c("g:lib:1"), c("g:old:1")];
        let new = vec![c("g:lib:2"), c("g:new:1")];
        let affected = DependencyDelta::compute(&old, &new).affected();

        assert_eq!(
            affected,
            vec![
                AffectedDependency { library: c("g:old:1"), change: ChangeType::Removed },
                AffectedDependency { library: c("g:new:1"), change: ChangeType::Added },
                AffectedDependency { library: c("g:lib:2"), change: ChangeType::Updated },
            ]
        );
    }

    #[test]
    fn unchanged_shared_dependencies_are_not_affected() {
        let old = vec![c("g:A:1"), c("k:K:1")];
        let new = vec![c("g:A:2"), c("k:K:1")];
        let delta = DependencyDelta::compute(&old, &new);

        assert_eq!(delta.updated.len(), 2);
        assert_eq!(
            delta.affected(),
            vec![AffectedDependency { library: c("g:A:2"), change: ChangeType::Updated }]
        );
    }

    #[test]
    fn empty_inputs_give_empty_delta() {
        let none: Vec<Coordinate> = Vec::new();
        let delta = DependencyDelta::compute(&none, &none);
        assert!(delta.is_empty());
        assert!(delta.affected().is_empty());
    }
}

//! Per-caller call-graph differ.
//!
//! Given two snapshots of one client and a library whose dependency changed
//! between them, finds the client methods that call into the library and whose
//! ordered invocation list differs across the snapshots.

use crate::{
    ArtifactSnapshot, CallGraph, ChangeType, CodeModelExtractor, Coordinate, DepShiftError, Result,
    UnversionedCoordinate,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Declaration ids extracted from a library archive; a callee belongs to the
/// library when its id is one of them.
#[derive(Debug, Clone)]
pub struct ApiNamespace {
    declarations: Arc<HashSet<String>>,
}

impl ApiNamespace {
    pub fn new(declarations: Arc<HashSet<String>>) -> Self {
        Self { declarations }
    }

    pub fn contains(&self, callee: &str) -> bool {
        self.declarations.contains(callee)
    }
}

/// One caller whose invocation list changed because of a dependency change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationTuple {
    pub client_v1: Coordinate,
    pub client_v2: Coordinate,
    pub affected_lib: UnversionedCoordinate,
    pub caller: String,
    /// First library invocation of the caller.
    pub callee: String,
    pub change_type: ChangeType,
    pub body_before: Vec<String>,
    pub body_after: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRequest {
    pub client_old: Coordinate,
    pub client_new: Coordinate,
    pub affected_lib: UnversionedCoordinate,
    pub change: ChangeType,
}

fn used_callees<'g>(graph: &'g CallGraph, namespace: &ApiNamespace) -> HashSet<&'g str> {
    graph
        .iter()
        .flat_map(|(_, callees)| callees.iter())
        .map(String::as_str)
        .filter(|callee| namespace.contains(callee))
        .collect()
}

/// Pure diff of two call graphs of the same client.
///
/// For `Removed` the bodies are swapped: `body_before` is read from the new
/// snapshot and `body_after` from the old one.
pub fn diff_call_graphs(
    request: &DiffRequest,
    graph_old: &CallGraph,
    graph_new: &CallGraph,
    namespace: &ApiNamespace,
) -> Vec<MigrationTuple> {
    let (graph_with_lib, used) = match request.change {
        ChangeType::Added => (graph_new, used_callees(graph_new, namespace)),
        ChangeType::Removed => (graph_old, used_callees(graph_old, namespace)),
        ChangeType::Updated => {
            let used = used_callees(graph_new, namespace);
            if used.is_empty() {
                (graph_old, used_callees(graph_old, namespace))
            } else {
                (graph_new, used)
            }
        }
    };

    if used.is_empty() {
        debug!(lib = %request.affected_lib, client = %request.client_new, "No library invocations found");
        return Vec::new();
    }

    let mut tuples = Vec::new();
    for (caller, callees) in graph_with_lib.iter() {
        let Some(callee) = callees.iter().find(|c| used.contains(c.as_str())) else {
            continue;
        };

        let before = graph_old.invocations(caller);
        let after = graph_new.invocations(caller);
        if before.is_empty() || after.is_empty() || before == after {
            continue;
        }

        let (body_before, body_after) = match request.change {
            ChangeType::Removed => (after.to_vec(), before.to_vec()),
            ChangeType::Added | ChangeType::Updated => (before.to_vec(), after.to_vec()),
        };

        tuples.push(MigrationTuple {
            client_v1: request.client_old.clone(),
            client_v2: request.client_new.clone(),
            affected_lib: request.affected_lib.clone(),
            caller: caller.to_string(),
            callee: callee.clone(),
            change_type: request.change,
            body_before,
            body_after,
        });
    }
    tuples
}

/// Pulls call graphs through a [`CodeModelExtractor`] and diffs them.
#[derive(Clone)]
pub struct CallGraphDiffer {
    extractor: Arc<dyn CodeModelExtractor>,
}

impl CallGraphDiffer {
    pub fn new(extractor: Arc<dyn CodeModelExtractor>) -> Self {
        Self { extractor }
    }

    /// Namespace made of the declarations found in the library archive.
    pub async fn namespace_of(&self, library: &ArtifactSnapshot) -> Result<ApiNamespace> {
        let declarations = self
            .extractor
            .declarations(library)
            .await
            .map_err(|e| extraction_failure(library, e))?;
        Ok(ApiNamespace::new(declarations))
    }

    /// Fails with [`DepShiftError::Extraction`] when either call graph cannot
    /// be produced; the caller decides whether to skip the pair.
    pub async fn diff(
        &self,
        request: &DiffRequest,
        snapshot_old: &ArtifactSnapshot,
        snapshot_new: &ArtifactSnapshot,
        namespace: &ApiNamespace,
    ) -> Result<Vec<MigrationTuple>> {
        let graph_old = self
            .extractor
            .call_graph(snapshot_old)
            .await
            .map_err(|e| extraction_failure(snapshot_old, e))?;
        let graph_new = self
            .extractor
            .call_graph(snapshot_new)
            .await
            .map_err(|e| extraction_failure(snapshot_new, e))?;

        let tuples = diff_call_graphs(request, &graph_old, &graph_new, namespace);
        debug!(
            old = %request.client_old,
            new = %request.client_new,
            lib = %request.affected_lib,
            change = %request.change,
            tuples = tuples.len(),
            "Diffed call graphs"
        );
        Ok(tuples)
    }
}

fn extraction_failure(snapshot: &ArtifactSnapshot, error: DepShiftError) -> DepShiftError {
    match error {
        DepShiftError::Extraction(_) | DepShiftError::Cancelled => error,
        other => DepShiftError::Extraction(format!("{}: {}", snapshot.coordinate, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(change: ChangeType) -> DiffRequest {
        DiffRequest {
            client_old: "x:X:1.0".parse().unwrap(),
            client_new: "x:X:2.0".parse().unwrap(),
            affected_lib: "g:a".parse().unwrap(),
            change,
        }
    }

    fn library_a() -> ApiNamespace {
        let ids = ["a.foo", "a.bar", "a.init"].map(String::from);
        ApiNamespace::new(Arc::new(HashSet::from(ids)))
    }

    #[test]
    fn updated_call_is_reported() {
        let old = CallGraph::from_facts([("m1", "a.foo")]);
        let new = CallGraph::from_facts([("m1", "a.bar")]);
        let tuples = diff_call_graphs(&request(ChangeType::Updated), &old, &new, &library_a());

        assert_eq!(tuples.len(), 1);
        let t = &tuples[0];
        assert_eq!(t.caller, "m1");
        assert_eq!(t.callee, "a.bar");
        assert_eq!(t.change_type, ChangeType::Updated);
        assert_eq!(t.body_before, vec!["a.foo".to_string()]);
        assert_eq!(t.body_after, vec!["a.bar".to_string()]);
    }

    #[test]
    fn identical_snapshots_produce_nothing() {
        let graph = CallGraph::from_facts([("m1", "a.foo"), ("m2", "a.bar"), ("m2", "b.baz")]);
        for change in [ChangeType::Added, ChangeType::Removed, ChangeType::Updated] {
            assert!(diff_call_graphs(&request(change), &graph, &graph, &library_a()).is_empty());
        }
    }

    #[test]
    fn removed_swaps_bodies() {
        let old = CallGraph::from_facts([("m1", "a.foo"), ("m1", "util.log")]);
        let new = CallGraph::from_facts([("m1", "util.log")]);
        let tuples = diff_call_graphs(&request(ChangeType::Removed), &old, &new, &library_a());

        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].callee, "a.foo");
        assert_eq!(tuples[0].body_before, vec!["util.log".to_string()]);
        assert_eq!(tuples[0].body_after, vec!["a.foo".to_string(), "util.log".to_string()]);
    }

    #[test]
    fn added_reads_library_calls_from_new_snapshot() {
        let old = CallGraph::from_facts([("m1", "util.log")]);
        let new = CallGraph::from_facts([("m1", "util.log"), ("m1", "a.init")]);
        let tuples = diff_call_graphs(&request(ChangeType::Added), &old, &new, &library_a());

        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].body_before, vec!["util.log".to_string()]);
        assert_eq!(tuples[0].body_after, vec!["util.log".to_string(), "a.init".to_string()]);
    }

    #[test]
    fn callers_missing_on_one_side_are_skipped() {
        let old = CallGraph::from_facts([("m1", "a.foo")]);
        let new = CallGraph::from_facts([("m2", "a.foo")]);
        assert!(diff_call_graphs(&request(ChangeType::Updated), &old, &new, &library_a()).is_empty());
    }

    #[test]
    fn order_changes_count_as_differences() {
        let old = CallGraph::from_facts([("m1", "a.foo"), ("m1", "a.bar")]);
        let new = CallGraph::from_facts([("m1", "a.bar"), ("m1", "a.foo")]);
        let tuples = diff_call_graphs(&request(ChangeType::Updated), &old, &new, &library_a());
        assert_eq!(tuples.len(), 1);
    }

    #[test]
    fn callers_without_library_calls_are_ignored() {
        let old = CallGraph::from_facts([("m1", "a.foo"), ("m2", "b.one")]);
        let new = CallGraph::from_facts([("m1", "a.foo"), ("m2", "b.two")]);
        assert!(diff_call_graphs(&request(ChangeType::Updated), &old, &new, &library_a()).is_empty());
    }

    #[test]
    fn updated_falls_back_to_old_snapshot() {
        let old = CallGraph::from_facts([("m1", "a.foo"), ("m1", "x.y")]);
        let new = CallGraph::from_facts([("m1", "x.y")]);
        let tuples = diff_call_graphs(&request(ChangeType::Updated), &old, &new, &library_a());
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].callee, "a.foo");
    }

    #[test]
    fn declared_namespace_matches_exact_ids() {
        let ns = ApiNamespace::new(Arc::new(HashSet::from(["lib.A.f()".to_string()])));
        assert!(ns.contains("lib.A.f()"));
        assert!(!ns.contains("lib.A.g()"));
    }

    #[test]
    fn tuples_serialize_with_camel_case_fields() {
        let old = CallGraph::from_facts([("m1", "a.foo")]);
        let new = CallGraph::from_facts([("m1", "a.bar")]);
        let tuples = diff_call_graphs(&request(ChangeType::Updated), &old, &new, &library_a());
        let json = serde_json::to_value(&tuples[0]).unwrap();
        assert_eq!(json["clientV1"], "x:X:1.0");
        assert_eq!(json["affectedLib"], "g:a");
        assert_eq!(json["changeType"], "UPDATED");
        assert_eq!(json["bodyAfter"][0], "a.bar");
    }
}

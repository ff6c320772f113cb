use crate::error::Result;
use async_trait::async_trait;
use depshift_core::CallGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Both relations extracted from one archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeModel {
    pub declarations: HashSet<String>,
    pub call_graph: CallGraph,
}

/// Wire form shared by the command front end and the on-disk cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelFacts {
    #[serde(default)]
    pub declarations: Vec<String>,
    #[serde(default)]
    pub invocations: Vec<(String, String)>,
}

impl From<ModelFacts> for CodeModel {
    fn from(facts: ModelFacts) -> Self {
        Self {
            declarations: facts.declarations.into_iter().collect(),
            call_graph: CallGraph::from_facts(facts.invocations),
        }
    }
}

impl From<&CodeModel> for ModelFacts {
    fn from(model: &CodeModel) -> Self {
        let mut declarations: Vec<String> = model.declarations.iter().cloned().collect();
        declarations.sort();
        let invocations = model
            .call_graph
            .iter()
            .flat_map(|(caller, callees)| {
                callees
                    .iter()
                    .map(move |callee| (caller.to_string(), callee.clone()))
            })
            .collect();
        Self {
            declarations,
            invocations,
        }
    }
}

/// A static-analysis front end that reads one archive.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, archive: &Path) -> Result<CodeModel>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_keeps_invocation_order() {
        let json = r#"{"declarations":["a.f"],"invocations":[["m","z"],["m","a"],["m","z"]]}"#;
        let facts: ModelFacts = serde_json::from_str(json).unwrap();
        let model = CodeModel::from(facts);
        assert_eq!(model.call_graph.invocations("m"), ["z", "a", "z"]);

        let back = ModelFacts::from(&model);
        assert_eq!(back.invocations.len(), 3);
        assert_eq!(back.invocations[1], ("m".to_string(), "a".to_string()));
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let facts: ModelFacts = serde_json::from_str("{}").unwrap();
        assert!(CodeModel::from(facts).call_graph.is_empty());
    }
}

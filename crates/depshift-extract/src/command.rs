use crate::error::{ExtractError, Result};
use crate::model::{CodeModel, ModelBackend, ModelFacts};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs an external front end with the archive path as last argument and
/// reads its JSON model from stdout.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl ModelBackend for CommandExtractor {
    fn name(&self) -> &str {
        "command"
    }

    async fn extract(&self, archive: &Path) -> Result<CodeModel> {
        if !tokio::fs::try_exists(archive).await.unwrap_or(false) {
            return Err(ExtractError::MissingModel(archive.to_path_buf()));
        }

        debug!(program = %self.program, archive = %archive.display(), "Running front end");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(archive)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ExtractError::CommandFailed {
                command: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let facts: ModelFacts = serde_json::from_slice(&output.stdout)?;
        let model = CodeModel::from(facts);
        info!(
            archive = %archive.display(),
            callers = model.call_graph.caller_count(),
            declarations = model.declarations.len(),
            "Extracted code model"
        );
        Ok(model)
    }
}

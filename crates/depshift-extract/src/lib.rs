pub mod cache;
pub mod command;
pub mod error;
pub mod facts;
pub mod focus;
pub mod model;

pub use cache::*;
pub use command::*;
pub use error::*;
pub use facts::*;
pub use focus::*;
pub use model::*;

use depshift_core::{DepShiftConfig, DepShiftError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// The cached extractor selected by the `extractor` config section.
pub fn extractor_from_config(config: &DepShiftConfig) -> depshift_core::Result<CachedExtractor> {
    let section = &config.extractor;
    let backend: Arc<dyn ModelBackend> = match section.kind.as_str() {
        "facts" => Arc::new(FactFileExtractor::new()),
        "command" => {
            let program = section.command.clone().ok_or_else(|| {
                DepShiftError::Config("extractor.command is required for kind 'command'".into())
            })?;
            Arc::new(CommandExtractor::new(program, section.args.clone()))
        }
        other => {
            return Err(DepShiftError::Config(format!(
                "Unknown extractor kind: {}",
                other
            )))
        }
    };
    Ok(CachedExtractor::new(backend).with_cache_dir(section.cache_dir.clone()))
}

/// Every `.jar` below `root`, sorted.
pub fn find_archives(root: &Path) -> Vec<PathBuf> {
    let mut archives: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "jar"))
        .collect();
    archives.sort();
    archives
}

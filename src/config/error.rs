//! Workflow loading errors

use std::path::PathBuf;
use thiserror::Error;

/// Failures while locating or parsing a workflow specification
#[derive(Debug, Error)]
pub enum WorkflowLoadError {
    /// No file for the workflow exists in any search directory
    #[error("workflow '{id}' not found (searched: {})", format_paths(.searched))]
    NotFound { id: String, searched: Vec<PathBuf> },

    /// The id cannot name a file inside a search directory
    #[error("invalid workflow id '{id}'")]
    InvalidId { id: String },

    /// The file exists but could not be read
    #[error("failed to read workflow file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid workflow YAML
    #[error("failed to parse workflow file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Required fields are missing
    #[error("invalid workflow '{id}':\n  {}", .errors.join("\n  "))]
    Invalid { id: String, errors: Vec<String> },
}

impl WorkflowLoadError {
    /// True when the workflow simply does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkflowLoadError::NotFound { .. })
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "no workflow directories configured".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

//! Configuration loading with multi-layer merge, and workflow lookup

use super::error::WorkflowLoadError;
use super::workflow::WorkflowSpec;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level flowline configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FlowlineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub workflows: WorkflowsConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Where runs and steps are persisted
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database file path (supports `~` and `$VAR`)
    pub path: Option<String>,

    /// How long a connection waits on a locked database, in milliseconds
    pub busy_timeout_ms: Option<u64>,
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS))
    }
}

/// Where workflow files are searched
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowsConfig {
    /// Extra directories, searched before the defaults
    #[serde(default)]
    pub dirs: Vec<String>,
}

/// Settings for polling claimers
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Delay between claim attempts, in milliseconds
    pub poll_interval_ms: Option<u64>,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS))
    }
}

impl FlowlineConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/flowline/config.toml
    /// 3. .flowline/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        Self::load_layers(Self::user_config_path(), project_dir)
    }

    /// Load defaults, then the given user config, then the project config
    pub fn load_layers(user_config: Option<PathBuf>, project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_config_path) = user_config {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        let project_config_path = project_root(project_dir).join(".flowline/config.toml");
        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Get the user config path (~/.config/flowline/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("flowline/config.toml"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        if other.database.path.is_some() {
            self.database.path = other.database.path;
        }
        if other.database.busy_timeout_ms.is_some() {
            self.database.busy_timeout_ms = other.database.busy_timeout_ms;
        }
        if other.worker.poll_interval_ms.is_some() {
            self.worker.poll_interval_ms = other.worker.poll_interval_ms;
        }

        // Later layers search first
        let mut dirs = other.workflows.dirs;
        for dir in std::mem::take(&mut self.workflows.dirs) {
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        self.workflows.dirs = dirs;
    }

    /// Resolved database path
    ///
    /// Falls back to `<data dir>/flowline/flowline.db`.
    pub fn database_path(&self) -> Result<PathBuf> {
        match self.database.path.as_deref() {
            Some(raw) => expand_path(raw),
            None => {
                let data_dir =
                    dirs::data_dir().context("Could not determine data directory")?;
                Ok(data_dir.join("flowline").join("flowline.db"))
            }
        }
    }

    /// Workflow search directories in priority order
    ///
    /// Configured directories first, then `.flowline/workflows` in the project,
    /// then `~/.config/flowline/workflows`.
    pub fn workflow_dirs(&self, project_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
        let root = project_root(project_dir);
        let mut dirs = Vec::new();

        for raw in &self.workflows.dirs {
            let path = expand_path(raw)?;
            let path = if path.is_relative() {
                root.join(path)
            } else {
                path
            };
            push_unique(&mut dirs, path);
        }

        push_unique(&mut dirs, root.join(".flowline/workflows"));
        if let Some(config_dir) = dirs::config_dir() {
            push_unique(&mut dirs, config_dir.join("flowline/workflows"));
        }

        Ok(dirs)
    }
}

fn project_root(project_dir: Option<&Path>) -> PathBuf {
    project_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn push_unique(dirs: &mut Vec<PathBuf>, path: PathBuf) {
    if !dirs.contains(&path) {
        dirs.push(path);
    }
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).with_context(|| format!("expanding path '{}'", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Source of workflow specifications
pub trait WorkflowSource: Send + Sync {
    /// Load and presence-check the workflow with the given id
    fn load(&self, workflow_id: &str) -> Result<WorkflowSpec, WorkflowLoadError>;
}

/// Filesystem workflow source searching a list of directories
#[derive(Debug, Clone)]
pub struct WorkflowDirs {
    dirs: Vec<PathBuf>,
}

impl WorkflowDirs {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Directories searched, in order
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Candidate file paths for a workflow id, in search order
    pub fn candidates(&self, workflow_id: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for dir in &self.dirs {
            paths.push(dir.join(format!("{}.yml", workflow_id)));
            paths.push(dir.join(format!("{}.yaml", workflow_id)));
            paths.push(dir.join(workflow_id).join("workflow.yml"));
            paths.push(dir.join(workflow_id).join("workflow.yaml"));
        }
        paths
    }

    /// Workflow ids available across all directories (first match wins)
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for dir in &self.dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            let mut found: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    let path = entry.path();
                    if path.is_dir() {
                        let has_file = path.join("workflow.yml").is_file()
                            || path.join("workflow.yaml").is_file();
                        has_file
                            .then(|| entry.file_name().to_string_lossy().into_owned())
                    } else {
                        match path.extension().and_then(|e| e.to_str()) {
                            Some("yml") | Some("yaml") => path
                                .file_stem()
                                .map(|s| s.to_string_lossy().into_owned()),
                            _ => None,
                        }
                    }
                })
                .collect();
            found.sort();
            for id in found {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }
}

impl WorkflowSource for WorkflowDirs {
    fn load(&self, workflow_id: &str) -> Result<WorkflowSpec, WorkflowLoadError> {
        if !is_valid_workflow_id(workflow_id) {
            return Err(WorkflowLoadError::InvalidId {
                id: workflow_id.to_string(),
            });
        }
        let candidates = self.candidates(workflow_id);

        for path in &candidates {
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    tracing::debug!(workflow = workflow_id, path = %path.display(), "Loading workflow");
                    return parse_workflow(workflow_id, path, &contents);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(WorkflowLoadError::Io {
                        path: path.clone(),
                        source,
                    });
                }
            }
        }

        Err(WorkflowLoadError::NotFound {
            id: workflow_id.to_string(),
            searched: candidates,
        })
    }
}

/// Workflow ids name a file or directory inside a search directory
fn is_valid_workflow_id(workflow_id: &str) -> bool {
    !workflow_id.trim().is_empty()
        && workflow_id != "."
        && workflow_id != ".."
        && !workflow_id.contains(['/', '\\'])
}

fn parse_workflow(
    workflow_id: &str,
    path: &Path,
    contents: &str,
) -> Result<WorkflowSpec, WorkflowLoadError> {
    let mut workflow = WorkflowSpec::from_yaml(contents).map_err(|source| {
        WorkflowLoadError::Parse {
            path: path.to_path_buf(),
            source,
        }
    })?;

    // A file without an id takes the id it was looked up by
    if workflow.id.trim().is_empty() {
        workflow.id = workflow_id.to_string();
    }

    let mut errors = match workflow.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => errors,
    };
    if workflow.id != workflow_id {
        errors.push(format!(
            "file declares id '{}' but was loaded as '{}'",
            workflow.id, workflow_id
        ));
    }

    if errors.is_empty() {
        Ok(workflow)
    } else {
        Err(WorkflowLoadError::Invalid {
            id: workflow_id.to_string(),
            errors,
        })
    }
}

//! Declarative workflow definitions.
//!
//! A workflow is a TOML document in a file whose name ends in `.workflow`,
//! discovered recursively under the configured root:
//!
//! ```toml
//! id = "summarize-inbox"
//! version = 2
//! triggers = ["manual"]
//!
//! [[step]]
//! name = "collect"
//! handler = "cache.list_directory"
//!
//! [[step]]
//! name = "summarize"
//! handler = "llm.complete"
//! max_attempts = 5
//! timeout_ms = 120000
//! ```
//!
//! Steps reference host-injected capabilities by handler name; definitions
//! never resolve code themselves, so a name the host did not register is a
//! validation failure, not a runtime surprise.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid workflow {id}: {message}")]
    Invalid { id: String, message: String },
}

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    /// Capability name the host must have injected.
    pub handler: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-step timeout; the runtime default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

/// A named, versioned pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(rename = "step")]
    pub steps: Vec<StepSpec>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowSpec {
    pub fn parse(path: &Path, raw: &str) -> Result<Self, DefinitionError> {
        if raw.trim().is_empty() {
            return Err(DefinitionError::Parse {
                path: path.to_path_buf(),
                message: "empty workflow file".into(),
            });
        }
        let spec: WorkflowSpec = toml::from_str(raw).map_err(|e| DefinitionError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        if self.id.trim().is_empty() {
            return Err(DefinitionError::Invalid {
                id: self.id.clone(),
                message: "id is required".into(),
            });
        }
        if self.steps.is_empty() {
            return Err(DefinitionError::Invalid {
                id: self.id.clone(),
                message: "at least one step is required".into(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() || step.handler.trim().is_empty() {
                return Err(DefinitionError::Invalid {
                    id: self.id.clone(),
                    message: format!("step '{}' needs a name and a handler", step.name),
                });
            }
            if !seen.insert(step.name.as_str()) {
                return Err(DefinitionError::Invalid {
                    id: self.id.clone(),
                    message: format!("duplicate step name '{}'", step.name),
                });
            }
            if step.max_attempts == 0 {
                return Err(DefinitionError::Invalid {
                    id: self.id.clone(),
                    message: format!("step '{}' max_attempts must be > 0", step.name),
                });
            }
        }
        Ok(())
    }
}

/// Scan `root` recursively for `*.workflow` files.
///
/// Unreadable or invalid files are logged and skipped; one broken
/// definition must not take discovery down with it.
pub fn discover(root: &Path) -> Vec<(PathBuf, Result<WorkflowSpec, DefinitionError>)> {
    let mut found = Vec::new();
    if !root.is_dir() {
        debug!(root = %root.display(), "workflow root missing, nothing to discover");
        return found;
    }
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("workflow") {
            continue;
        }
        let parsed = std::fs::read_to_string(path)
            .map_err(|source| DefinitionError::Read {
                path: path.to_path_buf(),
                source,
            })
            .and_then(|raw| WorkflowSpec::parse(path, &raw));
        if let Err(e) = &parsed {
            warn!(path = %path.display(), error = %e, "skipping invalid workflow file");
        }
        found.push((path.to_path_buf(), parsed));
    }
    found
}

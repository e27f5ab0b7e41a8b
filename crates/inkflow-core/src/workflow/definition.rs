//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML files and the canonical `WorkflowDefinition`,
//! and validates structural constraints (unique IDs, valid dependencies,
//! name format). Step ids double as checkpoint file name components, so
//! their character set is restricted here.

use std::collections::HashSet;
use std::path::Path;

use inkflow_types::workflow::WorkflowDefinition;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from definition parsing and validation.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
///
/// Runs `validate_definition` after deserialization, so the returned value
/// is guaranteed to be structurally valid.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty and contains only alphanumeric characters and hyphens
/// - Version parses as a semantic version
/// - Step IDs are non-empty, unique, and filesystem-safe (alphanumeric,
///   hyphens, underscores)
/// - All `depends_on` references point to existing step IDs
/// - `max_workers` >= 1 if set
/// - Timeouts > 0 if set
///
/// An empty step list is valid: it compiles to an empty plan and the job
/// completes immediately.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if def.name.is_empty() {
        return Err(DefinitionError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }
    if !def.name.chars().all(|c| c.is_alphanumeric() || c == '-') {
        return Err(DefinitionError::Validation(format!(
            "workflow name '{}' contains invalid characters (only alphanumeric and hyphens allowed)",
            def.name
        )));
    }

    if semver::Version::parse(&def.version).is_err() {
        return Err(DefinitionError::Validation(format!(
            "workflow version '{}' is not a valid semantic version",
            def.version
        )));
    }

    let mut seen_ids = HashSet::new();
    for step in &def.steps {
        if step.id.is_empty() {
            return Err(DefinitionError::Validation(
                "step ID must not be empty".to_string(),
            ));
        }
        if !step
            .id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DefinitionError::Validation(format!(
                "step ID '{}' contains invalid characters (only alphanumeric, hyphens and underscores allowed)",
                step.id
            )));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(DefinitionError::Validation(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
        if let Some(t) = step.timeout_secs {
            if t == 0 {
                return Err(DefinitionError::Validation(format!(
                    "step '{}' timeout must be > 0",
                    step.id
                )));
            }
        }
    }

    for step in &def.steps {
        for dep in &step.depends_on {
            if !seen_ids.contains(dep.as_str()) {
                return Err(DefinitionError::Validation(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                )));
            }
        }
    }

    if let Some(w) = def.max_workers {
        if w < 1 {
            return Err(DefinitionError::Validation(
                "max_workers must be >= 1".to_string(),
            ));
        }
    }
    if let Some(t) = def.group_timeout_secs {
        if t == 0 {
            return Err(DefinitionError::Validation(
                "group timeout must be > 0".to_string(),
            ));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Save a workflow definition to a YAML file.
///
/// Creates parent directories if they don't exist.
pub fn save_workflow_file(path: &Path, def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_workflow_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::audit::can_export_project;
use super::project::Project;
use super::rules::ComplianceRules;
use super::validation::{run_full_validation, ValidationResult};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export blocked: {reason}")]
    Blocked { reason: String },
    #[error("export document could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Key/value document handed to the export collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct ExportArtifact {
    pub project: Project,
    pub validation: ValidationResult,
    pub exported_at: DateTime<Utc>,
}

impl ExportArtifact {
    pub fn to_document(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Assemble the export artifact; refused unless the export gate allows it.
pub fn build_export(
    project: &Project,
    rules: &ComplianceRules,
    now: DateTime<Utc>,
) -> Result<ExportArtifact, ExportError> {
    let eligibility = can_export_project(project);
    if !eligibility.allowed {
        return Err(ExportError::Blocked {
            reason: eligibility.reason,
        });
    }

    Ok(ExportArtifact {
        project: project.clone(),
        validation: run_full_validation(project, rules),
        exported_at: now,
    })
}

use serde::{Deserialize, Serialize};

use super::domain::ModuleBlock;
use super::error::ProjectError;
use super::overlay::{resolve_effective_block, OverlayPolicy};
use super::project::Project;
use super::registry::{ModuleDefinition, ModuleId, ModuleKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Incomplete,
    Partial,
    Complete,
}

impl ModuleStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Partial => "partial",
            Self::Complete => "complete",
        }
    }
}

/// Derived completion view of one module. Never stored authoritatively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleState {
    pub module_id: ModuleId,
    pub name: String,
    pub completed_fields: Vec<String>,
    pub missing_fields: Vec<String>,
    pub status: ModuleStatus,
    pub locked: bool,
}

/// Classify a block against a module definition's required fields.
pub fn evaluate_block(definition: &ModuleDefinition, block: &ModuleBlock) -> ModuleState {
    let (completed, missing): (Vec<&str>, Vec<&str>) = definition
        .required_fields
        .iter()
        .partition(|field| block.is_populated(field));

    let status = if completed.is_empty() {
        ModuleStatus::Incomplete
    } else if missing.is_empty() {
        ModuleStatus::Complete
    } else {
        ModuleStatus::Partial
    };

    ModuleState {
        module_id: definition.id,
        name: definition.name.to_string(),
        completed_fields: completed.into_iter().map(str::to_string).collect(),
        missing_fields: missing.into_iter().map(str::to_string).collect(),
        status,
        locked: false,
    }
}

fn evaluate_kind(project: &Project, kind: ModuleKind, policy: &OverlayPolicy) -> ModuleState {
    let resolved = resolve_effective_block(project, kind, policy);
    evaluate_block(kind.definition(), &resolved.block)
}

/// State of a single module, including the final-compilation lock.
pub fn evaluate_module(
    project: &Project,
    id: ModuleId,
    policy: &OverlayPolicy,
) -> Result<ModuleState, ProjectError> {
    let kind = ModuleKind::from_id(id).ok_or(ProjectError::UnknownModule(id))?;
    if kind == ModuleKind::FinalCompilation {
        return compute_module_states(project, policy)
            .into_iter()
            .find(|state| state.module_id == id)
            .ok_or(ProjectError::UnknownModule(id));
    }
    Ok(evaluate_kind(project, kind, policy))
}

/// All nine module states in registry order; module 8 is locked until 1-7 are complete.
pub fn compute_module_states(project: &Project, policy: &OverlayPolicy) -> Vec<ModuleState> {
    let mut states: Vec<ModuleState> = ModuleKind::ordered()
        .into_iter()
        .map(|kind| evaluate_kind(project, kind, policy))
        .collect();

    let prerequisites_complete = states
        .iter()
        .filter(|state| state.module_id < ModuleKind::FinalCompilation.id())
        .all(|state| state.status == ModuleStatus::Complete);

    if let Some(final_state) = states
        .iter_mut()
        .find(|state| state.module_id == ModuleKind::FinalCompilation.id())
    {
        final_state.locked = !prerequisites_complete;
    }

    states
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::grant::domain::FieldValue;
    use crate::workflows::grant::registry::ModuleDefinition;

    static TWO_FIELDS: ModuleDefinition = ModuleDefinition {
        id: ModuleId(1),
        kind: ModuleKind::TitleConcept,
        name: "Two fields",
        required_fields: &["alpha", "beta"],
    };

    #[test]
    fn status_follows_populated_count() {
        let empty = ModuleBlock::new();
        assert_eq!(evaluate_block(&TWO_FIELDS, &empty).status, ModuleStatus::Incomplete);

        let one = ModuleBlock::new().with("alpha", FieldValue::text("set"));
        let state = evaluate_block(&TWO_FIELDS, &one);
        assert_eq!(state.status, ModuleStatus::Partial);
        assert_eq!(state.missing_fields, vec!["beta".to_string()]);

        let both = one.with("beta", FieldValue::Number(0.0));
        assert_eq!(evaluate_block(&TWO_FIELDS, &both).status, ModuleStatus::Complete);
    }

    #[test]
    fn whitespace_text_does_not_count() {
        let block = ModuleBlock::new()
            .with("alpha", FieldValue::text("  "))
            .with("beta", FieldValue::List(Vec::new()));
        assert_eq!(evaluate_block(&TWO_FIELDS, &block).status, ModuleStatus::Incomplete);
    }
}

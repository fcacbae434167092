use super::domain::PhaseSlot;
use super::registry::ModuleId;

/// Rejections raised when an edit cannot be applied to a project.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectError {
    #[error("module {0} does not exist")]
    UnknownModule(ModuleId),
    #[error("module {0} is locked until modules 1-7 are complete")]
    ModuleLocked(ModuleId),
    #[error("module {0} does not split by phase")]
    NotSplitModule(ModuleId),
    #[error("project grant type does not use phase sections")]
    NotSplitPhase,
    #[error("module {module} has no {} section", .slot.label())]
    SlotMismatch { module: ModuleId, slot: PhaseSlot },
    #[error("phase 2 section of module {module} is locked until its phase 1 section is complete")]
    PhaseLocked { module: ModuleId },
    #[error("no {kind} with id '{id}'")]
    UnknownBudgetEntry { kind: &'static str, id: String },
    #[error("{field} must be a finite, non-negative percentage (found {value})")]
    InvalidRate { field: &'static str, value: f64 },
    #[error("{field} of '{id}' must not be negative (found {value})")]
    InvalidAmount {
        field: &'static str,
        id: String,
        value: i64,
    },
    #[error("{field} in module {module} is calculated from the budget worksheet and cannot be edited")]
    DerivedField { module: ModuleId, field: String },
}

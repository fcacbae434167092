//! Grant application authoring and compliance rules.
//!
//! A `Project` owns nine module blocks, phase overlays for combined-phase awards, a budget
//! worksheet and an append-only audit trail. Completion, lifecycle, budget and overlay
//! rules are evaluated synchronously against that aggregate; only the compliance scorer
//! sits behind an external boundary.

pub mod audit;
pub mod budget;
pub mod completion;
pub mod domain;
pub mod error;
pub mod export;
pub mod lifecycle;
pub mod overlay;
pub mod persistence;
pub mod project;
pub mod registry;
pub mod router;
pub mod rules;
pub mod service;
pub mod validation;

#[cfg(test)]
mod tests;

pub use audit::{
    can_export_project, content_fingerprint, run_compliance_audit, AgencyAlignmentScore,
    AuditAction, AuditError, AuditOutcome, AuditRequest, ComplianceAuditEntry,
    ComplianceAuditResult, ComplianceContext, ComplianceScore, ComplianceScorer,
    ExportEligibility, RubricComplianceScorer, ScoringError,
};
pub use budget::{
    calculate_budget, BudgetCalculation, BudgetEdit, BudgetSnapshot, BudgetWorksheet,
    BudgetWorksheets, CostCategory, InstituteCatalog, LineItem, PhaseBudget, SubAward,
    SubAwardDraft, Vendor,
};
pub use completion::{compute_module_states, ModuleState, ModuleStatus};
pub use domain::{
    FieldValue, GrantType, ModuleBlock, ModulePatch, Phase, PhaseSlot, ProgramType, ProjectId,
    Severity, ValidationIssue,
};
pub use error::ProjectError;
pub use export::{build_export, ExportArtifact, ExportError};
pub use lifecycle::{check_lifecycle, LifecycleCheck, LifecycleError, LifecycleState};
pub use overlay::OverlayPolicy;
pub use persistence::{
    decode_project, encode_project, PersistenceError, ProjectRepository, ProjectSummary,
    RepositoryError,
};
pub use project::{EvidenceUpdate, FundingOpportunity, Project, ProjectDraft};
pub use registry::{ModuleId, ModuleKind};
pub use router::grant_router;
pub use rules::ComplianceRules;
pub use service::{GrantApplicationService, ServiceError};
pub use validation::{run_full_validation, ReadinessStatus, ValidationResult};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::audit::{
    can_export_project, record_export_attempt, run_compliance_audit, AuditError, AuditOutcome,
    AuditRequest, ComplianceScorer, ExportEligibility,
};
use super::budget::{BudgetEdit, BudgetSnapshot};
use super::completion::{compute_module_states, evaluate_module, ModuleState};
use super::domain::{ModulePatch, PhaseSlot, ProjectId};
use super::error::ProjectError;
use super::export::{build_export, ExportArtifact, ExportError};
use super::lifecycle::{check_lifecycle, LifecycleCheck, LifecycleError};
use super::overlay::PhaseBlock;
use super::persistence::{ProjectRepository, ProjectSummary, RepositoryError};
use super::project::{EvidenceUpdate, Project, ProjectDraft};
use super::registry::ModuleId;
use super::rules::ComplianceRules;
use super::validation::{run_full_validation, ValidationResult};

/// Facade composing the rules engine, the repository and the scoring collaborator.
///
/// Every mutating call loads the project, mutates the owned aggregate and writes the whole
/// record back in one `update`.
pub struct GrantApplicationService<R, S> {
    repository: Arc<R>,
    scorer: Arc<S>,
    rules: Arc<ComplianceRules>,
}

static PROJECT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_project_id() -> ProjectId {
    let id = PROJECT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ProjectId(format!("grant-{id:06}"))
}

impl<R, S> GrantApplicationService<R, S>
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    pub fn new(repository: Arc<R>, scorer: Arc<S>, rules: ComplianceRules) -> Self {
        Self {
            repository,
            scorer,
            rules: Arc::new(rules),
        }
    }

    pub fn rules(&self) -> &ComplianceRules {
        &self.rules
    }

    pub fn create(&self, draft: ProjectDraft) -> Result<Project, ServiceError> {
        let project = Project::new(next_project_id(), draft, &self.rules)?;
        let stored = self.repository.insert(project)?;
        info!(
            project = %stored.id().0,
            grant_type = ?stored.grant_type(),
            institute = stored.institute(),
            "grant project created"
        );
        Ok(stored)
    }

    pub fn get(&self, id: &ProjectId) -> Result<Project, ServiceError> {
        let project = self
            .repository
            .fetch(id)?
            .ok_or(RepositoryError::NotFound)?;
        Ok(project)
    }

    pub fn list(&self) -> Result<Vec<ProjectSummary>, ServiceError> {
        Ok(self.repository.list()?)
    }

    pub fn patch_module(
        &self,
        id: &ProjectId,
        module_id: ModuleId,
        patch: &ModulePatch,
    ) -> Result<ModuleState, ServiceError> {
        let mut project = self.get(id)?;
        project.apply_module_patch(module_id, patch, &self.rules)?;
        let state = evaluate_module(&project, module_id, &self.rules.overlay)?;
        self.repository.update(project)?;
        debug!(project = %id.0, module = %module_id, status = state.status.label(), "module patched");
        Ok(state)
    }

    pub fn patch_phase(
        &self,
        id: &ProjectId,
        module_id: ModuleId,
        slot: PhaseSlot,
        patch: &ModulePatch,
    ) -> Result<PhaseBlock, ServiceError> {
        let mut project = self.get(id)?;
        let block = project
            .apply_phase_patch(module_id, slot, patch)?
            .clone();
        self.repository.update(project)?;
        debug!(
            project = %id.0,
            module = %module_id,
            slot = slot.label(),
            complete = block.is_complete(),
            "phase section patched"
        );
        Ok(block)
    }

    pub fn update_evidence(
        &self,
        id: &ProjectId,
        update: EvidenceUpdate,
    ) -> Result<LifecycleCheck, ServiceError> {
        let mut project = self.get(id)?;
        project.update_evidence(update);
        let check = check_lifecycle(&project);
        self.repository.update(project)?;
        Ok(check)
    }

    pub fn apply_budget_edit(
        &self,
        id: &ProjectId,
        edit: &BudgetEdit,
    ) -> Result<BudgetSnapshot, ServiceError> {
        let mut project = self.get(id)?;
        let snapshot = project.apply_budget_edit(edit, &self.rules)?.clone();
        self.repository.update(project)?;
        debug!(
            project = %id.0,
            total_direct_costs = snapshot.calculation.total_direct_costs,
            "budget recalculated"
        );
        Ok(snapshot)
    }

    pub fn module_states(&self, id: &ProjectId) -> Result<Vec<ModuleState>, ServiceError> {
        let project = self.get(id)?;
        Ok(compute_module_states(&project, &self.rules.overlay))
    }

    pub fn validate(&self, id: &ProjectId) -> Result<ValidationResult, ServiceError> {
        let project = self.get(id)?;
        Ok(run_full_validation(&project, &self.rules))
    }

    /// Run the scorer once. A scorer failure is returned without touching the stored project.
    pub fn run_audit(
        &self,
        id: &ProjectId,
        request: &AuditRequest,
    ) -> Result<AuditOutcome, ServiceError> {
        let mut project = self.get(id)?;
        let outcome = match run_compliance_audit(
            &mut project,
            self.scorer.as_ref(),
            &self.rules,
            request,
            Utc::now(),
        ) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(project = %id.0, %error, "compliance audit failed; export remains blocked");
                return Err(error.into());
            }
        };
        self.repository.update(project)?;
        info!(
            project = %id.0,
            action = ?outcome.entry.action,
            compliance = outcome.entry.compliance_score,
            alignment = outcome.entry.agency_alignment_score,
            passed = outcome.entry.passed,
            "compliance audit recorded"
        );
        Ok(outcome)
    }

    pub fn export_eligibility(&self, id: &ProjectId) -> Result<ExportEligibility, ServiceError> {
        let project = self.get(id)?;
        Ok(can_export_project(&project))
    }

    /// Build the export artifact and record the attempt, successful or not.
    pub fn export(&self, id: &ProjectId) -> Result<ExportArtifact, ServiceError> {
        let mut project = self.get(id)?;
        let now = Utc::now();
        let eligibility = can_export_project(&project);
        let artifact = build_export(&project, &self.rules, now);

        record_export_attempt(&mut project, &eligibility, now)?;
        self.repository.update(project)?;

        match artifact {
            Ok(artifact) => {
                info!(project = %id.0, "grant application exported");
                Ok(artifact)
            }
            Err(error) => {
                warn!(project = %id.0, reason = %eligibility.reason, "export blocked");
                Err(error.into())
            }
        }
    }
}

/// Error raised by the grant application service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

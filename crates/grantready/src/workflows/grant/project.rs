//! Project aggregate root.
//!
//! Every mutation goes through a method on an owned `Project`: module patches, phase
//! patches, evidence updates, budget edits and audit appends. Derived views (the budget
//! module block and the flattened snapshot) are computed in full before any field is
//! assigned.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::audit::{AuditAction, AuditTrail, ComplianceAuditEntry};
use super::budget::{
    allocation_scope, resolve_budget_cap, BudgetCalculation, BudgetEdit, BudgetSnapshot,
    BudgetWorksheet, BudgetWorksheets, CapError, PhaseBudget,
};
use super::completion::compute_module_states;
use super::domain::{
    FieldValue, GrantType, ModuleBlock, ModulePatch, Phase, PhaseSlot, ProgramType, ProjectId,
};
use super::error::ProjectError;
use super::lifecycle::{FeasibilityEvidence, LifecycleError, LifecycleState, PriorPhaseEvidence};
use super::overlay::{PhaseBlock, PhaseOverlays};
use super::persistence::CURRENT_SCHEMA_VERSION;
use super::registry::{ModuleId, ModuleKind, SplitModule};
use super::rules::ComplianceRules;

/// Whether the funding opportunity requires, permits or forbids a clinical trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClinicalTrialPolicy {
    Required,
    Optional,
    NotAllowed,
}

/// Terms a specific funding opportunity announcement places on top of institute defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingOpportunityOverrides {
    /// Replaces the institute cap for every grant type and phase.
    #[serde(default)]
    pub budget_cap: Option<i64>,
    #[serde(default)]
    pub clinical_trial: Option<ClinicalTrialPolicy>,
    /// Empty means every grant type is eligible.
    #[serde(default)]
    pub eligible_grant_types: Vec<GrantType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingOpportunity {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub overrides: FundingOpportunityOverrides,
}

/// Creation payload. The grant type is fixed by this draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDraft {
    pub name: String,
    pub grant_type: GrantType,
    pub program_type: ProgramType,
    pub institute: String,
    #[serde(default)]
    pub funding_opportunity: FundingOpportunity,
    #[serde(default)]
    pub clinical_trial: bool,
    #[serde(default)]
    pub prior_phase: PriorPhaseEvidence,
    #[serde(default)]
    pub feasibility_evidence: FeasibilityEvidence,
}

/// Replacement evidence; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceUpdate {
    #[serde(default)]
    pub prior_phase: Option<PriorPhaseEvidence>,
    #[serde(default)]
    pub feasibility_evidence: Option<FeasibilityEvidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    id: ProjectId,
    schema_version: u32,
    name: String,
    #[serde(rename = "grant_type", default)]
    lifecycle: LifecycleState,
    program_type: ProgramType,
    institute: String,
    #[serde(default)]
    funding_opportunity: FundingOpportunity,
    #[serde(default)]
    clinical_trial: bool,
    #[serde(default)]
    modules: BTreeMap<ModuleId, ModuleBlock>,
    #[serde(default)]
    overlays: PhaseOverlays,
    #[serde(default)]
    prior_phase: PriorPhaseEvidence,
    #[serde(default)]
    feasibility_evidence: FeasibilityEvidence,
    #[serde(default)]
    budget: BudgetWorksheets,
    #[serde(default)]
    budget_snapshot: Option<BudgetSnapshot>,
    #[serde(default)]
    audit_trail: AuditTrail,
    #[serde(default)]
    last_compliance_score: Option<u8>,
    #[serde(default)]
    last_agency_alignment_score: Option<u8>,
    #[serde(default)]
    export_allowed: bool,
}

/// Module 6 fields written only by the budget engine.
pub const DERIVED_BUDGET_FIELDS: [&str; 5] = [
    "total_direct_costs",
    "indirect_costs",
    "mtdc",
    "fee_profit",
    "total_project_costs",
];

enum BudgetTarget {
    Legacy,
    Section(PhaseSlot),
}

/// A worksheet together with the cap and allocation rule it is validated against.
#[derive(Debug, Clone)]
pub struct BudgetScope<'a> {
    /// `None` for single-phase grants.
    pub phase: Option<Phase>,
    pub worksheet: &'a BudgetWorksheet,
    pub cap: Result<i64, CapError>,
    pub allocation_scope: Phase,
    /// Module 6 block (legacy or phase section) the worksheet writes its figures into.
    pub block: Option<&'a ModuleBlock>,
}

impl Project {
    /// Create a project, selecting its grant type against the institute configuration.
    pub fn new(
        id: ProjectId,
        draft: ProjectDraft,
        rules: &ComplianceRules,
    ) -> Result<Self, LifecycleError> {
        let institute = rules
            .catalog
            .get(&draft.institute)
            .ok_or_else(|| LifecycleError::UnknownInstitute(draft.institute.clone()))?;
        let lifecycle = LifecycleState::Unselected.select(draft.grant_type, institute)?;

        Ok(Self {
            id,
            schema_version: CURRENT_SCHEMA_VERSION,
            name: draft.name,
            lifecycle,
            program_type: draft.program_type,
            institute: institute.code.clone(),
            funding_opportunity: draft.funding_opportunity,
            clinical_trial: draft.clinical_trial,
            modules: BTreeMap::new(),
            overlays: PhaseOverlays::default(),
            prior_phase: draft.prior_phase,
            feasibility_evidence: draft.feasibility_evidence,
            budget: BudgetWorksheets::default(),
            budget_snapshot: None,
            audit_trail: AuditTrail::default(),
            last_compliance_score: None,
            last_agency_alignment_score: None,
            export_allowed: false,
        })
    }

    pub fn id(&self) -> &ProjectId {
        &self.id
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn grant_type(&self) -> Option<GrantType> {
        self.lifecycle.grant_type()
    }

    pub fn is_split_phase(&self) -> bool {
        self.grant_type()
            .map(GrantType::is_split_phase)
            .unwrap_or(false)
    }

    pub fn program_type(&self) -> ProgramType {
        self.program_type
    }

    pub fn institute(&self) -> &str {
        &self.institute
    }

    pub fn funding_opportunity(&self) -> &FundingOpportunity {
        &self.funding_opportunity
    }

    pub fn clinical_trial(&self) -> bool {
        self.clinical_trial
    }

    pub fn module(&self, id: ModuleId) -> Option<&ModuleBlock> {
        self.modules.get(&id)
    }

    pub fn modules(&self) -> &BTreeMap<ModuleId, ModuleBlock> {
        &self.modules
    }

    pub fn overlays(&self) -> &PhaseOverlays {
        &self.overlays
    }

    pub fn prior_phase(&self) -> &PriorPhaseEvidence {
        &self.prior_phase
    }

    pub fn feasibility_evidence(&self) -> &FeasibilityEvidence {
        &self.feasibility_evidence
    }

    /// Worksheet that budget edits currently address.
    pub fn budget(&self) -> &BudgetWorksheet {
        self.budget.active()
    }

    pub fn budget_worksheets(&self) -> &BudgetWorksheets {
        &self.budget
    }

    pub fn budget_phase(&self) -> Option<Phase> {
        self.budget.active_phase
    }

    pub fn budget_snapshot(&self) -> Option<&BudgetSnapshot> {
        self.budget_snapshot.as_ref()
    }

    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit_trail
    }

    pub fn last_compliance_score(&self) -> Option<u8> {
        self.last_compliance_score
    }

    pub fn last_agency_alignment_score(&self) -> Option<u8> {
        self.last_agency_alignment_score
    }

    /// Outcome of the most recent whole-project audit. The export gate does not trust it alone.
    pub fn export_allowed(&self) -> bool {
        self.export_allowed
    }

    /// Patch the single-phase block of a module. Module 8 rejects edits while locked.
    pub fn apply_module_patch(
        &mut self,
        id: ModuleId,
        patch: &ModulePatch,
        rules: &ComplianceRules,
    ) -> Result<&ModuleBlock, ProjectError> {
        let kind = ModuleKind::from_id(id).ok_or(ProjectError::UnknownModule(id))?;
        if kind == ModuleKind::BudgetJustification {
            reject_derived_fields(id, patch)?;
        }
        if kind == ModuleKind::FinalCompilation {
            let locked = compute_module_states(self, &rules.overlay)
                .iter()
                .any(|state| state.module_id == id && state.locked);
            if locked {
                return Err(ProjectError::ModuleLocked(id));
            }
        }

        let block = self.modules.entry(id).or_default();
        block.apply(patch);
        Ok(&*block)
    }

    /// Patch one phase section of a split module on a combined-phase project.
    pub fn apply_phase_patch(
        &mut self,
        id: ModuleId,
        slot: PhaseSlot,
        patch: &ModulePatch,
    ) -> Result<&PhaseBlock, ProjectError> {
        let kind = ModuleKind::from_id(id).ok_or(ProjectError::UnknownModule(id))?;
        if !self.is_split_phase() {
            return Err(ProjectError::NotSplitPhase);
        }
        let module = kind.split().ok_or(ProjectError::NotSplitModule(id))?;
        if module == SplitModule::Budget {
            reject_derived_fields(id, patch)?;
        }
        self.overlays.apply_patch(module, slot, patch)
    }

    pub fn update_evidence(&mut self, update: EvidenceUpdate) {
        if let Some(prior_phase) = update.prior_phase {
            self.prior_phase = prior_phase;
        }
        if let Some(feasibility_evidence) = update.feasibility_evidence {
            self.feasibility_evidence = feasibility_evidence;
        }
    }

    /// Direct-cost cap in force: the funding opportunity override, else the institute cap.
    pub fn effective_budget_cap(
        &self,
        rules: &ComplianceRules,
        active_phase: Option<Phase>,
    ) -> Result<i64, CapError> {
        if let Some(cap) = self.funding_opportunity.overrides.budget_cap {
            return Ok(cap);
        }
        let grant_type = self.grant_type().ok_or(CapError::GrantTypeUnselected)?;
        let institute = rules
            .catalog
            .get(&self.institute)
            .ok_or_else(|| CapError::UnknownInstitute(self.institute.clone()))?;
        resolve_budget_cap(institute, grant_type, active_phase)
    }

    /// Apply a worksheet edit and replace the worksheets, snapshot and budget block together.
    ///
    /// Fast-Track edits go to the worksheet of the active phase (phase 1 when none is set)
    /// and write back into that phase's budget section only.
    pub fn apply_budget_edit(
        &mut self,
        edit: &BudgetEdit,
        rules: &ComplianceRules,
    ) -> Result<&BudgetSnapshot, ProjectError> {
        let mut worksheets = self.budget.clone();
        match edit {
            BudgetEdit::SetActivePhase { phase } => {
                if phase.is_some() && !self.is_split_phase() {
                    return Err(ProjectError::NotSplitPhase);
                }
                worksheets.active_phase = *phase;
            }
            _ => {
                let phase = worksheets.active_phase;
                worksheets.worksheet_mut(phase).apply(edit)?;
            }
        }

        let target = self.budget_target(worksheets.active_phase);
        if let BudgetTarget::Section(PhaseSlot::Phase2) = target {
            if self.overlays.phase2_locked(SplitModule::Budget) {
                return Err(ProjectError::PhaseLocked {
                    module: ModuleKind::BudgetJustification.id(),
                });
            }
        }

        let snapshot = self.derive_snapshot(&worksheets, rules);
        let existing = match target {
            BudgetTarget::Legacy => self
                .modules
                .get(&ModuleKind::BudgetJustification.id())
                .cloned()
                .unwrap_or_default(),
            BudgetTarget::Section(slot) => self
                .overlays
                .section_data(SplitModule::Budget, slot)
                .clone(),
        };
        let block = budget_block(existing, &worksheets.active().calculate());

        self.budget = worksheets;
        match target {
            BudgetTarget::Legacy => {
                self.modules
                    .insert(ModuleKind::BudgetJustification.id(), block);
            }
            BudgetTarget::Section(slot) => {
                self.overlays
                    .replace_section(SplitModule::Budget, slot, block);
            }
        }
        Ok(&*self.budget_snapshot.insert(snapshot))
    }

    /// Snapshot recomputed from the stored worksheets.
    pub fn current_budget_snapshot(&self, rules: &ComplianceRules) -> BudgetSnapshot {
        self.derive_snapshot(&self.budget, rules)
    }

    /// Every worksheet the project validates: one per phase for Fast-Track, else one.
    pub fn budget_scopes(&self, rules: &ComplianceRules) -> Vec<BudgetScope<'_>> {
        let grant_type = self.grant_type();
        if !self.is_split_phase() {
            return vec![BudgetScope {
                phase: None,
                worksheet: &self.budget.primary,
                cap: self.effective_budget_cap(rules, None),
                allocation_scope: allocation_scope(grant_type, None),
                block: self.modules.get(&ModuleKind::BudgetJustification.id()),
            }];
        }

        [Phase::Phase1, Phase::Phase2]
            .into_iter()
            .map(|phase| BudgetScope {
                phase: Some(phase),
                worksheet: self.budget.worksheet(Some(phase)),
                cap: self.effective_budget_cap(rules, Some(phase)),
                allocation_scope: allocation_scope(grant_type, Some(phase)),
                block: self
                    .overlays
                    .block(SplitModule::Budget, phase.slot())
                    .map(PhaseBlock::data),
            })
            .collect()
    }

    fn derive_snapshot(&self, worksheets: &BudgetWorksheets, rules: &ComplianceRules) -> BudgetSnapshot {
        let active = worksheets.active();
        if !self.is_split_phase() {
            let cap = self.effective_budget_cap(rules, None).ok();
            return BudgetSnapshot::new(active, None, cap);
        }

        let phases = [Phase::Phase1, Phase::Phase2]
            .into_iter()
            .map(|phase| PhaseBudget {
                phase,
                budget_cap: self.effective_budget_cap(rules, Some(phase)).ok(),
                calculation: worksheets.worksheet(Some(phase)).calculate(),
            })
            .collect();
        let combined_cap = self.effective_budget_cap(rules, None).ok();
        BudgetSnapshot::combined(phases, active, worksheets.active_phase, combined_cap)
    }

    fn budget_target(&self, active_phase: Option<Phase>) -> BudgetTarget {
        if !self.is_split_phase() {
            return BudgetTarget::Legacy;
        }
        match active_phase {
            Some(Phase::Phase2) => BudgetTarget::Section(PhaseSlot::Phase2),
            _ => BudgetTarget::Section(PhaseSlot::Phase1),
        }
    }

    /// Append an audit entry; whole-project checks also refresh the recorded scores.
    pub(crate) fn record_audit(&mut self, entry: ComplianceAuditEntry) -> &ComplianceAuditEntry {
        if entry.action == AuditAction::Check {
            self.last_compliance_score = Some(entry.compliance_score);
            self.last_agency_alignment_score = Some(entry.agency_alignment_score);
            self.export_allowed = entry.passed;
        }
        self.audit_trail.append(entry)
    }
}

fn reject_derived_fields(module: ModuleId, patch: &ModulePatch) -> Result<(), ProjectError> {
    let derived = patch
        .set
        .keys()
        .chain(patch.clear.iter())
        .find(|field| DERIVED_BUDGET_FIELDS.contains(&field.as_str()));
    match derived {
        Some(field) => Err(ProjectError::DerivedField {
            module,
            field: field.clone(),
        }),
        None => Ok(()),
    }
}

/// Figures the budget engine writes into module 6 for a calculation.
pub fn budget_figures(calculation: &BudgetCalculation) -> [(&'static str, i64); 5] {
    [
        ("total_direct_costs", calculation.total_direct_costs),
        (
            "indirect_costs",
            calculation
                .indirect_costs
                .saturating_add(calculation.sub_award_indirect),
        ),
        ("mtdc", calculation.mtdc),
        ("fee_profit", calculation.fee_profit),
        ("total_project_costs", calculation.total_project_costs),
    ]
}

fn budget_block(mut block: ModuleBlock, calculation: &BudgetCalculation) -> ModuleBlock {
    for (field, amount) in budget_figures(calculation) {
        block.insert(field, FieldValue::Number(amount as f64));
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::grant::budget::{CostCategory, LineItem};

    fn draft(grant_type: GrantType, institute: &str) -> ProjectDraft {
        ProjectDraft {
            name: "Rapid sepsis assay".to_string(),
            grant_type,
            program_type: ProgramType::Sbir,
            institute: institute.to_string(),
            funding_opportunity: FundingOpportunity::default(),
            clinical_trial: false,
            prior_phase: PriorPhaseEvidence::default(),
            feasibility_evidence: FeasibilityEvidence::default(),
        }
    }

    #[test]
    fn unknown_institute_fails_at_creation() {
        let rules = ComplianceRules::default();
        let result = Project::new(
            ProjectId("p-1".to_string()),
            draft(GrantType::PhaseI, "NASA"),
            &rules,
        );
        assert_eq!(result, Err(LifecycleError::UnknownInstitute("NASA".to_string())));
    }

    #[test]
    fn institute_code_is_normalized() {
        let rules = ComplianceRules::default();
        let project = Project::new(
            ProjectId("p-1".to_string()),
            draft(GrantType::PhaseI, "nci"),
            &rules,
        )
        .expect("project created");
        assert_eq!(project.institute(), "NCI");
        assert_eq!(project.schema_version(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn budget_edit_preserves_justification() {
        let rules = ComplianceRules::default();
        let mut project = Project::new(
            ProjectId("p-1".to_string()),
            draft(GrantType::PhaseI, "NCI"),
            &rules,
        )
        .expect("project created");
        project
            .apply_module_patch(
                ModuleKind::BudgetJustification.id(),
                &ModulePatch::default().set("justification", FieldValue::text("PI at 30% effort")),
                &rules,
            )
            .expect("patch applies");

        let snapshot = project
            .apply_budget_edit(
                &BudgetEdit::UpsertLineItem(LineItem {
                    id: "li-1".to_string(),
                    category: CostCategory::Personnel,
                    description: "PI".to_string(),
                    amount: 90_000,
                }),
                &rules,
            )
            .expect("edit applies");
        assert_eq!(snapshot.budget_cap, Some(400_000));

        let block = project
            .module(ModuleKind::BudgetJustification.id())
            .expect("budget block written");
        assert_eq!(block.get("total_direct_costs"), Some(&FieldValue::Number(90_000.0)));
        assert!(block.is_populated("justification"));
    }

    #[test]
    fn funding_opportunity_cap_overrides_institute() {
        let rules = ComplianceRules::default();
        let mut request = draft(GrantType::PhaseI, "NCI");
        request.funding_opportunity.overrides.budget_cap = Some(275_000);
        let project = Project::new(ProjectId("p-1".to_string()), request, &rules)
            .expect("project created");

        assert_eq!(project.effective_budget_cap(&rules, None), Ok(275_000));
    }
}

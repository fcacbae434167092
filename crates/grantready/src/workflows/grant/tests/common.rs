use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use serde_json::Value;

use crate::workflows::grant::audit::{
    AgencyAlignmentScore, ComplianceAuditResult, ComplianceContext, ComplianceScore,
    ComplianceScorer, RubricComplianceScorer, ScoringError,
};
use crate::workflows::grant::budget::{BudgetEdit, BudgetRates, CostCategory, EffortAllocation, LineItem};
use crate::workflows::grant::domain::{
    FieldValue, GrantType, ModulePatch, Phase, PhaseSlot, ProgramType, ProjectId,
};
use crate::workflows::grant::lifecycle::{FeasibilityEvidence, PriorPhaseEvidence};
use crate::workflows::grant::persistence::{ProjectRepository, ProjectSummary, RepositoryError};
use crate::workflows::grant::project::{FundingOpportunity, Project, ProjectDraft};
use crate::workflows::grant::registry::ModuleId;
use crate::workflows::grant::rules::ComplianceRules;
use crate::workflows::grant::{grant_router, GrantApplicationService};

pub(super) fn rules() -> ComplianceRules {
    ComplianceRules::default()
}

pub(super) fn draft(grant_type: GrantType) -> ProjectDraft {
    ProjectDraft {
        name: "Point-of-care sepsis assay".to_string(),
        grant_type,
        program_type: ProgramType::Sbir,
        institute: "NCI".to_string(),
        funding_opportunity: FundingOpportunity {
            identifier: Some("PA-25-301".to_string()),
            ..FundingOpportunity::default()
        },
        clinical_trial: false,
        prior_phase: PriorPhaseEvidence::default(),
        feasibility_evidence: FeasibilityEvidence::default(),
    }
}

pub(super) fn text(value: &str) -> FieldValue {
    FieldValue::text(value)
}

pub(super) fn aims(statements: &[&str]) -> FieldValue {
    FieldValue::List(
        statements
            .iter()
            .map(|statement| {
                let mut aim = BTreeMap::new();
                aim.insert("statement".to_string(), text(statement));
                FieldValue::Record(aim)
            })
            .collect(),
    )
}

pub(super) fn patch(fields: &[(&str, FieldValue)]) -> ModulePatch {
    fields
        .iter()
        .fold(ModulePatch::default(), |patch, (field, value)| {
            patch.set(field, value.clone())
        })
}

/// Narrative for modules 1-5, 7 and 9; module 6 comes from the budget and 8 unlocks last.
pub(super) fn module_patches() -> Vec<(ModuleId, ModulePatch)> {
    vec![
        (
            ModuleId(1),
            patch(&[
                ("project_title", text("Point-of-care sepsis assay")),
                ("lay_summary", text("A bedside blood test that flags sepsis within minutes.")),
                ("problem_statement", text("Sepsis diagnosis currently takes several hours.")),
                ("innovation", text("Microfluidic lactate kinetics on a single cartridge.")),
            ]),
        ),
        (
            ModuleId(2),
            patch(&[
                ("central_hypothesis", text("Lactate clearance kinetics predict sepsis onset.")),
                ("aims", aims(&["Validate cartridge sensitivity", "Establish reader accuracy"])),
                ("expected_outcomes", text("A validated benchtop prototype.")),
            ]),
        ),
        (
            ModuleId(3),
            patch(&[
                ("principal_investigator", text("Dr. Amara Osei, clinical chemist")),
                ("key_personnel", text("Two microfluidics engineers and a biostatistician")),
                ("facilities", text("BSL-2 laboratory with clean-room access")),
            ]),
        ),
        (
            ModuleId(4),
            patch(&[
                ("significance", text("Each hour of delayed treatment raises mortality.")),
                ("innovation_detail", text("Continuous lactate sampling replaces single draws.")),
                ("prior_work", text("Pilot data from forty retrospective samples.")),
            ]),
        ),
        (
            ModuleId(5),
            patch(&[
                ("methods", text("Prospective cohort of emergency department admissions.")),
                (
                    "statistical_plan",
                    text("A power analysis sets the sample size; statistical significance is tested by logistic regression."),
                ),
                ("timeline", text("Twelve months in three stages.")),
                ("go_no_go_criteria", text("Sensitivity above 90% against blood culture.")),
            ]),
        ),
        (
            ModuleId(6),
            patch(&[(
                "justification",
                text("Personnel effort drives the budget; the reader prototype is the only equipment."),
            )]),
        ),
        (
            ModuleId(7),
            patch(&[
                ("human_subjects", text("IRB approval will be obtained before enrolment.")),
                ("vertebrate_animals", text("No vertebrate animals are used, so IACUC review does not apply.")),
                ("data_management_plan", text("A data management and sharing plan covers de-identified results.")),
            ]),
        ),
        (
            ModuleId(9),
            patch(&[
                ("market_opportunity", text("The hospital market for sepsis diagnostics is growing.")),
                ("business_model", text("Per-cartridge pricing with reader placement.")),
                ("revenue_projection", text("Recurring revenue from cartridges by year three.")),
                ("ip_strategy", text("A provisional patent covers the cartridge geometry.")),
            ]),
        ),
    ]
}

pub(super) fn final_compilation_patch() -> ModulePatch {
    patch(&[
        ("cover_letter", text("Cover letter for the study section.")),
        ("abstract", text("Project abstract.")),
        ("narrative", text("Compiled research narrative.")),
    ])
}

/// Personnel 100,000 and equipment 20,000 at a 40% indirect rate and 7% fee.
pub(super) fn budget_edits() -> Vec<BudgetEdit> {
    vec![
        BudgetEdit::ReplaceLineItems {
            items: vec![
                line_item("li-1", CostCategory::Personnel, 100_000),
                line_item("li-2", CostCategory::Equipment, 20_000),
            ],
        },
        BudgetEdit::SetRates(BudgetRates {
            indirect_rate: 40.0,
            fee_percent: 7.0,
        }),
        BudgetEdit::SetAllocation(EffortAllocation {
            small_business_percent: 100.0,
            research_institution_percent: 0.0,
        }),
    ]
}

/// Phase 2 worksheet of the Fast-Track fixture: personnel 700,000 and equipment 200,000.
pub(super) fn phase2_budget_edits() -> Vec<BudgetEdit> {
    vec![
        BudgetEdit::SetActivePhase {
            phase: Some(Phase::Phase2),
        },
        BudgetEdit::ReplaceLineItems {
            items: vec![
                line_item("li-p2-1", CostCategory::Personnel, 700_000),
                line_item("li-p2-2", CostCategory::Equipment, 200_000),
            ],
        },
        BudgetEdit::SetRates(BudgetRates {
            indirect_rate: 40.0,
            fee_percent: 7.0,
        }),
        BudgetEdit::SetAllocation(EffortAllocation {
            small_business_percent: 100.0,
            research_institution_percent: 0.0,
        }),
    ]
}

pub(super) fn line_item(id: &str, category: CostCategory, amount: i64) -> LineItem {
    LineItem {
        id: id.to_string(),
        category,
        description: String::new(),
        amount,
    }
}

pub(super) fn new_project(grant_type: GrantType) -> Project {
    Project::new(ProjectId("grant-fixture".to_string()), draft(grant_type), &rules())
        .expect("fixture project is valid")
}

/// Single-phase project with every module populated and a budget inside the cap.
pub(super) fn populated_project(grant_type: GrantType) -> Project {
    let rules = rules();
    let mut project = new_project(grant_type);
    if matches!(grant_type, GrantType::PhaseII | GrantType::PhaseIIB) {
        project.update_evidence(crate::workflows::grant::project::EvidenceUpdate {
            prior_phase: Some(completed_prior_phase()),
            feasibility_evidence: None,
        });
    }
    for edit in budget_edits() {
        project
            .apply_budget_edit(&edit, &rules)
            .expect("budget edit applies");
    }
    for (id, patch) in module_patches() {
        project
            .apply_module_patch(id, &patch, &rules)
            .expect("module patch applies");
    }
    project
        .apply_module_patch(ModuleId(8), &final_compilation_patch(), &rules)
        .expect("final compilation unlocked");
    project
}

pub(super) fn completed_prior_phase() -> PriorPhaseEvidence {
    PriorPhaseEvidence {
        success: Some(true),
        award_number: Some("R43CA000001".to_string()),
        completion_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 30),
    }
}

/// Phase sections that satisfy every split-module predicate, primary slots first.
///
/// Budget figures are not patched; they come from `budget_edits` and `phase2_budget_edits`.
pub(super) fn phase_patches() -> Vec<(ModuleId, PhaseSlot, ModulePatch)> {
    vec![
        (
            ModuleId(2),
            PhaseSlot::Phase1,
            patch(&[
                ("central_hypothesis", text("Lactate clearance kinetics predict sepsis onset.")),
                ("aims", aims(&["Validate cartridge sensitivity"])),
                ("milestones", text("Sensitivity above 90% on banked samples.")),
                ("expected_outcomes", text("A validated benchtop prototype.")),
            ]),
        ),
        (
            ModuleId(2),
            PhaseSlot::Phase2,
            patch(&[("aims", aims(&["Run the multi-site clinical validation"]))]),
        ),
        (
            ModuleId(5),
            PhaseSlot::Phase1,
            patch(&[
                ("methods", text("Benchtop validation on banked samples.")),
                ("statistical_plan", text("A power analysis sets the sample size.")),
                ("timeline", text("Six months.")),
                ("go_no_go_criteria", text("Sensitivity above 90%.")),
            ]),
        ),
        (
            ModuleId(5),
            PhaseSlot::Phase2,
            patch(&[
                ("methods", text("Multi-site prospective study.")),
                ("timeline", text("Twenty-four months.")),
            ]),
        ),
        (
            ModuleId(6),
            PhaseSlot::Phase1,
            patch(&[(
                "justification",
                text("Feasibility personnel and the reader prototype."),
            )]),
        ),
        (
            ModuleId(6),
            PhaseSlot::Phase2,
            patch(&[(
                "justification",
                text("Clinical site costs and manufacturing scale-up."),
            )]),
        ),
        (
            ModuleId(7),
            PhaseSlot::Shared,
            patch(&[
                ("human_subjects", text("IRB approval covers both phases.")),
                ("vertebrate_animals", text("None.")),
                ("data_management_plan", text("Data management plan for banked samples.")),
            ]),
        ),
        (
            ModuleId(7),
            PhaseSlot::Phase2,
            patch(&[
                ("data_management_plan", text("Multi-site data sharing agreement.")),
                ("data_safety_monitoring", text("Independent safety monitor.")),
            ]),
        ),
    ]
}

/// Fast-Track project with shared modules and both sections of every split module complete.
///
/// Phase 1 carries the `budget_edits` worksheet and phase 2 the `phase2_budget_edits` one.
pub(super) fn populated_fast_track() -> Project {
    let rules = rules();
    let mut project = new_project(GrantType::FastTrack);
    for edit in budget_edits() {
        project
            .apply_budget_edit(&edit, &rules)
            .expect("phase 1 budget edit applies");
    }
    for (id, patch) in module_patches() {
        let split = crate::workflows::grant::registry::ModuleKind::from_id(id)
            .and_then(|kind| kind.split())
            .is_some();
        if !split {
            project
                .apply_module_patch(id, &patch, &rules)
                .expect("module patch applies");
        }
    }
    for (id, slot, patch) in phase_patches() {
        project
            .apply_phase_patch(id, slot, &patch)
            .expect("phase patch applies");
    }
    for edit in phase2_budget_edits() {
        project
            .apply_budget_edit(&edit, &rules)
            .expect("phase 2 budget edit applies");
    }
    project
        .apply_module_patch(ModuleId(8), &final_compilation_patch(), &rules)
        .expect("final compilation unlocked");
    project
}

pub(super) fn build_service<S: ComplianceScorer + 'static>(
    scorer: S,
) -> (
    GrantApplicationService<MemoryRepository, S>,
    Arc<MemoryRepository>,
) {
    let repository = Arc::new(MemoryRepository::default());
    let service = GrantApplicationService::new(repository.clone(), Arc::new(scorer), rules());
    (service, repository)
}

pub(super) fn rubric_service() -> (
    GrantApplicationService<MemoryRepository, RubricComplianceScorer>,
    Arc<MemoryRepository>,
) {
    build_service(RubricComplianceScorer)
}

pub(super) fn router_with_service<S: ComplianceScorer + 'static>(
    service: GrantApplicationService<MemoryRepository, S>,
) -> axum::Router {
    grant_router(Arc::new(service))
}

#[derive(Default, Clone)]
pub(super) struct MemoryRepository {
    pub(super) records: Arc<Mutex<HashMap<ProjectId, Project>>>,
}

impl MemoryRepository {
    pub(super) fn stored(&self, id: &ProjectId) -> Project {
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .get(id)
            .cloned()
            .expect("project stored")
    }
}

impl ProjectRepository for MemoryRepository {
    fn insert(&self, project: Project) -> Result<Project, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(project.id()) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(project.id().clone(), project.clone());
        Ok(project)
    }

    fn update(&self, project: Project) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if !guard.contains_key(project.id()) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(project.id().clone(), project);
        Ok(())
    }

    fn fetch(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<ProjectSummary>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        let mut summaries: Vec<ProjectSummary> = guard.values().map(ProjectSummary::from).collect();
        summaries.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(summaries)
    }
}

pub(super) struct UnavailableRepository;

impl ProjectRepository for UnavailableRepository {
    fn insert(&self, _project: Project) -> Result<Project, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update(&self, _project: Project) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn list(&self) -> Result<Vec<ProjectSummary>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) struct FailingScorer;

impl ComplianceScorer for FailingScorer {
    fn score(
        &self,
        _content: &str,
        _context: &ComplianceContext,
        _section_types: &[String],
    ) -> Result<ComplianceAuditResult, ScoringError> {
        Err(ScoringError::Unavailable("scoring request timed out".to_string()))
    }
}

/// Returns the same result for every call.
pub(super) struct FixedScorer(pub(super) ComplianceAuditResult);

impl FixedScorer {
    /// Compliance total of `compliance` (at most 100) and a full alignment score.
    pub(super) fn with_compliance(compliance: u8) -> Self {
        let statistical = compliance.min(20);
        let regulatory = compliance.saturating_sub(20).min(20);
        let commercial = compliance.saturating_sub(40).min(20);
        let structure = compliance.saturating_sub(60).min(30);
        let tone = compliance.saturating_sub(90).min(10);
        Self(ComplianceAuditResult {
            compliance: ComplianceScore {
                structure,
                statistical,
                regulatory,
                commercial,
                tone,
            },
            alignment: AgencyAlignmentScore {
                budget: 25,
                allocation: 25,
                funding_opportunity: 25,
                clinical_trial: 25,
            },
            issues: Vec::new(),
            notes: Vec::new(),
        })
    }
}

impl ComplianceScorer for FixedScorer {
    fn score(
        &self,
        _content: &str,
        _context: &ComplianceContext,
        _section_types: &[String],
    ) -> Result<ComplianceAuditResult, ScoringError> {
        Ok(self.0.clone())
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

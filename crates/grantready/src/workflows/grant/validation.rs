use serde::{Deserialize, Serialize};

use super::budget::{validate_budget, BudgetSnapshot, BudgetValidationInput};
use super::completion::{compute_module_states, ModuleState, ModuleStatus};
use super::domain::{FieldValue, PhaseSlot, ValidationIssue};
use super::lifecycle::{check_lifecycle, LifecycleCheck};
use super::overlay::{resolve_effective_block, AimsSource};
use super::project::{budget_figures, BudgetScope, Project};
use super::registry::{ModuleKind, SplitModule};
use super::rules::ComplianceRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    StructurallyReady,
    NotReady,
}

/// Everything the UI and the export collaborator consume after a validation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub module_states: Vec<ModuleState>,
    pub lifecycle: LifecycleCheck,
    pub budget: Option<BudgetSnapshot>,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub status: ReadinessStatus,
}

impl ValidationResult {
    pub fn is_ready(&self) -> bool {
        self.status == ReadinessStatus::StructurallyReady
    }
}

/// Merge completion, phase, lifecycle and budget rules into one result. Reads only.
pub fn run_full_validation(project: &Project, rules: &ComplianceRules) -> ValidationResult {
    let module_states = compute_module_states(project, &rules.overlay);
    let mut issues = completion_issues(project, &module_states);
    issues.extend(phase_issues(project));
    issues.extend(overlay_warnings(project, rules));

    let lifecycle = check_lifecycle(project);
    issues.extend(lifecycle.errors.iter().cloned());

    let budget = project
        .budget_worksheets()
        .has_entries()
        .then(|| project.current_budget_snapshot(rules));
    for scope in project.budget_scopes(rules) {
        issues.extend(budget_figure_issue(&scope));
        if !scope.worksheet.has_entries() {
            continue;
        }
        let calculation = scope.worksheet.calculate();
        issues.extend(validate_budget(&BudgetValidationInput {
            calculation: &calculation,
            cap: scope.cap,
            allocation: scope.worksheet.allocation,
            requested_fee_percent: scope.worksheet.rates.fee_percent,
            program_type: project.program_type(),
            scope: scope.allocation_scope,
            phase: scope.phase,
        }));
    }

    let (errors, warnings): (Vec<_>, Vec<_>) = issues
        .into_iter()
        .partition(|issue| issue.severity.blocks_readiness());
    let status = if errors.is_empty() {
        ReadinessStatus::StructurallyReady
    } else {
        ReadinessStatus::NotReady
    };

    ValidationResult {
        module_states,
        lifecycle,
        budget,
        errors,
        warnings,
        status,
    }
}

fn completion_issues(project: &Project, states: &[ModuleState]) -> Vec<ValidationIssue> {
    let feasibility_only = project
        .grant_type()
        .map(|grant_type| grant_type.is_feasibility_only())
        .unwrap_or(false);

    states
        .iter()
        .filter(|state| {
            !(feasibility_only && state.module_id == ModuleKind::Commercialization.id())
        })
        .filter(|state| state.locked || state.status != ModuleStatus::Complete)
        .map(|state| {
            let field = format!("module_{}", state.module_id);
            if state.locked {
                ValidationIssue::error(
                    "module_locked",
                    field,
                    format!("{} is locked until modules 1-7 are complete", state.name),
                )
            } else {
                ValidationIssue::error(
                    "module_incomplete",
                    field,
                    format!(
                        "{} is {}; missing {}",
                        state.name,
                        state.status.label(),
                        state.missing_fields.join(", ")
                    ),
                )
            }
        })
        .collect()
}

/// Combined-phase projects must complete both sections of every split module.
fn phase_issues(project: &Project) -> Vec<ValidationIssue> {
    if !project.is_split_phase() {
        return Vec::new();
    }

    let overlays = project.overlays();
    let mut issues = Vec::new();
    for module in SplitModule::ordered() {
        for slot in [module.primary_slot(), PhaseSlot::Phase2] {
            let complete = overlays
                .block(module, slot)
                .map(|block| block.is_complete())
                .unwrap_or(false);
            if !complete {
                let definition = module.module().definition();
                issues.push(ValidationIssue::error(
                    "phase_section_incomplete",
                    format!("module_{}.{}", definition.id, slot.label()),
                    format!("{} {} section is incomplete", definition.name, slot.label()),
                ));
            }
        }
    }
    issues
}

fn overlay_warnings(project: &Project, rules: &ComplianceRules) -> Option<ValidationIssue> {
    let resolved = resolve_effective_block(project, ModuleKind::SpecificAims, &rules.overlay);
    match resolved.aims_source {
        Some(AimsSource::LegacyIgnored) => Some(ValidationIssue::warning(
            "legacy_aims_ignored",
            "module_2.aims",
            "phase aims are empty; the single-phase aims block is not used for Fast-Track",
        )),
        Some(AimsSource::Legacy) => Some(ValidationIssue::warning(
            "legacy_aims_used",
            "module_2.aims",
            "phase aims are empty; completion was read from the single-phase aims block",
        )),
        _ => None,
    }
}

/// Module 6 figures must match the worksheet they are calculated from.
fn budget_figure_issue(scope: &BudgetScope<'_>) -> Option<ValidationIssue> {
    let block = scope.block?;
    let calculation = scope.worksheet.calculate();
    let stale = budget_figures(&calculation).iter().any(|(field, amount)| {
        block
            .get(field)
            .map(|stored| *stored != FieldValue::Number(*amount as f64))
            .unwrap_or(false)
    });
    if !stale {
        return None;
    }

    let module = ModuleKind::BudgetJustification.id();
    let field = match scope.phase {
        Some(phase) => format!("module_{module}.{}", phase.label()),
        None => format!("module_{module}"),
    };
    Some(if scope.worksheet.has_entries() {
        ValidationIssue::error(
            "budget_figures_inconsistent",
            field,
            "module 6 figures do not match the budget worksheet",
        )
    } else {
        ValidationIssue::error(
            "budget_worksheet_missing",
            field,
            "module 6 carries budget figures but the budget worksheet has no entries",
        )
    })
}

use crate::infra::{parse_grant_type, InMemoryProjectRepository};
use clap::Args;
use grantready::config::AppConfig;
use grantready::error::AppError;
use grantready::workflows::grant::budget::import::line_items_from_csv;
use grantready::workflows::grant::budget::{
    resolve_budget_cap, BudgetRates, EffortAllocation,
};
use grantready::workflows::grant::{
    calculate_budget, decode_project, BudgetCalculation, BudgetEdit, CostCategory, FieldValue,
    FundingOpportunity, GrantApplicationService, GrantType, LineItem, ModuleId, ModulePatch,
    PersistenceError, ProgramType, ProjectDraft, RubricComplianceScorer, ValidationIssue,
    ValidationResult,
};
use grantready::workflows::grant::audit::AuditRequest;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct ValidateArgs {
    /// Stored project record (JSON, any supported schema version)
    pub(crate) project: PathBuf,
    /// Print the full validation result as JSON instead of a summary
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct BudgetArgs {
    /// Line item export with Category, Description and Amount columns
    pub(crate) items: PathBuf,
    /// Indirect (F&A) rate in percent applied to MTDC
    #[arg(long, default_value_t = 0.0)]
    pub(crate) indirect_rate: f64,
    /// Fee percentage; clamped to the allowed range
    #[arg(long, default_value_t = 7.0)]
    pub(crate) fee_percent: f64,
    /// Institute whose cap the direct costs are checked against
    #[arg(long)]
    pub(crate) institute: Option<String>,
    /// Grant type selecting the cap (phase_i, phase_ii, fast_track, direct_to_phase_ii, phase_iib)
    #[arg(long, value_parser = parse_grant_type, default_value = "phase_i")]
    pub(crate) grant_type: GrantType,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Institute the sample application is submitted to
    #[arg(long, default_value = "NCI")]
    pub(crate) institute: String,
    /// Stop after validation instead of auditing and exporting
    #[arg(long)]
    pub(crate) skip_audit: bool,
}

pub(crate) fn run_validate(args: ValidateArgs) -> Result<(), AppError> {
    let rules = AppConfig::load()?.engine.rules()?;
    let raw = std::fs::read_to_string(&args.project)?;
    let record = serde_json::from_str(&raw).map_err(PersistenceError::from)?;
    let project = decode_project(record)?;

    let result = grantready::workflows::grant::run_full_validation(&project, &rules);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!(
        "Project {} ({}) -> {}",
        project.id().0,
        project
            .grant_type()
            .map(GrantType::label)
            .unwrap_or("grant type not selected"),
        readiness_label(&result)
    );
    render_validation(&result);
    Ok(())
}

pub(crate) fn run_budget(args: BudgetArgs) -> Result<(), AppError> {
    let BudgetArgs {
        items,
        indirect_rate,
        fee_percent,
        institute,
        grant_type,
    } = args;

    let line_items = line_items_from_csv(File::open(&items)?)?;
    let rates = BudgetRates {
        indirect_rate,
        fee_percent,
    };
    let calculation = calculate_budget(&line_items, &[], &[], &rates);

    println!("Budget from {} ({} line items)", items.display(), line_items.len());
    render_calculation(&calculation);

    if let Some(code) = institute {
        let rules = AppConfig::load()?.engine.rules()?;
        match rules.catalog.get(&code) {
            Some(profile) => match resolve_budget_cap(profile, grant_type, None) {
                Ok(cap) => println!(
                    "- {} {} cap {} | remaining {} | {:.1}% used",
                    profile.code,
                    grant_type.label(),
                    cap,
                    calculation.remaining(cap),
                    calculation.utilization(cap)
                ),
                Err(err) => println!("- Cap unavailable: {}", err),
            },
            None => println!("- Institute {} is not configured", code),
        }
    }

    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        institute,
        skip_audit,
    } = args;

    let rules = AppConfig::load()?.engine.rules()?;
    let service = Arc::new(GrantApplicationService::new(
        Arc::new(InMemoryProjectRepository::default()),
        Arc::new(RubricComplianceScorer),
        rules,
    ));

    println!("Grant application compliance demo");
    let project = service.create(demo_draft(&institute))?;
    let id = project.id().clone();
    println!(
        "- Created {} for {} ({})",
        id.0,
        project.institute(),
        GrantType::PhaseI.label()
    );

    let mut snapshot = None;
    for edit in demo_budget() {
        snapshot = Some(service.apply_budget_edit(&id, &edit)?);
    }
    if let Some(snapshot) = &snapshot {
        println!("\nBudget");
        render_calculation(&snapshot.calculation);
        if let (Some(cap), Some(remaining)) = (snapshot.budget_cap, snapshot.remaining) {
            println!(
                "- Cap {} | remaining {} | {:.1}% used",
                cap, remaining, snapshot.utilization
            );
        }
    }

    for (module_id, patch) in demo_narrative() {
        service.patch_module(&id, module_id, &patch)?;
    }
    match service.patch_module(&id, ModuleId(8), &demo_final_compilation()) {
        Ok(state) => println!("\nFinal compilation unlocked -> {}", state.status.label()),
        Err(err) => {
            println!("\nFinal compilation still locked: {}", err);
            return Ok(());
        }
    }

    let result = service.validate(&id)?;
    println!("\nValidation -> {}", readiness_label(&result));
    render_validation(&result);

    if skip_audit {
        return Ok(());
    }

    let outcome = match service.run_audit(&id, &AuditRequest::default()) {
        Ok(outcome) => outcome,
        Err(err) => {
            println!("\nCompliance audit unavailable: {}", err);
            return Ok(());
        }
    };
    println!(
        "\nCompliance audit: compliance {} / alignment {} -> {}",
        outcome.entry.compliance_score,
        outcome.entry.agency_alignment_score,
        if outcome.entry.passed { "passed" } else { "failed" }
    );
    for note in &outcome.result.notes {
        println!("  - {}: {} ({})", note.component, note.points, note.notes);
    }

    let eligibility = service.export_eligibility(&id)?;
    println!("\nExport eligibility: {}", eligibility.reason);
    match service.export(&id) {
        Ok(artifact) => println!(
            "- Exported at {} with {} audit entries",
            artifact.exported_at.to_rfc3339(),
            artifact.project.audit_trail().len()
        ),
        Err(err) => println!("- Export refused: {}", err),
    }

    Ok(())
}

fn readiness_label(result: &ValidationResult) -> &'static str {
    if result.is_ready() {
        "structurally ready"
    } else {
        "not ready"
    }
}

fn render_validation(result: &ValidationResult) {
    println!("Modules:");
    for state in &result.module_states {
        let lock = if state.locked { " [locked]" } else { "" };
        println!(
            "  - {} {}: {}{}",
            state.module_id,
            state.name,
            state.status.label(),
            lock
        );
        if !state.missing_fields.is_empty() {
            println!("      missing {}", state.missing_fields.join(", "));
        }
    }
    render_issues("Errors", &result.errors);
    render_issues("Warnings", &result.warnings);
}

fn render_issues(title: &str, issues: &[ValidationIssue]) {
    if issues.is_empty() {
        println!("{}: none", title);
        return;
    }
    println!("{}:", title);
    for issue in issues {
        println!(
            "  - [{:?}] {} {}: {}",
            issue.severity,
            issue.code,
            issue.field.as_deref().unwrap_or("-"),
            issue.message
        );
    }
}

fn render_calculation(calculation: &BudgetCalculation) {
    println!(
        "- Direct {} | MTDC {} | indirect {} | fee {:.1}% = {}",
        calculation.total_direct_costs,
        calculation.mtdc,
        calculation.indirect_costs,
        calculation.fee_percent,
        calculation.fee_profit
    );
    println!("- Total project costs {}", calculation.total_project_costs);
}

fn demo_draft(institute: &str) -> ProjectDraft {
    ProjectDraft {
        name: "Point-of-care sepsis assay".to_string(),
        grant_type: GrantType::PhaseI,
        program_type: ProgramType::Sbir,
        institute: institute.to_string(),
        funding_opportunity: FundingOpportunity {
            identifier: Some("PA-25-301".to_string()),
            ..FundingOpportunity::default()
        },
        clinical_trial: false,
        prior_phase: Default::default(),
        feasibility_evidence: Default::default(),
    }
}

fn demo_budget() -> Vec<BudgetEdit> {
    vec![
        BudgetEdit::ReplaceLineItems {
            items: vec![
                LineItem {
                    id: "li-1".to_string(),
                    category: CostCategory::Personnel,
                    description: "PI and engineering effort".to_string(),
                    amount: 100_000,
                },
                LineItem {
                    id: "li-2".to_string(),
                    category: CostCategory::Equipment,
                    description: "Reader prototype".to_string(),
                    amount: 20_000,
                },
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

fn text(value: &str) -> FieldValue {
    FieldValue::text(value)
}

fn fields(pairs: &[(&str, FieldValue)]) -> ModulePatch {
    pairs
        .iter()
        .fold(ModulePatch::default(), |patch, (field, value)| {
            patch.set(field, value.clone())
        })
}

fn demo_narrative() -> Vec<(ModuleId, ModulePatch)> {
    let aims = FieldValue::List(
        ["Validate cartridge sensitivity", "Establish reader accuracy"]
            .iter()
            .map(|statement| {
                let mut aim = BTreeMap::new();
                aim.insert("statement".to_string(), text(statement));
                FieldValue::Record(aim)
            })
            .collect(),
    );

    vec![
        (
            ModuleId(1),
            fields(&[
                ("project_title", text("Point-of-care sepsis assay")),
                ("lay_summary", text("A bedside blood test that flags sepsis within minutes.")),
                ("problem_statement", text("Sepsis diagnosis currently takes several hours.")),
                ("innovation", text("Microfluidic lactate kinetics on a single cartridge.")),
            ]),
        ),
        (
            ModuleId(2),
            fields(&[
                ("central_hypothesis", text("Lactate clearance kinetics predict sepsis onset.")),
                ("aims", aims),
                ("expected_outcomes", text("A validated benchtop prototype.")),
            ]),
        ),
        (
            ModuleId(3),
            fields(&[
                ("principal_investigator", text("Dr. Amara Osei, clinical chemist")),
                ("key_personnel", text("Two microfluidics engineers and a biostatistician")),
                ("facilities", text("BSL-2 laboratory with clean-room access")),
            ]),
        ),
        (
            ModuleId(4),
            fields(&[
                ("significance", text("Each hour of delayed treatment raises mortality.")),
                ("innovation_detail", text("Continuous lactate sampling replaces single draws.")),
                ("prior_work", text("Pilot data from forty retrospective samples.")),
            ]),
        ),
        (
            ModuleId(5),
            fields(&[
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
            fields(&[(
                "justification",
                text("Personnel effort drives the budget; the reader prototype is the only equipment."),
            )]),
        ),
        (
            ModuleId(7),
            fields(&[
                ("human_subjects", text("IRB approval will be obtained before enrolment.")),
                ("vertebrate_animals", text("No vertebrate animals are used, so IACUC review does not apply.")),
                ("data_management_plan", text("A data management and sharing plan covers de-identified results.")),
            ]),
        ),
        (
            ModuleId(9),
            fields(&[
                ("market_opportunity", text("The hospital market for sepsis diagnostics is growing.")),
                ("business_model", text("Per-cartridge pricing with reader placement.")),
                ("revenue_projection", text("Recurring revenue from cartridges by year three.")),
                ("ip_strategy", text("A provisional patent covers the cartridge geometry.")),
            ]),
        ),
    ]
}

fn demo_final_compilation() -> ModulePatch {
    fields(&[
        ("cover_letter", text("Cover letter for the study section.")),
        ("abstract", text("Project abstract.")),
        ("narrative", text("Compiled research narrative.")),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use grantready::workflows::grant::{run_full_validation, ComplianceRules, ReadinessStatus};

    #[test]
    fn demo_application_is_ready_for_audit() {
        let service = GrantApplicationService::new(
            Arc::new(InMemoryProjectRepository::default()),
            Arc::new(RubricComplianceScorer),
            ComplianceRules::default(),
        );
        let project = service.create(demo_draft("NCI")).expect("created");
        for edit in demo_budget() {
            service
                .apply_budget_edit(project.id(), &edit)
                .expect("budget edit applies");
        }
        for (module_id, patch) in demo_narrative() {
            service
                .patch_module(project.id(), module_id, &patch)
                .expect("module patch applies");
        }
        service
            .patch_module(project.id(), ModuleId(8), &demo_final_compilation())
            .expect("final compilation unlocked");

        let stored = service.get(project.id()).expect("stored");
        let result = run_full_validation(&stored, service.rules());
        assert_eq!(result.status, ReadinessStatus::StructurallyReady, "{:?}", result.errors);

        let outcome = service
            .run_audit(project.id(), &AuditRequest::default())
            .expect("audit runs");
        assert!(outcome.entry.passed, "{:?}", outcome.result.issues);
        assert!(service.export(project.id()).is_ok());
    }
}

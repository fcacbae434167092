use chrono::{TimeZone, Utc};

use super::common::*;
use crate::workflows::grant::audit::{
    can_export_project, content_fingerprint, narrative_content, record_export_attempt,
    run_compliance_audit, AuditAction, AuditError, AuditRequest, ComplianceScorer,
    RubricComplianceScorer, ScoringError,
};
use crate::workflows::grant::budget::{BudgetEdit, EffortAllocation};
use crate::workflows::grant::domain::{GrantType, ModulePatch, Severity, ValidationIssue};
use crate::workflows::grant::project::Project;
use crate::workflows::grant::registry::ModuleId;

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0)
        .single()
        .expect("valid timestamp")
}

fn audit_with(project: &mut Project, scorer: &dyn ComplianceScorer) {
    run_compliance_audit(project, scorer, &rules(), &AuditRequest::default(), now())
        .expect("audit runs");
}

#[test]
fn compliance_of_89_blocks_export_even_with_full_alignment() {
    let mut project = populated_project(GrantType::PhaseI);
    audit_with(&mut project, &FixedScorer::with_compliance(89));

    let eligibility = can_export_project(&project);
    assert!(!eligibility.allowed);
    assert_eq!(eligibility.compliance_score, Some(89));
    assert_eq!(eligibility.agency_alignment_score, Some(100));
    assert_eq!(eligibility.reason, "compliance score 89 is below 90");
    assert!(!project.export_allowed());
}

#[test]
fn compliance_of_90_with_full_alignment_allows_export() {
    let mut project = populated_project(GrantType::PhaseI);
    audit_with(&mut project, &FixedScorer::with_compliance(90));

    let eligibility = can_export_project(&project);
    assert!(eligibility.allowed, "{}", eligibility.reason);
    assert!(project.export_allowed());
    assert_eq!(project.last_compliance_score(), Some(90));
    assert_eq!(project.last_agency_alignment_score(), Some(100));
}

#[test]
fn alignment_below_100_blocks_export() {
    let mut project = populated_project(GrantType::PhaseI);
    let mut scorer = FixedScorer::with_compliance(100);
    scorer.0.alignment.clinical_trial = 24;
    audit_with(&mut project, &scorer);

    let eligibility = can_export_project(&project);
    assert!(!eligibility.allowed);
    assert_eq!(eligibility.reason, "agency alignment score 99 is below 100");
}

#[test]
fn critical_issue_blocks_export_despite_perfect_scores() {
    let mut project = populated_project(GrantType::PhaseI);
    let mut scorer = FixedScorer::with_compliance(100);
    scorer.0.issues.push(ValidationIssue::critical(
        "budget_cap_exceeded",
        "budget.totalDirectCosts",
        "over cap",
    ));
    audit_with(&mut project, &scorer);

    let eligibility = can_export_project(&project);
    assert!(!eligibility.allowed);
    assert_eq!(eligibility.reason, "1 critical issue(s) remain");
}

#[test]
fn edits_after_a_passing_audit_revoke_export() {
    let mut project = populated_project(GrantType::PhaseI);
    audit_with(&mut project, &RubricComplianceScorer);
    assert!(can_export_project(&project).allowed);

    project
        .apply_module_patch(
            ModuleId(4),
            &patch(&[("prior_work", text("Pilot data from sixty samples."))]),
            &rules(),
        )
        .expect("patch applies");

    let eligibility = can_export_project(&project);
    assert!(!eligibility.allowed);
    assert_eq!(eligibility.reason, "content changed since last audit");
    assert!(project.export_allowed(), "stored flag alone is not trusted");
}

#[test]
fn budget_edits_also_invalidate_the_fingerprint() {
    let mut project = populated_project(GrantType::PhaseI);
    let before = content_fingerprint(&project).expect("fingerprint");
    project
        .apply_budget_edit(
            &BudgetEdit::SetAllocation(EffortAllocation {
                small_business_percent: 90.0,
                research_institution_percent: 10.0,
            }),
            &rules(),
        )
        .expect("edit applies");
    assert_ne!(content_fingerprint(&project).expect("fingerprint"), before);
}

#[test]
fn scorer_failure_leaves_project_untouched_and_export_blocked() {
    let mut project = populated_project(GrantType::PhaseI);
    let before = project.clone();

    let result = run_compliance_audit(
        &mut project,
        &FailingScorer,
        &rules(),
        &AuditRequest::default(),
        now(),
    );

    assert!(matches!(
        result,
        Err(AuditError::Scoring(ScoringError::Unavailable(_)))
    ));
    assert_eq!(project, before);
    assert!(project.audit_trail().is_empty());
    assert!(!can_export_project(&project).allowed);
}

#[test]
fn failed_rerun_keeps_the_previous_check_authoritative() {
    let mut project = populated_project(GrantType::PhaseI);
    audit_with(&mut project, &FixedScorer::with_compliance(80));

    let result = run_compliance_audit(
        &mut project,
        &FailingScorer,
        &rules(),
        &AuditRequest::default(),
        now(),
    );
    assert!(result.is_err());
    assert_eq!(project.audit_trail().len(), 1);
    assert!(!can_export_project(&project).allowed);
}

#[test]
fn scoped_runs_are_revisions_and_do_not_move_scores() {
    let mut project = populated_project(GrantType::PhaseI);
    audit_with(&mut project, &FixedScorer::with_compliance(95));

    let outcome = run_compliance_audit(
        &mut project,
        &FixedScorer::with_compliance(40),
        &rules(),
        &AuditRequest {
            module_id: Some(ModuleId(5)),
            section_types: Vec::new(),
        },
        now(),
    )
    .expect("scoped audit runs");

    assert_eq!(outcome.entry.action, AuditAction::Revision);
    assert_eq!(outcome.entry.module_id, Some(ModuleId(5)));
    assert_eq!(project.audit_trail().len(), 2);
    assert_eq!(project.last_compliance_score(), Some(95));
    assert!(can_export_project(&project).allowed);
}

#[test]
fn unknown_module_scope_is_rejected_before_scoring() {
    let mut project = populated_project(GrantType::PhaseI);
    let result = run_compliance_audit(
        &mut project,
        &FixedScorer::with_compliance(100),
        &rules(),
        &AuditRequest {
            module_id: Some(ModuleId(11)),
            section_types: Vec::new(),
        },
        now(),
    );
    assert!(matches!(result, Err(AuditError::Project(_))));
    assert!(project.audit_trail().is_empty());
}

#[test]
fn rubric_scores_a_complete_application_for_export() {
    let mut project = populated_project(GrantType::PhaseI);
    let outcome = run_compliance_audit(
        &mut project,
        &RubricComplianceScorer,
        &rules(),
        &AuditRequest::default(),
        now(),
    )
    .expect("audit runs");

    assert_eq!(outcome.entry.action, AuditAction::Check);
    assert_eq!(outcome.result.compliance.total(), 100, "{:?}", outcome.result.notes);
    assert_eq!(outcome.result.alignment.total(), 100, "{:?}", outcome.result.issues);
    assert!(outcome.entry.passed);
}

#[test]
fn rubric_flags_missing_statistics_and_promotional_tone() {
    let mut project = populated_project(GrantType::PhaseI);
    project
        .apply_module_patch(
            ModuleId(5),
            &patch(&[(
                "statistical_plan",
                text("A revolutionary approach with guaranteed results."),
            )]),
            &rules(),
        )
        .expect("patch applies");

    let outcome = run_compliance_audit(
        &mut project,
        &RubricComplianceScorer,
        &rules(),
        &AuditRequest::default(),
        now(),
    )
    .expect("audit runs");

    let codes: Vec<&str> = outcome
        .result
        .issues
        .iter()
        .map(|issue| issue.code.as_str())
        .collect();
    assert!(codes.contains(&"statistical_plan_missing"));
    assert_eq!(
        codes.iter().filter(|code| **code == "promotional_language").count(),
        2
    );
    assert_eq!(outcome.result.compliance.statistical, 0);
    assert_eq!(outcome.result.compliance.tone, 6);
    assert!(!outcome.entry.passed);
}

#[test]
fn rubric_alignment_catches_cap_overrun_and_trial_mismatch() {
    let mut draft = draft(GrantType::PhaseI);
    draft.clinical_trial = true;
    draft.funding_opportunity.overrides.budget_cap = Some(100_000);
    draft.funding_opportunity.overrides.clinical_trial =
        Some(crate::workflows::grant::project::ClinicalTrialPolicy::NotAllowed);
    let rules = rules();
    let mut project = Project::new(
        crate::workflows::grant::domain::ProjectId("grant-over".to_string()),
        draft,
        &rules,
    )
    .expect("project created");
    for edit in budget_edits() {
        project.apply_budget_edit(&edit, &rules).expect("edit applies");
    }

    let outcome = run_compliance_audit(
        &mut project,
        &RubricComplianceScorer,
        &rules,
        &AuditRequest::default(),
        now(),
    )
    .expect("audit runs");

    assert_eq!(outcome.result.alignment.budget, 0);
    assert_eq!(outcome.result.alignment.clinical_trial, 0);
    let critical: Vec<&str> = outcome
        .result
        .issues
        .iter()
        .filter(|issue| issue.severity == Severity::Critical)
        .map(|issue| issue.code.as_str())
        .collect();
    assert_eq!(critical, vec!["budget_cap_exceeded", "clinical_trial_mismatch"]);
}

#[test]
fn export_attempts_are_recorded() {
    let mut project = populated_project(GrantType::PhaseI);

    let decision = can_export_project(&project);
    let blocked = record_export_attempt(&mut project, &decision, now())
        .expect("attempt recorded");
    assert_eq!(blocked.action, AuditAction::ExportBlocked);
    assert!(!blocked.passed);
    assert_eq!(blocked.issues[0].code, "export_blocked");

    audit_with(&mut project, &FixedScorer::with_compliance(100));
    let decision = can_export_project(&project);
    let success = record_export_attempt(&mut project, &decision, now())
        .expect("attempt recorded");
    assert_eq!(success.action, AuditAction::ExportSuccess);
    assert!(success.passed);

    let actions: Vec<AuditAction> = project.audit_trail().iter().map(|entry| entry.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::ExportBlocked,
            AuditAction::Check,
            AuditAction::ExportSuccess
        ]
    );
    assert!(can_export_project(&project).allowed, "export entries do not supersede the check");
}

#[test]
fn narrative_includes_both_phases_for_fast_track() {
    let project = populated_fast_track();
    let narrative = narrative_content(&project, &rules().overlay, Some(ModuleId(2)));

    assert!(narrative.starts_with("## Specific Aims"));
    assert!(narrative.contains("Validate cartridge sensitivity"));
    assert!(narrative.contains("Run the multi-site clinical validation"));
    assert!(!narrative.contains("## Title & Concept"));
}

#[test]
fn clearing_a_field_changes_the_fingerprint_back_and_forth() {
    let mut project = populated_project(GrantType::PhaseI);
    let original = content_fingerprint(&project).expect("fingerprint");
    let value = project
        .module(ModuleId(1))
        .and_then(|block| block.get("innovation"))
        .cloned()
        .expect("innovation present");

    project
        .apply_module_patch(ModuleId(1), &ModulePatch::default().clear("innovation"), &rules())
        .expect("clear applies");
    assert_ne!(content_fingerprint(&project).expect("fingerprint"), original);

    project
        .apply_module_patch(ModuleId(1), &ModulePatch::default().set("innovation", value), &rules())
        .expect("restore applies");
    assert_eq!(content_fingerprint(&project).expect("fingerprint"), original);
}

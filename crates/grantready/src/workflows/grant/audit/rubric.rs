use super::{
    AgencyAlignmentScore, ComplianceAuditResult, ComplianceContext, ComplianceScore,
    ComplianceScorer, ScoreNote, ScoringError,
};
use crate::workflows::grant::budget::allocation_minimums;
use crate::workflows::grant::domain::ValidationIssue;
use crate::workflows::grant::project::ClinicalTrialPolicy;
use crate::workflows::grant::registry::ModuleKind;

const STATISTICAL_TERMS: [(&[&str], u8); 2] = [
    (&["power analysis", "power calculation", "sample size"], 10),
    (
        &["statistical", "confidence interval", "p-value", "regression", "anova"],
        10,
    ),
];

const REGULATORY_TERMS: [(&[&str], u8); 3] = [
    (
        &["irb", "institutional review board", "human subjects", "informed consent"],
        7,
    ),
    (&["iacuc", "vertebrate animals", "animal welfare"], 7),
    (&["data management", "data sharing"], 6),
];

const COMMERCIAL_TERMS: [(&[&str], u8); 3] = [
    (&["market", "markets", "customer", "customers"], 7),
    (&["revenue", "pricing", "business model"], 7),
    (&["patent", "patents", "intellectual property", "licensing"], 6),
];

const PROMOTIONAL_TERMS: [&str; 6] = [
    "revolutionary",
    "groundbreaking",
    "game-changing",
    "guaranteed",
    "unprecedented",
    "miracle",
];

/// Deterministic keyword and context rubric used when no external scorer is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct RubricComplianceScorer;

impl ComplianceScorer for RubricComplianceScorer {
    fn score(
        &self,
        content: &str,
        context: &ComplianceContext,
        section_types: &[String],
    ) -> Result<ComplianceAuditResult, ScoringError> {
        let lowered = content.to_lowercase();
        let mut notes = Vec::new();
        let mut issues = Vec::new();

        let structure = score_structure(content, context, section_types, &mut notes, &mut issues);

        let statistical = score_terms("statistical", &lowered, &STATISTICAL_TERMS, &mut notes);
        if statistical == 0 {
            issues.push(ValidationIssue::error(
                "statistical_plan_missing",
                "module_5.statistical_plan",
                "no power analysis or statistical method is described",
            ));
        }
        let regulatory = score_terms("regulatory", &lowered, &REGULATORY_TERMS, &mut notes);
        let commercial = score_terms("commercial", &lowered, &COMMERCIAL_TERMS, &mut notes);

        let promotional: Vec<&str> = PROMOTIONAL_TERMS
            .iter()
            .copied()
            .filter(|term| contains_term(&lowered, term))
            .collect();
        for term in &promotional {
            issues.push(ValidationIssue::warning(
                "promotional_language",
                "narrative",
                format!("'{term}' reads as promotional; reviewers expect measured claims"),
            ));
        }
        let tone = 10u8.saturating_sub(2 * promotional.len().min(5) as u8);
        notes.push(ScoreNote {
            component: "tone".to_string(),
            points: tone,
            notes: format!("{} promotional term(s)", promotional.len()),
        });

        let alignment = score_alignment(context, &mut notes, &mut issues);

        Ok(ComplianceAuditResult {
            compliance: ComplianceScore {
                structure,
                statistical,
                regulatory,
                commercial,
                tone,
            },
            alignment,
            issues,
            notes,
        })
    }
}

fn score_structure(
    content: &str,
    context: &ComplianceContext,
    section_types: &[String],
    notes: &mut Vec<ScoreNote>,
    issues: &mut Vec<ValidationIssue>,
) -> u8 {
    let feasibility_only = context
        .grant_type
        .map(|grant_type| grant_type.is_feasibility_only())
        .unwrap_or(false);

    let expected: Vec<ModuleKind> = ModuleKind::ordered()
        .into_iter()
        .filter(|kind| {
            if section_types.is_empty() {
                !(feasibility_only && *kind == ModuleKind::Commercialization)
            } else {
                section_types
                    .iter()
                    .any(|section| section.eq_ignore_ascii_case(kind.slug()))
            }
        })
        .collect();

    if expected.is_empty() {
        issues.push(ValidationIssue::error(
            "unknown_section_type",
            "section_types",
            format!("none of {section_types:?} names an application module"),
        ));
        notes.push(ScoreNote {
            component: "structure".to_string(),
            points: 0,
            notes: "no recognised sections requested".to_string(),
        });
        return 0;
    }

    let missing: Vec<&str> = expected
        .iter()
        .map(|kind| kind.definition().name)
        .filter(|name| !content.contains(&format!("## {name}")))
        .collect();
    let present = expected.len() - missing.len();
    let points = ((30 * present) as f64 / expected.len() as f64).round() as u8;

    if !missing.is_empty() {
        issues.push(ValidationIssue::error(
            "sections_missing",
            "narrative",
            format!("no narrative for: {}", missing.join(", ")),
        ));
    }
    notes.push(ScoreNote {
        component: "structure".to_string(),
        points,
        notes: format!("{present} of {} sections present", expected.len()),
    });
    points
}

fn score_terms(
    component: &str,
    lowered: &str,
    groups: &[(&[&str], u8)],
    notes: &mut Vec<ScoreNote>,
) -> u8 {
    let mut points = 0;
    let mut matched = Vec::new();
    for (terms, weight) in groups {
        if let Some(term) = terms.iter().find(|term| contains_term(lowered, term)) {
            points += weight;
            matched.push(*term);
        }
    }

    notes.push(ScoreNote {
        component: component.to_string(),
        points,
        notes: if matched.is_empty() {
            "no supporting language found".to_string()
        } else {
            format!("matched {}", matched.join(", "))
        },
    });
    points
}

fn score_alignment(
    context: &ComplianceContext,
    notes: &mut Vec<ScoreNote>,
    issues: &mut Vec<ValidationIssue>,
) -> AgencyAlignmentScore {
    let budget = match context.budget_cap {
        None => {
            issues.push(ValidationIssue::critical(
                "budget_cap_unavailable",
                "budget.cap",
                format!("no budget cap is configured for {}", context.institute),
            ));
            0
        }
        Some(cap) if context.direct_costs > cap => {
            issues.push(ValidationIssue::critical(
                "budget_cap_exceeded",
                "budget.totalDirectCosts",
                format!("direct costs {} exceed the {cap} cap", context.direct_costs),
            ));
            0
        }
        Some(_) if context.direct_costs <= 0 => {
            issues.push(ValidationIssue::error(
                "budget_missing",
                "budget.totalDirectCosts",
                "no direct costs have been budgeted",
            ));
            0
        }
        Some(_) => 25,
    };
    notes.push(ScoreNote {
        component: "alignment.budget".to_string(),
        points: budget,
        notes: format!(
            "direct costs {} against cap {:?}",
            context.direct_costs, context.budget_cap
        ),
    });

    let minimums = allocation_minimums(context.program_type, context.allocation_scope);
    let small_business_ok =
        context.allocation.small_business_percent >= minimums.small_business_percent;
    let institution_ok = minimums
        .research_institution_percent
        .map(|minimum| context.allocation.research_institution_percent >= minimum)
        .unwrap_or(true);
    let allocation = if small_business_ok && institution_ok {
        25
    } else {
        issues.push(ValidationIssue::critical(
            "allocation_minimum_unmet",
            "budget.allocation",
            format!(
                "{} effort allocation is below the program minimum",
                context.program_type.label()
            ),
        ));
        0
    };
    notes.push(ScoreNote {
        component: "alignment.allocation".to_string(),
        points: allocation,
        notes: format!(
            "small business {}%, research institution {}%",
            context.allocation.small_business_percent,
            context.allocation.research_institution_percent
        ),
    });

    let eligible = &context.overrides.eligible_grant_types;
    let funding_opportunity = match (&context.funding_opportunity_id, context.grant_type) {
        (None, _) => {
            issues.push(ValidationIssue::error(
                "funding_opportunity_missing",
                "funding_opportunity.identifier",
                "no funding opportunity announcement is referenced",
            ));
            0
        }
        (Some(_), Some(grant_type)) if !eligible.is_empty() && !eligible.contains(&grant_type) => {
            issues.push(ValidationIssue::critical(
                "grant_type_ineligible",
                "grant_type",
                format!(
                    "the funding opportunity does not accept {} applications",
                    grant_type.label()
                ),
            ));
            0
        }
        (Some(_), None) => 0,
        (Some(_), Some(_)) => 25,
    };
    notes.push(ScoreNote {
        component: "alignment.funding_opportunity".to_string(),
        points: funding_opportunity,
        notes: context
            .funding_opportunity_id
            .clone()
            .unwrap_or_else(|| "none".to_string()),
    });

    let clinical_trial = match (context.overrides.clinical_trial, context.clinical_trial) {
        (Some(ClinicalTrialPolicy::Required), false) => {
            issues.push(ValidationIssue::critical(
                "clinical_trial_mismatch",
                "clinical_trial",
                "the funding opportunity requires a clinical trial",
            ));
            0
        }
        (Some(ClinicalTrialPolicy::NotAllowed), true) => {
            issues.push(ValidationIssue::critical(
                "clinical_trial_mismatch",
                "clinical_trial",
                "the funding opportunity does not allow clinical trials",
            ));
            0
        }
        _ => 25,
    };
    notes.push(ScoreNote {
        component: "alignment.clinical_trial".to_string(),
        points: clinical_trial,
        notes: format!("clinical trial proposed: {}", context.clinical_trial),
    });

    AgencyAlignmentScore {
        budget,
        allocation,
        funding_opportunity,
        clinical_trial,
    }
}

/// Case-sensitive match of `term` bounded by non-alphanumeric characters.
fn contains_term(text: &str, term: &str) -> bool {
    text.match_indices(term).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + term.len()..].chars().next();
        !before.map(char::is_alphanumeric).unwrap_or(false)
            && !after.map(char::is_alphanumeric).unwrap_or(false)
    })
}

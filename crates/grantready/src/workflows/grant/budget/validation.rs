use super::super::domain::{Phase, ProgramType, ValidationIssue};
use super::caps::{allocation_minimums, CapError};
use super::{BudgetCalculation, EffortAllocation, MAX_FEE_PERCENT, MIN_FEE_PERCENT};

/// Everything budget validation needs, resolved by the caller.
#[derive(Debug, Clone)]
pub struct BudgetValidationInput<'a> {
    pub calculation: &'a BudgetCalculation,
    pub cap: Result<i64, CapError>,
    pub allocation: EffortAllocation,
    pub requested_fee_percent: f64,
    pub program_type: ProgramType,
    pub scope: Phase,
    /// Set for one phase of a Fast-Track budget; issue fields are then phase-qualified.
    pub phase: Option<Phase>,
}

fn budget_field(phase: Option<Phase>, name: &str) -> String {
    match phase {
        Some(phase) => format!("budget.{}.{name}", phase.label()),
        None => format!("budget.{name}"),
    }
}

pub fn validate_budget(input: &BudgetValidationInput<'_>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let calculation = input.calculation;
    let field = |name: &str| budget_field(input.phase, name);

    match &input.cap {
        Ok(cap) if calculation.total_direct_costs > *cap => {
            issues.push(ValidationIssue::critical(
                "budget_cap_exceeded",
                field("totalDirectCosts"),
                format!(
                    "total direct costs {} exceed the {} cap by {}",
                    calculation.total_direct_costs,
                    cap,
                    calculation.total_direct_costs.saturating_sub(*cap)
                ),
            ));
        }
        Ok(_) => {}
        Err(error) => {
            issues.push(ValidationIssue::critical(
                "budget_cap_unavailable",
                field("cap"),
                error.to_string(),
            ));
        }
    }

    let minimums = allocation_minimums(input.program_type, input.scope);
    if input.allocation.small_business_percent < minimums.small_business_percent {
        issues.push(ValidationIssue::critical(
            "allocation_minimum_unmet",
            field("allocation.smallBusinessPercent"),
            format!(
                "{} requires the small business to perform at least {}% of the work (declared {}%)",
                input.program_type.label(),
                minimums.small_business_percent,
                input.allocation.small_business_percent
            ),
        ));
    }
    if let Some(minimum) = minimums.research_institution_percent {
        if input.allocation.research_institution_percent < minimum {
            issues.push(ValidationIssue::critical(
                "allocation_minimum_unmet",
                field("allocation.researchInstitutionPercent"),
                format!(
                    "{} requires the research institution to perform at least {}% of the work (declared {}%)",
                    input.program_type.label(),
                    minimum,
                    input.allocation.research_institution_percent
                ),
            ));
        }
    }

    if calculation.personnel + calculation.sub_award_direct > calculation.total_direct_costs {
        issues.push(ValidationIssue::error(
            "budget_structure_inconsistent",
            field("lineItems"),
            format!(
                "personnel ({}) plus sub-award direct costs ({}) exceed total direct costs ({})",
                calculation.personnel, calculation.sub_award_direct, calculation.total_direct_costs
            ),
        ));
    }

    let requested = input.requested_fee_percent;
    if !(MIN_FEE_PERCENT..=MAX_FEE_PERCENT).contains(&requested) {
        issues.push(ValidationIssue::warning(
            "fee_percent_clamped",
            field("rates.feePercent"),
            format!(
                "fee of {requested}% is outside {MIN_FEE_PERCENT}-{MAX_FEE_PERCENT}%; {}% was applied",
                calculation.fee_percent
            ),
        ));
    }

    issues
}

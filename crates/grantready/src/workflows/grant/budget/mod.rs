//! Budget calculation engine.
//!
//! `calculate_budget` is a pure pipeline from line items, sub-awards and vendors to the
//! cost totals, indirect costs and fee. Worksheet edits are applied through `BudgetEdit`
//! so the project can re-derive its budget module block and snapshot in one replace.

mod caps;
pub mod import;
mod validation;

pub use caps::{
    allocation_minimums, allocation_scope, resolve_budget_cap, AllocationMinimums, CapError,
    CatalogError, InstituteCatalog, InstituteProfile,
};
pub use validation::{validate_budget, BudgetValidationInput};

use serde::{Deserialize, Serialize};

use super::domain::Phase;
use super::error::ProjectError;

/// Per sub-award ceiling on the direct costs that count toward MTDC.
pub const SUBAWARD_MTDC_THRESHOLD: i64 = 25_000;
pub const MIN_FEE_PERCENT: f64 = 1.0;
pub const MAX_FEE_PERCENT: f64 = 7.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    Personnel,
    Equipment,
    Supplies,
    Travel,
    PatientCare,
    Tuition,
    Consultant,
    Other,
}

impl CostCategory {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "personnel" | "salary" | "salaries" => Some(Self::Personnel),
            "equipment" => Some(Self::Equipment),
            "supplies" | "materials" => Some(Self::Supplies),
            "travel" => Some(Self::Travel),
            "patient_care" => Some(Self::PatientCare),
            "tuition" | "tuition_remission" => Some(Self::Tuition),
            "consultant" | "consultants" => Some(Self::Consultant),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: String,
    pub category: CostCategory,
    #[serde(default)]
    pub description: String,
    pub amount: i64,
}

/// Subcontract to a partner institution. Derived costs are private and recomputed on every edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SubAwardDraft")]
pub struct SubAward {
    id: String,
    institution: String,
    contact: String,
    direct_costs: i64,
    fa_rate: f64,
    indirect_costs: i64,
    total: i64,
}

/// Editable inputs of a sub-award; stored derived values are ignored and recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAwardDraft {
    pub id: String,
    #[serde(default)]
    pub institution: String,
    #[serde(default)]
    pub contact: String,
    pub direct_costs: i64,
    #[serde(default)]
    pub fa_rate: f64,
}

impl From<SubAwardDraft> for SubAward {
    fn from(draft: SubAwardDraft) -> Self {
        let mut sub_award = SubAward {
            id: draft.id,
            institution: draft.institution,
            contact: draft.contact,
            direct_costs: draft.direct_costs,
            fa_rate: draft.fa_rate,
            indirect_costs: 0,
            total: 0,
        };
        sub_award.recompute();
        sub_award
    }
}

impl SubAward {
    pub fn new(id: &str, institution: &str, direct_costs: i64, fa_rate: f64) -> Self {
        SubAwardDraft {
            id: id.to_string(),
            institution: institution.to_string(),
            contact: String::new(),
            direct_costs,
            fa_rate,
        }
        .into()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn institution(&self) -> &str {
        &self.institution
    }

    pub fn contact(&self) -> &str {
        &self.contact
    }

    pub fn direct_costs(&self) -> i64 {
        self.direct_costs
    }

    pub fn fa_rate(&self) -> f64 {
        self.fa_rate
    }

    pub fn indirect_costs(&self) -> i64 {
        self.indirect_costs
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub(crate) fn set_direct_costs(&mut self, direct_costs: i64) {
        self.direct_costs = direct_costs;
        self.recompute();
    }

    pub(crate) fn set_fa_rate(&mut self, fa_rate: f64) {
        self.fa_rate = fa_rate;
        self.recompute();
    }

    pub fn set_details(&mut self, institution: &str, contact: &str) {
        self.institution = institution.to_string();
        self.contact = contact.to_string();
    }

    fn recompute(&mut self) {
        self.indirect_costs = round_currency(self.direct_costs as f64 * self.fa_rate / 100.0);
        self.total = self.direct_costs.saturating_add(self.indirect_costs);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetRates {
    pub indirect_rate: f64,
    pub fee_percent: f64,
}

impl Default for BudgetRates {
    fn default() -> Self {
        Self {
            indirect_rate: 0.0,
            fee_percent: MAX_FEE_PERCENT,
        }
    }
}

/// Declared share of the work performed by the applicant and the partner institution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EffortAllocation {
    pub small_business_percent: f64,
    #[serde(default)]
    pub research_institution_percent: f64,
}

/// Editable budget inputs for one phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetWorksheet {
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub sub_awards: Vec<SubAward>,
    #[serde(default)]
    pub vendors: Vec<Vendor>,
    #[serde(default)]
    pub rates: BudgetRates,
    #[serde(default)]
    pub allocation: EffortAllocation,
}

impl BudgetWorksheet {
    pub fn has_entries(&self) -> bool {
        !self.line_items.is_empty() || !self.sub_awards.is_empty() || !self.vendors.is_empty()
    }

    pub fn calculate(&self) -> BudgetCalculation {
        calculate_budget(&self.line_items, &self.sub_awards, &self.vendors, &self.rates)
    }

    /// Reject negative line item, sub-award and vendor amounts.
    pub fn check_amounts(&self) -> Result<(), ProjectError> {
        for item in &self.line_items {
            check_amount("line item amount", &item.id, item.amount)?;
        }
        for sub_award in &self.sub_awards {
            check_amount("sub-award direct costs", sub_award.id(), sub_award.direct_costs())?;
        }
        for vendor in &self.vendors {
            check_amount("vendor amount", &vendor.id, vendor.amount)?;
        }
        Ok(())
    }
}

/// Worksheets of one project. Single-phase grants use `primary` only; Fast-Track keeps
/// phase 1 in `primary` and phase 2 in `phase2`, each validated against its own cap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetWorksheets {
    /// Phase that worksheet edits address. Always `None` outside Fast-Track.
    #[serde(default)]
    pub active_phase: Option<Phase>,
    #[serde(default)]
    pub primary: BudgetWorksheet,
    #[serde(default)]
    pub phase2: BudgetWorksheet,
}

impl BudgetWorksheets {
    pub fn worksheet(&self, phase: Option<Phase>) -> &BudgetWorksheet {
        match phase {
            Some(Phase::Phase2) => &self.phase2,
            _ => &self.primary,
        }
    }

    pub(crate) fn worksheet_mut(&mut self, phase: Option<Phase>) -> &mut BudgetWorksheet {
        match phase {
            Some(Phase::Phase2) => &mut self.phase2,
            _ => &mut self.primary,
        }
    }

    pub fn active(&self) -> &BudgetWorksheet {
        self.worksheet(self.active_phase)
    }

    pub fn has_entries(&self) -> bool {
        self.primary.has_entries() || self.phase2.has_entries()
    }
}

/// Output of the calculation pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetCalculation {
    pub personnel: i64,
    pub equipment: i64,
    pub patient_care: i64,
    pub tuition: i64,
    pub line_item_total: i64,
    pub sub_award_direct: i64,
    pub sub_award_indirect: i64,
    pub vendor_total: i64,
    pub total_direct_costs: i64,
    pub sub_award_mtdc_included: i64,
    pub sub_award_mtdc_excluded: i64,
    pub mtdc: i64,
    pub indirect_costs: i64,
    pub subtotal: i64,
    pub fee_percent: f64,
    pub fee_profit: i64,
    pub total_project_costs: i64,
}

impl BudgetCalculation {
    pub fn remaining(&self, cap: i64) -> i64 {
        cap.saturating_sub(self.total_direct_costs)
    }

    pub fn utilization(&self, cap: i64) -> f64 {
        if cap > 0 {
            self.total_direct_costs as f64 / cap as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Field-wise sum of two phase calculations. The fee percent becomes the blended rate.
    pub fn merged(&self, other: &Self) -> Self {
        let subtotal = self.subtotal.saturating_add(other.subtotal);
        let fee_profit = self.fee_profit.saturating_add(other.fee_profit);
        let fee_percent = match (self.subtotal, other.subtotal) {
            (0, 0) => self.fee_percent.max(other.fee_percent),
            (_, 0) => self.fee_percent,
            (0, _) => other.fee_percent,
            _ => fee_profit as f64 / subtotal as f64 * 100.0,
        };

        Self {
            personnel: self.personnel.saturating_add(other.personnel),
            equipment: self.equipment.saturating_add(other.equipment),
            patient_care: self.patient_care.saturating_add(other.patient_care),
            tuition: self.tuition.saturating_add(other.tuition),
            line_item_total: self.line_item_total.saturating_add(other.line_item_total),
            sub_award_direct: self.sub_award_direct.saturating_add(other.sub_award_direct),
            sub_award_indirect: self.sub_award_indirect.saturating_add(other.sub_award_indirect),
            vendor_total: self.vendor_total.saturating_add(other.vendor_total),
            total_direct_costs: self.total_direct_costs.saturating_add(other.total_direct_costs),
            sub_award_mtdc_included: self
                .sub_award_mtdc_included
                .saturating_add(other.sub_award_mtdc_included),
            sub_award_mtdc_excluded: self
                .sub_award_mtdc_excluded
                .saturating_add(other.sub_award_mtdc_excluded),
            mtdc: self.mtdc.saturating_add(other.mtdc),
            indirect_costs: self.indirect_costs.saturating_add(other.indirect_costs),
            subtotal,
            fee_percent,
            fee_profit,
            total_project_costs: self.total_project_costs.saturating_add(other.total_project_costs),
        }
    }
}

/// One phase of a Fast-Track budget, checked against that phase's cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseBudget {
    pub phase: Phase,
    pub budget_cap: Option<i64>,
    pub calculation: BudgetCalculation,
}

/// Flattened view of the latest calculation kept next to the module blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub calculation: BudgetCalculation,
    pub phase: Option<Phase>,
    pub budget_cap: Option<i64>,
    pub remaining: Option<i64>,
    pub utilization: f64,
    pub requested_fee_percent: f64,
    pub allocation: EffortAllocation,
    /// Per-phase breakdown; empty for single-phase grants.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<PhaseBudget>,
}

impl BudgetSnapshot {
    pub fn new(worksheet: &BudgetWorksheet, phase: Option<Phase>, budget_cap: Option<i64>) -> Self {
        Self::from_calculation(worksheet.calculate(), worksheet, phase, budget_cap, Vec::new())
    }

    /// Sum of the phase calculations against the combined cap. Rates and allocation are
    /// reported from `active`, the worksheet currently being edited.
    pub fn combined(
        phases: Vec<PhaseBudget>,
        active: &BudgetWorksheet,
        phase: Option<Phase>,
        budget_cap: Option<i64>,
    ) -> Self {
        let calculation = phases
            .iter()
            .fold(BudgetCalculation::default(), |total, entry| {
                total.merged(&entry.calculation)
            });
        Self::from_calculation(calculation, active, phase, budget_cap, phases)
    }

    fn from_calculation(
        calculation: BudgetCalculation,
        worksheet: &BudgetWorksheet,
        phase: Option<Phase>,
        budget_cap: Option<i64>,
        phases: Vec<PhaseBudget>,
    ) -> Self {
        let remaining = budget_cap.map(|cap| calculation.remaining(cap));
        let utilization = budget_cap
            .map(|cap| calculation.utilization(cap))
            .unwrap_or(0.0);

        Self {
            calculation,
            phase,
            budget_cap,
            remaining,
            utilization,
            requested_fee_percent: worksheet.rates.fee_percent,
            allocation: worksheet.allocation,
            phases,
        }
    }
}

pub(crate) fn round_currency(value: f64) -> i64 {
    value.round() as i64
}

pub fn clamp_fee_percent(fee_percent: f64) -> f64 {
    if fee_percent.is_finite() {
        fee_percent.clamp(MIN_FEE_PERCENT, MAX_FEE_PERCENT)
    } else {
        MIN_FEE_PERCENT
    }
}

pub fn calculate_budget(
    line_items: &[LineItem],
    sub_awards: &[SubAward],
    vendors: &[Vendor],
    rates: &BudgetRates,
) -> BudgetCalculation {
    let category_total = |category: CostCategory| -> i64 {
        saturating_total(
            line_items
                .iter()
                .filter(|item| item.category == category)
                .map(|item| item.amount),
        )
    };

    let sub_award_direct = saturating_total(sub_awards.iter().map(SubAward::direct_costs));
    let sub_award_indirect = saturating_total(sub_awards.iter().map(SubAward::indirect_costs));
    let vendor_total = saturating_total(vendors.iter().map(|vendor| vendor.amount));
    let line_item_total = saturating_total(line_items.iter().map(|item| item.amount));

    let total_direct_costs = line_item_total
        .saturating_add(sub_award_direct)
        .saturating_add(vendor_total);

    let sub_award_mtdc_included = saturating_total(
        sub_awards
            .iter()
            .map(|sub_award| sub_award.direct_costs().min(SUBAWARD_MTDC_THRESHOLD)),
    );
    let sub_award_mtdc_excluded = sub_award_direct.saturating_sub(sub_award_mtdc_included);

    let personnel = category_total(CostCategory::Personnel);
    let equipment = category_total(CostCategory::Equipment);
    let patient_care = category_total(CostCategory::PatientCare);
    let tuition = category_total(CostCategory::Tuition);

    let mtdc = total_direct_costs
        .saturating_sub(equipment)
        .saturating_sub(sub_award_mtdc_excluded)
        .saturating_sub(patient_care)
        .saturating_sub(tuition);
    let indirect_costs = round_currency(mtdc as f64 * rates.indirect_rate / 100.0);
    let subtotal = total_direct_costs
        .saturating_add(indirect_costs)
        .saturating_add(sub_award_indirect);

    let fee_percent = clamp_fee_percent(rates.fee_percent);
    let fee_profit = round_currency(subtotal as f64 * fee_percent / 100.0);

    BudgetCalculation {
        personnel,
        equipment,
        patient_care,
        tuition,
        line_item_total,
        sub_award_direct,
        sub_award_indirect,
        vendor_total,
        total_direct_costs,
        sub_award_mtdc_included,
        sub_award_mtdc_excluded,
        mtdc,
        indirect_costs,
        subtotal,
        fee_percent,
        fee_profit,
        total_project_costs: subtotal.saturating_add(fee_profit),
    }
}

fn saturating_total(amounts: impl Iterator<Item = i64>) -> i64 {
    amounts.fold(0, i64::saturating_add)
}

/// A single worksheet mutation. Every edit triggers a full re-derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BudgetEdit {
    UpsertLineItem(LineItem),
    RemoveLineItem { id: String },
    ReplaceLineItems { items: Vec<LineItem> },
    UpsertSubAward(SubAwardDraft),
    SetSubAwardDirectCosts { id: String, direct_costs: i64 },
    SetSubAwardRate { id: String, fa_rate: f64 },
    RemoveSubAward { id: String },
    UpsertVendor(Vendor),
    RemoveVendor { id: String },
    SetRates(BudgetRates),
    SetAllocation(EffortAllocation),
    SetActivePhase { phase: Option<Phase> },
}

fn check_rate(field: &'static str, value: f64) -> Result<(), ProjectError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ProjectError::InvalidRate { field, value })
    }
}

fn check_amount(field: &'static str, id: &str, value: i64) -> Result<(), ProjectError> {
    if value >= 0 {
        Ok(())
    } else {
        Err(ProjectError::InvalidAmount {
            field,
            id: id.to_string(),
            value,
        })
    }
}

fn missing(kind: &'static str, id: &str) -> ProjectError {
    ProjectError::UnknownBudgetEntry {
        kind,
        id: id.to_string(),
    }
}

impl BudgetWorksheet {
    /// Apply an edit to the inputs. Phase selection and lock checks belong to the caller.
    pub(crate) fn apply(&mut self, edit: &BudgetEdit) -> Result<(), ProjectError> {
        match edit {
            BudgetEdit::UpsertLineItem(item) => {
                check_amount("line item amount", &item.id, item.amount)?;
                match self.line_items.iter_mut().find(|existing| existing.id == item.id) {
                    Some(existing) => *existing = item.clone(),
                    None => self.line_items.push(item.clone()),
                }
            }
            BudgetEdit::RemoveLineItem { id } => {
                let before = self.line_items.len();
                self.line_items.retain(|item| &item.id != id);
                if self.line_items.len() == before {
                    return Err(missing("line item", id));
                }
            }
            BudgetEdit::ReplaceLineItems { items } => {
                for item in items {
                    check_amount("line item amount", &item.id, item.amount)?;
                }
                self.line_items = items.clone();
            }
            BudgetEdit::UpsertSubAward(draft) => {
                check_rate("fa_rate", draft.fa_rate)?;
                check_amount("sub-award direct costs", &draft.id, draft.direct_costs)?;
                match self.sub_awards.iter_mut().find(|existing| existing.id == draft.id) {
                    Some(existing) => {
                        existing.set_details(&draft.institution, &draft.contact);
                        existing.set_direct_costs(draft.direct_costs);
                        existing.set_fa_rate(draft.fa_rate);
                    }
                    None => self.sub_awards.push(SubAward::from(draft.clone())),
                }
            }
            BudgetEdit::SetSubAwardDirectCosts { id, direct_costs } => {
                check_amount("sub-award direct costs", id, *direct_costs)?;
                self.sub_award_mut(id)?.set_direct_costs(*direct_costs);
            }
            BudgetEdit::SetSubAwardRate { id, fa_rate } => {
                check_rate("fa_rate", *fa_rate)?;
                self.sub_award_mut(id)?.set_fa_rate(*fa_rate);
            }
            BudgetEdit::RemoveSubAward { id } => {
                let before = self.sub_awards.len();
                self.sub_awards.retain(|sub_award| sub_award.id() != id.as_str());
                if self.sub_awards.len() == before {
                    return Err(missing("sub-award", id));
                }
            }
            BudgetEdit::UpsertVendor(vendor) => {
                check_amount("vendor amount", &vendor.id, vendor.amount)?;
                match self.vendors.iter_mut().find(|existing| existing.id == vendor.id) {
                    Some(existing) => *existing = vendor.clone(),
                    None => self.vendors.push(vendor.clone()),
                }
            }
            BudgetEdit::RemoveVendor { id } => {
                let before = self.vendors.len();
                self.vendors.retain(|vendor| &vendor.id != id);
                if self.vendors.len() == before {
                    return Err(missing("vendor", id));
                }
            }
            BudgetEdit::SetRates(rates) => {
                check_rate("indirect_rate", rates.indirect_rate)?;
                if !rates.fee_percent.is_finite() {
                    return Err(ProjectError::InvalidRate {
                        field: "fee_percent",
                        value: rates.fee_percent,
                    });
                }
                self.rates = *rates;
            }
            BudgetEdit::SetAllocation(allocation) => {
                check_rate("small_business_percent", allocation.small_business_percent)?;
                check_rate(
                    "research_institution_percent",
                    allocation.research_institution_percent,
                )?;
                self.allocation = *allocation;
            }
            BudgetEdit::SetActivePhase { .. } => {}
        }
        Ok(())
    }

    fn sub_award_mut(&mut self, id: &str) -> Result<&mut SubAward, ProjectError> {
        self.sub_awards
            .iter_mut()
            .find(|sub_award| sub_award.id() == id)
            .ok_or_else(|| missing("sub-award", id))
    }
}

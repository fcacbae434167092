use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::budget::InstituteProfile;
use super::domain::{GrantType, ValidationIssue};
use super::project::Project;

/// Prior award evidence required before a full-development or continuation selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorPhaseEvidence {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub award_number: Option<String>,
    #[serde(default)]
    pub completion_date: Option<NaiveDate>,
}

/// Feasibility evidence a direct-to-phase-II applicant must supply in lieu of a prior award.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeasibilityEvidence {
    #[serde(default)]
    pub preliminary_data: Option<String>,
    #[serde(default)]
    pub proof_of_concept: Option<String>,
    #[serde(default)]
    pub technical_feasibility: Option<String>,
    #[serde(default)]
    pub funding_source: Option<String>,
    #[serde(default)]
    pub key_milestones: Option<String>,
    #[serde(default)]
    pub commercial_potential: Option<String>,
}

impl FeasibilityEvidence {
    fn entries(&self) -> [(&'static str, &Option<String>); 6] {
        [
            ("feasibility_evidence.preliminaryData", &self.preliminary_data),
            ("feasibility_evidence.proofOfConcept", &self.proof_of_concept),
            (
                "feasibility_evidence.technicalFeasibility",
                &self.technical_feasibility,
            ),
            ("feasibility_evidence.fundingSource", &self.funding_source),
            ("feasibility_evidence.keyMilestones", &self.key_milestones),
            (
                "feasibility_evidence.commercialPotential",
                &self.commercial_potential,
            ),
        ]
    }
}

/// Grant-type selection. Serialized as the selected grant type code, or `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<GrantType>", into = "Option<GrantType>")]
pub enum LifecycleState {
    #[default]
    Unselected,
    Selected(GrantType),
}

impl From<Option<GrantType>> for LifecycleState {
    fn from(value: Option<GrantType>) -> Self {
        value.map(Self::Selected).unwrap_or(Self::Unselected)
    }
}

impl From<LifecycleState> for Option<GrantType> {
    fn from(value: LifecycleState) -> Self {
        value.grant_type()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("grant type is already selected as {}", .0.label())]
    AlreadySelected(GrantType),
    #[error("institute {0} is not configured")]
    UnknownInstitute(String),
    #[error("institute {0} defines no Phase IIB budget cap")]
    MissingPhaseIIBCap(String),
}

impl LifecycleState {
    pub fn grant_type(self) -> Option<GrantType> {
        match self {
            Self::Unselected => None,
            Self::Selected(grant_type) => Some(grant_type),
        }
    }

    /// One-time transition out of `Unselected`, checked against the institute configuration.
    pub fn select(
        self,
        grant_type: GrantType,
        institute: &InstituteProfile,
    ) -> Result<Self, LifecycleError> {
        if let Self::Selected(existing) = self {
            return Err(LifecycleError::AlreadySelected(existing));
        }
        if grant_type == GrantType::PhaseIIB && institute.phase2b_cap.is_none() {
            return Err(LifecycleError::MissingPhaseIIBCap(institute.code.clone()));
        }
        Ok(Self::Selected(grant_type))
    }
}

/// Outcome of the precondition check for the selected grant type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleCheck {
    pub valid: bool,
    pub missing_fields: Vec<String>,
    pub errors: Vec<ValidationIssue>,
}

pub fn check_lifecycle(project: &Project) -> LifecycleCheck {
    let mut missing: Vec<(&'static str, String)> = Vec::new();

    match project.lifecycle() {
        LifecycleState::Unselected => {
            return LifecycleCheck {
                valid: false,
                missing_fields: vec!["grant_type".to_string()],
                errors: vec![ValidationIssue::critical(
                    "grant_type_unselected",
                    "grant_type",
                    "a grant type must be selected before the application can be validated",
                )],
            };
        }
        LifecycleState::Selected(GrantType::PhaseI | GrantType::FastTrack) => {}
        LifecycleState::Selected(GrantType::DirectToPhaseII) => {
            for (field, value) in project.feasibility_evidence().entries() {
                if !text_present(value) {
                    missing.push((field, format!("{field} is required for Direct-to-Phase II")));
                }
            }
        }
        LifecycleState::Selected(grant_type @ (GrantType::PhaseII | GrantType::PhaseIIB)) => {
            let prior = project.prior_phase();
            let label = grant_type.label();
            if prior.success != Some(true) {
                missing.push((
                    "prior_phase.success",
                    format!("{label} requires a successfully completed prior phase"),
                ));
            }
            if !text_present(&prior.award_number) {
                missing.push((
                    "prior_phase.awardNumber",
                    format!("{label} requires the prior phase award number"),
                ));
            }
            if grant_type == GrantType::PhaseII && prior.completion_date.is_none() {
                missing.push((
                    "prior_phase.completionDate",
                    format!("{label} requires the prior phase completion date"),
                ));
            }
        }
    }

    let errors = missing
        .iter()
        .map(|(field, message)| {
            ValidationIssue::critical("lifecycle_precondition_unmet", *field, message.clone())
        })
        .collect::<Vec<_>>();

    LifecycleCheck {
        valid: errors.is_empty(),
        missing_fields: missing.into_iter().map(|(field, _)| field.to_string()).collect(),
        errors,
    }
}

fn text_present(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|text| !text.trim().is_empty())
        .unwrap_or(false)
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::super::domain::{GrantType, Phase, ProgramType};

/// Budget caps published by one funding institute, in whole currency units of direct cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstituteProfile {
    pub code: String,
    pub name: String,
    pub phase1_cap: i64,
    pub phase2_cap: i64,
    #[serde(default)]
    pub phase2b_cap: Option<i64>,
}

impl InstituteProfile {
    fn new(code: &str, name: &str, phase1_cap: i64, phase2_cap: i64, phase2b_cap: Option<i64>) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            phase1_cap,
            phase2_cap,
            phase2b_cap,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("institute catalog is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("institute catalog defines no institutes")]
    Empty,
    #[error("institute {code} declares a non-positive budget cap")]
    InvalidCap { code: String },
    #[error("institute {code} is declared more than once")]
    Duplicate { code: String },
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    institutes: Vec<InstituteProfile>,
}

/// Lookup table of institute cap configurations keyed by institute code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstituteCatalog {
    institutes: BTreeMap<String, InstituteProfile>,
}

impl InstituteCatalog {
    pub fn standard() -> Self {
        let institutes = [
            InstituteProfile::new("NCI", "National Cancer Institute", 400_000, 2_000_000, Some(4_000_000)),
            InstituteProfile::new(
                "NIAID",
                "National Institute of Allergy and Infectious Diseases",
                300_000,
                2_000_000,
                None,
            ),
            InstituteProfile::new(
                "NHLBI",
                "National Heart, Lung, and Blood Institute",
                350_000,
                2_000_000,
                Some(3_000_000),
            ),
            InstituteProfile::new(
                "NIGMS",
                "National Institute of General Medical Sciences",
                306_872,
                2_045_816,
                None,
            ),
        ];

        Self {
            institutes: institutes
                .into_iter()
                .map(|profile| (profile.code.clone(), profile))
                .collect(),
        }
    }

    /// Parse an `[[institutes]]` TOML table list.
    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(raw)?;
        if file.institutes.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut institutes = BTreeMap::new();
        for mut profile in file.institutes {
            profile.code = profile.code.trim().to_ascii_uppercase();
            let caps_valid = profile.phase1_cap > 0
                && profile.phase2_cap > 0
                && profile.phase2b_cap.map(|cap| cap > 0).unwrap_or(true);
            if !caps_valid {
                return Err(CatalogError::InvalidCap { code: profile.code });
            }
            if institutes.contains_key(&profile.code) {
                return Err(CatalogError::Duplicate { code: profile.code });
            }
            institutes.insert(profile.code.clone(), profile);
        }

        Ok(Self { institutes })
    }

    pub fn get(&self, code: &str) -> Option<&InstituteProfile> {
        self.institutes.get(&code.trim().to_ascii_uppercase())
    }

    pub fn institutes(&self) -> impl Iterator<Item = &InstituteProfile> {
        self.institutes.values()
    }
}

impl Default for InstituteCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapError {
    #[error("institute {0} is not configured")]
    UnknownInstitute(String),
    #[error("institute {institute} defines no {} budget cap", .grant_type.label())]
    Missing {
        institute: String,
        grant_type: GrantType,
    },
    #[error("grant type has not been selected")]
    GrantTypeUnselected,
}

/// Direct-cost cap for the grant type; combined-phase projects use the active phase or the sum.
pub fn resolve_budget_cap(
    institute: &InstituteProfile,
    grant_type: GrantType,
    active_phase: Option<Phase>,
) -> Result<i64, CapError> {
    match grant_type {
        GrantType::PhaseI => Ok(institute.phase1_cap),
        GrantType::PhaseII | GrantType::DirectToPhaseII => Ok(institute.phase2_cap),
        GrantType::FastTrack => Ok(match active_phase {
            Some(Phase::Phase1) => institute.phase1_cap,
            Some(Phase::Phase2) => institute.phase2_cap,
            None => institute.phase1_cap.saturating_add(institute.phase2_cap),
        }),
        GrantType::PhaseIIB => institute.phase2b_cap.ok_or_else(|| CapError::Missing {
            institute: institute.code.clone(),
            grant_type,
        }),
    }
}

/// Which phase's effort-allocation rule applies to the budget being edited.
pub fn allocation_scope(grant_type: Option<GrantType>, active_phase: Option<Phase>) -> Phase {
    match grant_type {
        Some(GrantType::PhaseI) => Phase::Phase1,
        Some(GrantType::FastTrack) => active_phase.unwrap_or(Phase::Phase1),
        _ => Phase::Phase2,
    }
}

/// Inclusive minimum effort percentages for the small business and partner institution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationMinimums {
    pub small_business_percent: f64,
    pub research_institution_percent: Option<f64>,
}

pub fn allocation_minimums(program: ProgramType, scope: Phase) -> AllocationMinimums {
    match (program, scope) {
        (ProgramType::Sbir, Phase::Phase1) => AllocationMinimums {
            small_business_percent: 67.0,
            research_institution_percent: None,
        },
        (ProgramType::Sbir, Phase::Phase2) => AllocationMinimums {
            small_business_percent: 50.0,
            research_institution_percent: None,
        },
        (ProgramType::Sttr, _) => AllocationMinimums {
            small_business_percent: 40.0,
            research_institution_percent: Some(30.0),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_track_cap_follows_active_phase() {
        let catalog = InstituteCatalog::standard();
        let nci = catalog.get("nci").expect("NCI configured");

        assert_eq!(resolve_budget_cap(nci, GrantType::FastTrack, Some(Phase::Phase1)), Ok(400_000));
        assert_eq!(resolve_budget_cap(nci, GrantType::FastTrack, Some(Phase::Phase2)), Ok(2_000_000));
        assert_eq!(resolve_budget_cap(nci, GrantType::FastTrack, None), Ok(2_400_000));
    }

    #[test]
    fn phase2b_cap_missing_is_an_error() {
        let catalog = InstituteCatalog::standard();
        let niaid = catalog.get("NIAID").expect("NIAID configured");

        match resolve_budget_cap(niaid, GrantType::PhaseIIB, None) {
            Err(CapError::Missing { institute, .. }) => assert_eq!(institute, "NIAID"),
            other => panic!("expected missing cap, got {other:?}"),
        }
    }

    #[test]
    fn catalog_parses_toml_tables() {
        let catalog = InstituteCatalog::from_toml_str(
            r#"
            [[institutes]]
            code = "nida"
            name = "National Institute on Drug Abuse"
            phase1_cap = 325000
            phase2_cap = 2100000
            "#,
        )
        .expect("catalog parses");

        let nida = catalog.get("NIDA").expect("code normalized");
        assert_eq!(nida.phase2b_cap, None);
        assert_eq!(nida.phase1_cap, 325_000);
    }

    #[test]
    fn catalog_rejects_non_positive_caps() {
        let result = InstituteCatalog::from_toml_str(
            r#"
            [[institutes]]
            code = "X"
            name = "Broken"
            phase1_cap = 0
            phase2_cap = 10
            "#,
        );
        assert!(matches!(result, Err(CatalogError::InvalidCap { .. })));
    }

    #[test]
    fn sttr_minimums_cover_partner_institution() {
        let minimums = allocation_minimums(ProgramType::Sttr, Phase::Phase2);
        assert_eq!(minimums.small_business_percent, 40.0);
        assert_eq!(minimums.research_institution_percent, Some(30.0));
        assert_eq!(allocation_scope(Some(GrantType::PhaseIIB), None), Phase::Phase2);
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identifier of one of the nine application modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub u8);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tagged variant for each module slot; dispatch hangs off this rather than raw ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    TitleConcept,
    SpecificAims,
    TeamFacilities,
    Significance,
    ExperimentalApproach,
    BudgetJustification,
    Regulatory,
    FinalCompilation,
    Commercialization,
}

impl ModuleKind {
    pub const fn ordered() -> [Self; 9] {
        [
            Self::TitleConcept,
            Self::SpecificAims,
            Self::TeamFacilities,
            Self::Significance,
            Self::ExperimentalApproach,
            Self::BudgetJustification,
            Self::Regulatory,
            Self::FinalCompilation,
            Self::Commercialization,
        ]
    }

    pub const fn id(self) -> ModuleId {
        match self {
            Self::TitleConcept => ModuleId(1),
            Self::SpecificAims => ModuleId(2),
            Self::TeamFacilities => ModuleId(3),
            Self::Significance => ModuleId(4),
            Self::ExperimentalApproach => ModuleId(5),
            Self::BudgetJustification => ModuleId(6),
            Self::Regulatory => ModuleId(7),
            Self::FinalCompilation => ModuleId(8),
            Self::Commercialization => ModuleId(9),
        }
    }

    pub fn from_id(id: ModuleId) -> Option<Self> {
        Self::ordered().into_iter().find(|kind| kind.id() == id)
    }

    pub const fn slug(self) -> &'static str {
        match self {
            Self::TitleConcept => "title_concept",
            Self::SpecificAims => "specific_aims",
            Self::TeamFacilities => "team_facilities",
            Self::Significance => "significance",
            Self::ExperimentalApproach => "experimental_approach",
            Self::BudgetJustification => "budget_justification",
            Self::Regulatory => "regulatory",
            Self::FinalCompilation => "final_compilation",
            Self::Commercialization => "commercialization",
        }
    }

    /// Modules whose content is split into phase sections on combined-phase projects.
    pub const fn split(self) -> Option<SplitModule> {
        match self {
            Self::SpecificAims => Some(SplitModule::Aims),
            Self::ExperimentalApproach => Some(SplitModule::Approach),
            Self::BudgetJustification => Some(SplitModule::Budget),
            Self::Regulatory => Some(SplitModule::Regulatory),
            _ => None,
        }
    }

    pub fn definition(self) -> &'static ModuleDefinition {
        &MODULE_REGISTRY[(self.id().0 - 1) as usize]
    }
}

/// The subset of modules that carry phase overlay sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitModule {
    Aims,
    Approach,
    Budget,
    Regulatory,
}

impl SplitModule {
    pub const fn ordered() -> [Self; 4] {
        [Self::Aims, Self::Approach, Self::Budget, Self::Regulatory]
    }

    pub const fn module(self) -> ModuleKind {
        match self {
            Self::Aims => ModuleKind::SpecificAims,
            Self::Approach => ModuleKind::ExperimentalApproach,
            Self::Budget => ModuleKind::BudgetJustification,
            Self::Regulatory => ModuleKind::Regulatory,
        }
    }
}

/// Static description of a module and the fields it must carry.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDefinition {
    pub id: ModuleId,
    pub kind: ModuleKind,
    pub name: &'static str,
    pub required_fields: &'static [&'static str],
}

static MODULE_REGISTRY: [ModuleDefinition; 9] = [
    ModuleDefinition {
        id: ModuleId(1),
        kind: ModuleKind::TitleConcept,
        name: "Title & Concept",
        required_fields: &[
            "project_title",
            "lay_summary",
            "problem_statement",
            "innovation",
        ],
    },
    ModuleDefinition {
        id: ModuleId(2),
        kind: ModuleKind::SpecificAims,
        name: "Specific Aims",
        required_fields: &["central_hypothesis", "aims", "expected_outcomes"],
    },
    ModuleDefinition {
        id: ModuleId(3),
        kind: ModuleKind::TeamFacilities,
        name: "Team & Facilities",
        required_fields: &["principal_investigator", "key_personnel", "facilities"],
    },
    ModuleDefinition {
        id: ModuleId(4),
        kind: ModuleKind::Significance,
        name: "Significance & Innovation",
        required_fields: &["significance", "innovation_detail", "prior_work"],
    },
    ModuleDefinition {
        id: ModuleId(5),
        kind: ModuleKind::ExperimentalApproach,
        name: "Experimental Approach",
        required_fields: &["methods", "statistical_plan", "timeline", "go_no_go_criteria"],
    },
    ModuleDefinition {
        id: ModuleId(6),
        kind: ModuleKind::BudgetJustification,
        name: "Budget & Justification",
        required_fields: &[
            "total_direct_costs",
            "indirect_costs",
            "total_project_costs",
            "justification",
        ],
    },
    ModuleDefinition {
        id: ModuleId(7),
        kind: ModuleKind::Regulatory,
        name: "Regulatory & Human Subjects",
        required_fields: &["human_subjects", "vertebrate_animals", "data_management_plan"],
    },
    ModuleDefinition {
        id: ModuleId(8),
        kind: ModuleKind::FinalCompilation,
        name: "Final Compilation",
        required_fields: &["cover_letter", "abstract", "narrative"],
    },
    ModuleDefinition {
        id: ModuleId(9),
        kind: ModuleKind::Commercialization,
        name: "Commercialization Plan",
        required_fields: &[
            "market_opportunity",
            "business_model",
            "revenue_projection",
            "ip_strategy",
        ],
    },
];

/// The nine module definitions in presentation order.
pub fn module_definitions() -> &'static [ModuleDefinition] {
    &MODULE_REGISTRY
}

pub fn module_definition(id: ModuleId) -> Option<&'static ModuleDefinition> {
    ModuleKind::from_id(id).map(ModuleKind::definition)
}

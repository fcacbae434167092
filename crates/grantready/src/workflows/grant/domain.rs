use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier wrapper for grant application projects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

/// Funding mechanism selected for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantType {
    #[serde(rename = "phase_i")]
    PhaseI,
    #[serde(rename = "phase_ii")]
    PhaseII,
    #[serde(rename = "fast_track")]
    FastTrack,
    #[serde(rename = "direct_to_phase_ii")]
    DirectToPhaseII,
    #[serde(rename = "phase_iib")]
    PhaseIIB,
}

impl GrantType {
    pub const fn ordered() -> [Self; 5] {
        [
            Self::PhaseI,
            Self::PhaseII,
            Self::FastTrack,
            Self::DirectToPhaseII,
            Self::PhaseIIB,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::PhaseI => "Phase I",
            Self::PhaseII => "Phase II",
            Self::FastTrack => "Fast-Track",
            Self::DirectToPhaseII => "Direct-to-Phase II",
            Self::PhaseIIB => "Phase IIB",
        }
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::PhaseI => "phase_i",
            Self::PhaseII => "phase_ii",
            Self::FastTrack => "fast_track",
            Self::DirectToPhaseII => "direct_to_phase_ii",
            Self::PhaseIIB => "phase_iib",
        }
    }

    pub fn from_code(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ordered()
            .into_iter()
            .find(|grant_type| grant_type.code() == normalized)
    }

    /// Feasibility-only awards skip commercialization as a blocking module.
    pub const fn is_feasibility_only(self) -> bool {
        matches!(self, Self::PhaseI)
    }

    /// Combined-phase awards carry separate phase sections for split modules.
    pub const fn is_split_phase(self) -> bool {
        matches!(self, Self::FastTrack)
    }
}

/// Small-business program variant; the two differ in effort allocation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramType {
    Sbir,
    Sttr,
}

impl ProgramType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sbir => "SBIR",
            Self::Sttr => "STTR",
        }
    }
}

/// Active phase of a combined-phase project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Phase1,
    Phase2,
}

impl Phase {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Phase1 => "phase1",
            Self::Phase2 => "phase2",
        }
    }

    pub const fn slot(self) -> PhaseSlot {
        match self {
            Self::Phase1 => PhaseSlot::Phase1,
            Self::Phase2 => PhaseSlot::Phase2,
        }
    }
}

/// Section of a split module being addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseSlot {
    Phase1,
    Phase2,
    Shared,
}

impl PhaseSlot {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Phase1 => "phase1",
            Self::Phase2 => "phase2",
            Self::Shared => "shared",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    #[default]
    Error,
    Critical,
}

impl Severity {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    /// Errors and critical violations both hold the application back from "ready".
    pub const fn blocks_readiness(self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }
}

/// A rule violation reported as data rather than raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default)]
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        field: Option<String>,
        severity: Severity,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field,
            severity,
        }
    }

    pub fn critical(code: &str, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, Some(field.into()), Severity::Critical)
    }

    pub fn error(code: &str, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, Some(field.into()), Severity::Error)
    }

    pub fn warning(code: &str, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, Some(field.into()), Severity::Warning)
    }
}

/// Loosely typed value captured by a module form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Number(f64),
    Text(String),
    List(Vec<FieldValue>),
    Record(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Zero and `false` are answers; blank text, empty lists and empty records are not.
    pub fn is_populated(&self) -> bool {
        match self {
            FieldValue::Null => false,
            FieldValue::Boolean(_) | FieldValue::Number(_) => true,
            FieldValue::Text(text) => !text.trim().is_empty(),
            FieldValue::List(items) => !items.is_empty(),
            FieldValue::Record(fields) => !fields.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Flatten the value into prose for the narrative handed to the compliance scorer.
    pub(crate) fn collect_text(&self, out: &mut Vec<String>) {
        match self {
            FieldValue::Text(text) if !text.trim().is_empty() => out.push(text.trim().to_string()),
            FieldValue::List(items) => items.iter().for_each(|item| item.collect_text(out)),
            FieldValue::Record(fields) => fields.values().for_each(|value| value.collect_text(out)),
            _ => {}
        }
    }
}

/// Content block of a single module or phase section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleBlock(BTreeMap<String, FieldValue>);

impl ModuleBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: FieldValue) -> Self {
        self.0.insert(field.to_string(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.0.insert(field.into(), value);
    }

    pub fn is_populated(&self, field: &str) -> bool {
        self.0
            .get(field)
            .map(FieldValue::is_populated)
            .unwrap_or(false)
    }

    pub fn has_content(&self) -> bool {
        self.0.values().any(FieldValue::is_populated)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn apply(&mut self, patch: &ModulePatch) {
        for field in &patch.clear {
            self.0.remove(field);
        }
        for (field, value) in &patch.set {
            self.0.insert(field.clone(), value.clone());
        }
    }
}

/// Explicit change set applied to an owned module block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModulePatch {
    #[serde(default)]
    pub set: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub clear: Vec<String>,
}

impl ModulePatch {
    pub fn set(mut self, field: &str, value: FieldValue) -> Self {
        self.set.insert(field.to_string(), value);
        self
    }

    pub fn clear(mut self, field: &str) -> Self {
        self.clear.push(field.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populated_rules_follow_value_shape() {
        assert!(!FieldValue::text("   ").is_populated());
        assert!(FieldValue::text("aim").is_populated());
        assert!(FieldValue::Number(0.0).is_populated());
        assert!(FieldValue::Boolean(false).is_populated());
        assert!(!FieldValue::List(Vec::new()).is_populated());
        assert!(!FieldValue::Record(BTreeMap::new()).is_populated());
        assert!(!FieldValue::Null.is_populated());
    }

    #[test]
    fn unset_severity_defaults_to_error() {
        let issue: ValidationIssue =
            serde_json::from_str(r#"{"code":"x","message":"m"}"#).expect("issue parses");
        assert_eq!(issue.severity, Severity::Error);
        assert!(issue.severity.blocks_readiness());
    }

    #[test]
    fn patch_clears_before_setting() {
        let mut block = ModuleBlock::new().with("methods", FieldValue::text("old"));
        block.apply(
            &ModulePatch::default()
                .clear("methods")
                .set("timeline", FieldValue::text("24 months")),
        );
        assert!(block.get("methods").is_none());
        assert!(block.is_populated("timeline"));
    }

    #[test]
    fn grant_type_codes_round_trip() {
        assert_eq!(GrantType::from_code("Fast-Track"), Some(GrantType::FastTrack));
        assert_eq!(GrantType::from_code("phase_iib"), Some(GrantType::PhaseIIB));
        assert_eq!(GrantType::from_code("phase iii"), None);
    }
}

//! Storage contract and the versioned record codec.
//!
//! Projects are stored as one opaque JSON record tagged with `schema_version`. Records
//! written before module blocks were keyed by id are flattened into the current shape on
//! load, and single-worksheet budgets from version 2 are split into per-phase worksheets.
//! There is no downgrade path.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::domain::{GrantType, ProjectId};
use super::project::Project;
use super::registry::ModuleKind;

pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Storage abstraction so the service can be exercised in isolation.
pub trait ProjectRepository: Send + Sync {
    fn insert(&self, project: Project) -> Result<Project, RepositoryError>;
    fn update(&self, project: Project) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError>;
    fn list(&self) -> Result<Vec<ProjectSummary>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("stored record is unreadable: {0}")]
    Corrupt(#[from] PersistenceError),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("project record must be a JSON object")]
    NotAnObject,
    #[error("schema version {found} is newer than supported version {}", CURRENT_SCHEMA_VERSION)]
    UnsupportedVersion { found: u64 },
    #[error("project record does not match the current schema: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Listing view of a stored project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub name: String,
    pub grant_type: Option<GrantType>,
    pub last_compliance_score: Option<u8>,
    pub last_agency_alignment_score: Option<u8>,
}

impl From<&Project> for ProjectSummary {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id().clone(),
            name: project.name().to_string(),
            grant_type: project.grant_type(),
            last_compliance_score: project.last_compliance_score(),
            last_agency_alignment_score: project.last_agency_alignment_score(),
        }
    }
}

pub fn encode_project(project: &Project) -> Result<Value, PersistenceError> {
    Ok(serde_json::to_value(project)?)
}

/// Decode a stored record, upgrading older schema versions first.
pub fn decode_project(record: Value) -> Result<Project, PersistenceError> {
    let upgraded = upgrade_record(record)?;
    Ok(serde_json::from_value(upgraded)?)
}

/// Rewrite a record into the current schema. A missing version tag means version 1.
pub fn upgrade_record(record: Value) -> Result<Value, PersistenceError> {
    let Value::Object(mut fields) = record else {
        return Err(PersistenceError::NotAnObject);
    };

    let version = fields
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(1);
    if version > u64::from(CURRENT_SCHEMA_VERSION) {
        return Err(PersistenceError::UnsupportedVersion { found: version });
    }
    if version < 2 {
        upgrade_v1(&mut fields);
    }
    if version < 3 {
        upgrade_v2(&mut fields);
    }

    fields.insert(
        "schema_version".to_string(),
        Value::from(CURRENT_SCHEMA_VERSION),
    );
    Ok(Value::Object(fields))
}

/// v1 kept each module under a top-level `module_N` key and aims as a list of strings.
fn upgrade_v1(fields: &mut Map<String, Value>) {
    let mut modules = match fields.remove("modules") {
        Some(Value::Object(existing)) => existing,
        _ => Map::new(),
    };

    for kind in ModuleKind::ordered() {
        let id = kind.id();
        if let Some(Value::Object(block)) = fields.remove(&format!("module_{id}")) {
            let target = modules
                .entry(id.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(target) = target {
                for (field, value) in block {
                    target.entry(field).or_insert(value);
                }
            }
        }
    }

    if let Some(Value::Array(statements)) = fields.remove("specific_aims") {
        let aims: Vec<Value> = statements
            .into_iter()
            .filter_map(|statement| match statement {
                Value::String(text) if !text.trim().is_empty() => {
                    let mut aim = Map::new();
                    aim.insert("statement".to_string(), Value::String(text));
                    Some(Value::Object(aim))
                }
                _ => None,
            })
            .collect();

        let target = modules
            .entry(ModuleKind::SpecificAims.id().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(target) = target {
            let has_aims = target
                .get("aims")
                .and_then(Value::as_array)
                .map(|existing| !existing.is_empty())
                .unwrap_or(false);
            if !has_aims && !aims.is_empty() {
                target.insert("aims".to_string(), Value::Array(aims));
            }
        }
    }

    fields.insert("modules".to_string(), Value::Object(modules));
}

/// v2 held one worksheet with its own `active_phase`; it becomes the worksheet of that phase.
fn upgrade_v2(fields: &mut Map<String, Value>) {
    let Some(Value::Object(mut worksheet)) = fields.remove("budget") else {
        return;
    };
    let fast_track = fields.get("grant_type").and_then(Value::as_str) == Some("fast_track");
    let active_phase = match worksheet.remove("active_phase") {
        Some(phase) if fast_track => phase,
        _ => Value::Null,
    };
    let slot = if active_phase.as_str() == Some("phase2") {
        "phase2"
    } else {
        "primary"
    };

    let mut worksheets = Map::new();
    worksheets.insert("active_phase".to_string(), active_phase);
    worksheets.insert(slot.to_string(), Value::Object(worksheet));
    fields.insert("budget".to_string(), Value::Object(worksheets));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::grant::domain::FieldValue;
    use crate::workflows::grant::registry::ModuleId;
    use serde_json::json;

    fn v1_record() -> Value {
        json!({
            "id": "grant-legacy",
            "name": "Legacy assay",
            "grant_type": "phase_i",
            "program_type": "sbir",
            "institute": "NCI",
            "module_1": { "project_title": "Point-of-care sepsis assay" },
            "module_2": { "central_hypothesis": "Lactate kinetics predict sepsis" },
            "specific_aims": ["Validate the assay", "  "]
        })
    }

    #[test]
    fn v1_modules_move_under_modules_map() {
        let project = decode_project(v1_record()).expect("v1 upgrades");

        assert_eq!(project.schema_version(), CURRENT_SCHEMA_VERSION);
        let title = project.module(ModuleId(1)).expect("module 1 present");
        assert_eq!(
            title.get("project_title"),
            Some(&FieldValue::text("Point-of-care sepsis assay"))
        );

        let aims = project
            .module(ModuleId(2))
            .and_then(|block| block.get("aims"))
            .and_then(FieldValue::as_list)
            .expect("aims upgraded");
        assert_eq!(aims.len(), 1);
    }

    #[test]
    fn v2_worksheet_moves_into_its_phase() {
        let record = json!({
            "id": "grant-fast",
            "schema_version": 2,
            "name": "Fast-Track assay",
            "grant_type": "fast_track",
            "program_type": "sbir",
            "institute": "NCI",
            "budget": {
                "active_phase": "phase2",
                "line_items": [
                    { "id": "li-1", "category": "personnel", "description": "", "amount": 500000 }
                ]
            }
        });

        let upgraded = upgrade_record(record).expect("v2 upgrades");
        assert_eq!(upgraded["schema_version"], json!(3));
        assert_eq!(upgraded["budget"]["active_phase"], json!("phase2"));
        assert_eq!(upgraded["budget"]["phase2"]["line_items"][0]["amount"], json!(500000));
        assert!(upgraded["budget"].get("primary").is_none());

        let project = decode_project(upgraded).expect("decodes");
        assert!(!project.budget_worksheets().primary.has_entries());
        assert_eq!(project.budget().line_items.len(), 1);
    }

    #[test]
    fn v2_single_phase_worksheet_becomes_primary() {
        let record = json!({
            "id": "grant-single",
            "schema_version": 2,
            "name": "Feasibility assay",
            "grant_type": "phase_i",
            "program_type": "sbir",
            "institute": "NCI",
            "budget": { "active_phase": "phase1", "line_items": [] }
        });

        let upgraded = upgrade_record(record).expect("v2 upgrades");
        assert_eq!(upgraded["budget"]["active_phase"], Value::Null);
        assert!(upgraded["budget"]["primary"].is_object());
    }

    #[test]
    fn newer_versions_are_rejected() {
        let mut record = v1_record();
        record["schema_version"] = json!(7);
        assert!(matches!(
            upgrade_record(record),
            Err(PersistenceError::UnsupportedVersion { found: 7 })
        ));
    }

    #[test]
    fn current_records_round_trip_through_codec() {
        let project = decode_project(v1_record()).expect("v1 upgrades");
        let encoded = encode_project(&project).expect("encodes");
        assert_eq!(encoded["schema_version"], json!(CURRENT_SCHEMA_VERSION));
        assert_eq!(decode_project(encoded).expect("decodes"), project);
    }
}

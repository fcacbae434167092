//! Compliance audit contract, the append-only audit trail, and the export gate.
//!
//! Scoring is delegated to a `ComplianceScorer` collaborator. A run either appends exactly
//! one entry or leaves the project untouched. Export eligibility is read from the latest
//! whole-project check and only honoured while the content fingerprint recorded with it
//! still matches the project.

mod rubric;

pub use rubric::RubricComplianceScorer;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::budget::{allocation_scope, BudgetWorksheets, EffortAllocation};
use super::domain::{
    GrantType, ModuleBlock, Phase, PhaseSlot, ProgramType, Severity, ValidationIssue,
};
use super::error::ProjectError;
use super::lifecycle::{FeasibilityEvidence, PriorPhaseEvidence};
use super::overlay::{resolve_effective_block, OverlayPolicy, PhaseOverlays};
use super::project::{BudgetScope, FundingOpportunity, FundingOpportunityOverrides, Project};
use super::registry::{ModuleId, ModuleKind};
use super::rules::ComplianceRules;

pub const COMPLIANCE_EXPORT_THRESHOLD: u8 = 90;
pub const ALIGNMENT_EXPORT_THRESHOLD: u8 = 100;

/// Content quality scorecard; each component is clamped to its ceiling when totalled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceScore {
    pub structure: u8,
    pub statistical: u8,
    pub regulatory: u8,
    pub commercial: u8,
    pub tone: u8,
}

impl ComplianceScore {
    pub fn total(&self) -> u8 {
        self.structure.min(30)
            + self.statistical.min(20)
            + self.regulatory.min(20)
            + self.commercial.min(20)
            + self.tone.min(10)
    }
}

/// Fit with the institute and funding opportunity; 25 points per component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyAlignmentScore {
    pub budget: u8,
    pub allocation: u8,
    pub funding_opportunity: u8,
    pub clinical_trial: u8,
}

impl AgencyAlignmentScore {
    pub fn total(&self) -> u8 {
        self.budget.min(25)
            + self.allocation.min(25)
            + self.funding_opportunity.min(25)
            + self.clinical_trial.min(25)
    }
}

/// One rubric line, kept so an audit can be explained after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreNote {
    pub component: String,
    pub points: u8,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceAuditResult {
    pub compliance: ComplianceScore,
    pub alignment: AgencyAlignmentScore,
    #[serde(default)]
    pub issues: Vec<ValidationIssue>,
    #[serde(default)]
    pub notes: Vec<ScoreNote>,
}

impl ComplianceAuditResult {
    pub fn critical_issue_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Critical)
            .count()
    }

    pub fn export_allowed(&self) -> bool {
        self.compliance.total() >= COMPLIANCE_EXPORT_THRESHOLD
            && self.alignment.total() >= ALIGNMENT_EXPORT_THRESHOLD
            && self.critical_issue_count() == 0
    }
}

/// Facts about the project the scorer needs besides the narrative text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceContext {
    pub institute: String,
    pub grant_type: Option<GrantType>,
    pub program_type: ProgramType,
    pub direct_costs: i64,
    pub budget_cap: Option<i64>,
    pub allocation: EffortAllocation,
    pub allocation_scope: Phase,
    pub clinical_trial: bool,
    pub funding_opportunity_id: Option<String>,
    pub overrides: FundingOpportunityOverrides,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoringError {
    #[error("compliance scorer unavailable: {0}")]
    Unavailable(String),
    #[error("compliance scorer returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// External scoring collaborator. Called once per audit run, never retried.
pub trait ComplianceScorer: Send + Sync {
    fn score(
        &self,
        content: &str,
        context: &ComplianceContext,
        section_types: &[String],
    ) -> Result<ComplianceAuditResult, ScoringError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Check,
    ExportBlocked,
    ExportSuccess,
    Revision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceAuditEntry {
    pub recorded_at: DateTime<Utc>,
    pub module_id: Option<ModuleId>,
    pub section_type: Option<String>,
    pub action: AuditAction,
    pub compliance_score: u8,
    pub agency_alignment_score: u8,
    pub issues: Vec<ValidationIssue>,
    pub passed: bool,
    pub content_fingerprint: String,
}

/// Append-only list of audit entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditTrail(Vec<ComplianceAuditEntry>);

impl AuditTrail {
    pub(crate) fn append(&mut self, entry: ComplianceAuditEntry) -> &ComplianceAuditEntry {
        self.0.push(entry);
        &self.0[self.0.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComplianceAuditEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Most recent whole-project check; the only entry kind the export gate consults.
    pub fn latest_check(&self) -> Option<&ComplianceAuditEntry> {
        self.0
            .iter()
            .rev()
            .find(|entry| entry.action == AuditAction::Check)
    }
}

/// Scope of an audit run. A module or section filter turns the run into a revision pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRequest {
    #[serde(default)]
    pub module_id: Option<ModuleId>,
    #[serde(default)]
    pub section_types: Vec<String>,
}

impl AuditRequest {
    pub fn is_scoped(&self) -> bool {
        self.module_id.is_some() || !self.section_types.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error("content fingerprint could not be computed: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

/// Recorded entry plus the scorer's full result for callers that want the rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub entry: ComplianceAuditEntry,
    pub result: ComplianceAuditResult,
}

/// Concatenate the populated module narrative handed to the scorer.
pub fn narrative_content(
    project: &Project,
    policy: &OverlayPolicy,
    only: Option<ModuleId>,
) -> String {
    let mut sections = Vec::new();
    for kind in ModuleKind::ordered() {
        if only.map(|id| id != kind.id()).unwrap_or(false) {
            continue;
        }

        let mut lines = Vec::new();
        let resolved = resolve_effective_block(project, kind, policy);
        collect_block(&resolved.block, &mut lines);
        if let Some(module) = kind.split().filter(|_| project.is_split_phase()) {
            collect_block(project.overlays().section_data(module, PhaseSlot::Phase2), &mut lines);
        }
        lines.dedup();

        if !lines.is_empty() {
            sections.push(format!("## {}\n{}", kind.definition().name, lines.join("\n")));
        }
    }
    sections.join("\n\n")
}

fn collect_block(block: &ModuleBlock, lines: &mut Vec<String>) {
    for (_, value) in block.fields() {
        value.collect_text(lines);
    }
}

/// The worksheet with the least headroom under its cap; an unresolved cap ranks first.
fn tightest_budget(scopes: Vec<BudgetScope<'_>>) -> Option<(i64, BudgetScope<'_>)> {
    scopes
        .into_iter()
        .map(|scope| (scope.worksheet.calculate().total_direct_costs, scope))
        .max_by_key(|(direct_costs, scope)| match &scope.cap {
            Ok(cap) => direct_costs.saturating_sub(*cap),
            Err(_) => i64::MAX,
        })
}

pub fn compliance_context(project: &Project, rules: &ComplianceRules) -> ComplianceContext {
    let (direct_costs, budget_cap, allocation, scope) =
        match tightest_budget(project.budget_scopes(rules)) {
            Some((direct_costs, scope)) => (
                direct_costs,
                scope.cap.ok(),
                scope.worksheet.allocation,
                scope.allocation_scope,
            ),
            None => (
                0,
                None,
                EffortAllocation::default(),
                allocation_scope(project.grant_type(), None),
            ),
        };
    let funding_opportunity = project.funding_opportunity();

    ComplianceContext {
        institute: project.institute().to_string(),
        grant_type: project.grant_type(),
        program_type: project.program_type(),
        direct_costs,
        budget_cap,
        allocation,
        allocation_scope: scope,
        clinical_trial: project.clinical_trial(),
        funding_opportunity_id: funding_opportunity.identifier.clone(),
        overrides: funding_opportunity.overrides.clone(),
    }
}

#[derive(Serialize)]
struct FingerprintView<'a> {
    grant_type: Option<GrantType>,
    program_type: ProgramType,
    institute: &'a str,
    funding_opportunity: &'a FundingOpportunity,
    clinical_trial: bool,
    modules: &'a BTreeMap<ModuleId, ModuleBlock>,
    overlays: &'a PhaseOverlays,
    prior_phase: &'a PriorPhaseEvidence,
    feasibility_evidence: &'a FeasibilityEvidence,
    budget: &'a BudgetWorksheets,
}

/// SHA-256 over the canonical JSON of everything an audit scores.
pub fn content_fingerprint(project: &Project) -> Result<String, serde_json::Error> {
    let view = FingerprintView {
        grant_type: project.grant_type(),
        program_type: project.program_type(),
        institute: project.institute(),
        funding_opportunity: project.funding_opportunity(),
        clinical_trial: project.clinical_trial(),
        modules: project.modules(),
        overlays: project.overlays(),
        prior_phase: project.prior_phase(),
        feasibility_evidence: project.feasibility_evidence(),
        budget: project.budget_worksheets(),
    };

    let mut hasher = Sha256::new();
    serde_json::to_writer(&mut hasher, &view)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Score the project once and append the resulting entry. On any error nothing is written.
pub fn run_compliance_audit<S>(
    project: &mut Project,
    scorer: &S,
    rules: &ComplianceRules,
    request: &AuditRequest,
    now: DateTime<Utc>,
) -> Result<AuditOutcome, AuditError>
where
    S: ComplianceScorer + ?Sized,
{
    if let Some(id) = request.module_id {
        if ModuleKind::from_id(id).is_none() {
            return Err(ProjectError::UnknownModule(id).into());
        }
    }

    let content = narrative_content(project, &rules.overlay, request.module_id);
    let context = compliance_context(project, rules);
    let fingerprint = content_fingerprint(project)?;

    let result = scorer.score(&content, &context, &request.section_types)?;

    let action = if request.is_scoped() {
        AuditAction::Revision
    } else {
        AuditAction::Check
    };
    let entry = ComplianceAuditEntry {
        recorded_at: now,
        module_id: request.module_id,
        section_type: (!request.section_types.is_empty()).then(|| request.section_types.join(",")),
        action,
        compliance_score: result.compliance.total(),
        agency_alignment_score: result.alignment.total(),
        issues: result.issues.clone(),
        passed: result.export_allowed(),
        content_fingerprint: fingerprint,
    };

    let entry = project.record_audit(entry).clone();
    Ok(AuditOutcome { entry, result })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEligibility {
    pub allowed: bool,
    pub reason: String,
    pub compliance_score: Option<u8>,
    pub agency_alignment_score: Option<u8>,
}

/// Export gate: latest check must pass and still describe the current content.
pub fn can_export_project(project: &Project) -> ExportEligibility {
    let Some(check) = project.audit_trail().latest_check() else {
        return ExportEligibility {
            allowed: false,
            reason: "no compliance audit has been run".to_string(),
            compliance_score: None,
            agency_alignment_score: None,
        };
    };

    let blocked = |reason: String| ExportEligibility {
        allowed: false,
        reason,
        compliance_score: Some(check.compliance_score),
        agency_alignment_score: Some(check.agency_alignment_score),
    };

    match content_fingerprint(project) {
        Ok(current) if current == check.content_fingerprint => {}
        Ok(_) => return blocked("content changed since last audit".to_string()),
        Err(error) => return blocked(format!("content fingerprint unavailable: {error}")),
    }

    if check.compliance_score < COMPLIANCE_EXPORT_THRESHOLD {
        return blocked(format!(
            "compliance score {} is below {COMPLIANCE_EXPORT_THRESHOLD}",
            check.compliance_score
        ));
    }
    if check.agency_alignment_score < ALIGNMENT_EXPORT_THRESHOLD {
        return blocked(format!(
            "agency alignment score {} is below {ALIGNMENT_EXPORT_THRESHOLD}",
            check.agency_alignment_score
        ));
    }
    let critical = check
        .issues
        .iter()
        .filter(|issue| issue.severity == Severity::Critical)
        .count();
    if critical > 0 {
        return blocked(format!("{critical} critical issue(s) remain"));
    }

    ExportEligibility {
        allowed: true,
        reason: "latest compliance audit passed".to_string(),
        compliance_score: Some(check.compliance_score),
        agency_alignment_score: Some(check.agency_alignment_score),
    }
}

/// Append the outcome of an export attempt to the trail.
pub fn record_export_attempt(
    project: &mut Project,
    eligibility: &ExportEligibility,
    now: DateTime<Utc>,
) -> Result<ComplianceAuditEntry, AuditError> {
    let fingerprint = content_fingerprint(project)?;
    let (action, issues) = if eligibility.allowed {
        (AuditAction::ExportSuccess, Vec::new())
    } else {
        (
            AuditAction::ExportBlocked,
            vec![ValidationIssue::critical(
                "export_blocked",
                "export",
                eligibility.reason.clone(),
            )],
        )
    };

    let entry = ComplianceAuditEntry {
        recorded_at: now,
        module_id: None,
        section_type: None,
        action,
        compliance_score: eligibility.compliance_score.unwrap_or(0),
        agency_alignment_score: eligibility.agency_alignment_score.unwrap_or(0),
        issues,
        passed: eligibility.allowed,
        content_fingerprint: fingerprint,
    };
    Ok(project.record_audit(entry).clone())
}

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Router,
};
use serde_json::json;

use super::audit::{AuditError, AuditRequest, ComplianceScorer};
use super::budget::{BudgetEdit, BudgetWorksheet};
use super::domain::{ModulePatch, PhaseSlot, ProjectId};
use super::export::ExportError;
use super::persistence::{ProjectRepository, RepositoryError};
use super::project::{EvidenceUpdate, ProjectDraft};
use super::registry::ModuleId;
use super::service::{GrantApplicationService, ServiceError};

type SharedService<R, S> = Arc<GrantApplicationService<R, S>>;

/// Router builder exposing project authoring, validation, audit and export endpoints.
pub fn grant_router<R, S>(service: SharedService<R, S>) -> Router
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    Router::new()
        .route(
            "/api/v1/grants",
            post(create_handler::<R, S>).get(list_handler::<R, S>),
        )
        .route("/api/v1/grants/:project_id", get(get_handler::<R, S>))
        .route(
            "/api/v1/grants/:project_id/modules",
            get(module_states_handler::<R, S>),
        )
        .route(
            "/api/v1/grants/:project_id/modules/:module_id",
            patch(patch_module_handler::<R, S>),
        )
        .route(
            "/api/v1/grants/:project_id/modules/:module_id/phases/:slot",
            patch(patch_phase_handler::<R, S>),
        )
        .route(
            "/api/v1/grants/:project_id/evidence",
            put(evidence_handler::<R, S>),
        )
        .route(
            "/api/v1/grants/:project_id/budget/edits",
            post(budget_edit_handler::<R, S>),
        )
        .route(
            "/api/v1/grants/:project_id/validation",
            get(validation_handler::<R, S>),
        )
        .route(
            "/api/v1/grants/:project_id/audits",
            post(audit_handler::<R, S>),
        )
        .route(
            "/api/v1/grants/:project_id/export-eligibility",
            get(eligibility_handler::<R, S>),
        )
        .route(
            "/api/v1/grants/:project_id/export",
            post(export_handler::<R, S>),
        )
        .route("/api/v1/budget/calculate", post(calculate_handler))
        .with_state(service)
}

pub(crate) async fn create_handler<R, S>(
    State(service): State<SharedService<R, S>>,
    axum::Json(draft): axum::Json<ProjectDraft>,
) -> Response
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    match service.create(draft) {
        Ok(project) => (StatusCode::CREATED, axum::Json(project)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn list_handler<R, S>(State(service): State<SharedService<R, S>>) -> Response
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    respond(service.list())
}

pub(crate) async fn get_handler<R, S>(
    State(service): State<SharedService<R, S>>,
    Path(project_id): Path<String>,
) -> Response
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    respond(service.get(&ProjectId(project_id)))
}

pub(crate) async fn module_states_handler<R, S>(
    State(service): State<SharedService<R, S>>,
    Path(project_id): Path<String>,
) -> Response
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    respond(service.module_states(&ProjectId(project_id)))
}

pub(crate) async fn patch_module_handler<R, S>(
    State(service): State<SharedService<R, S>>,
    Path((project_id, module_id)): Path<(String, u8)>,
    axum::Json(patch): axum::Json<ModulePatch>,
) -> Response
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    respond(service.patch_module(&ProjectId(project_id), ModuleId(module_id), &patch))
}

pub(crate) async fn patch_phase_handler<R, S>(
    State(service): State<SharedService<R, S>>,
    Path((project_id, module_id, slot)): Path<(String, u8, PhaseSlot)>,
    axum::Json(patch): axum::Json<ModulePatch>,
) -> Response
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    respond(service.patch_phase(&ProjectId(project_id), ModuleId(module_id), slot, &patch))
}

pub(crate) async fn evidence_handler<R, S>(
    State(service): State<SharedService<R, S>>,
    Path(project_id): Path<String>,
    axum::Json(update): axum::Json<EvidenceUpdate>,
) -> Response
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    respond(service.update_evidence(&ProjectId(project_id), update))
}

pub(crate) async fn budget_edit_handler<R, S>(
    State(service): State<SharedService<R, S>>,
    Path(project_id): Path<String>,
    axum::Json(edit): axum::Json<BudgetEdit>,
) -> Response
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    respond(service.apply_budget_edit(&ProjectId(project_id), &edit))
}

pub(crate) async fn validation_handler<R, S>(
    State(service): State<SharedService<R, S>>,
    Path(project_id): Path<String>,
) -> Response
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    respond(service.validate(&ProjectId(project_id)))
}

pub(crate) async fn audit_handler<R, S>(
    State(service): State<SharedService<R, S>>,
    Path(project_id): Path<String>,
    axum::Json(request): axum::Json<AuditRequest>,
) -> Response
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    respond(service.run_audit(&ProjectId(project_id), &request))
}

pub(crate) async fn eligibility_handler<R, S>(
    State(service): State<SharedService<R, S>>,
    Path(project_id): Path<String>,
) -> Response
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    respond(service.export_eligibility(&ProjectId(project_id)))
}

pub(crate) async fn export_handler<R, S>(
    State(service): State<SharedService<R, S>>,
    Path(project_id): Path<String>,
) -> Response
where
    R: ProjectRepository + 'static,
    S: ComplianceScorer + 'static,
{
    respond(service.export(&ProjectId(project_id)))
}

/// Stateless calculation over a worksheet that is not attached to any project.
pub(crate) async fn calculate_handler(
    axum::Json(worksheet): axum::Json<BudgetWorksheet>,
) -> Response {
    if let Err(error) = worksheet.check_amounts() {
        return error_response(ServiceError::Project(error));
    }
    (StatusCode::OK, axum::Json(worksheet.calculate())).into_response()
}

fn respond<T: serde::Serialize>(result: Result<T, ServiceError>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, axum::Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

fn error_response(error: ServiceError) -> Response {
    let status = match &error {
        ServiceError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        ServiceError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        ServiceError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ServiceError::Audit(AuditError::Scoring(_)) => StatusCode::BAD_GATEWAY,
        ServiceError::Audit(AuditError::Fingerprint(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        ServiceError::Export(ExportError::Encode(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        ServiceError::Project(_)
        | ServiceError::Lifecycle(_)
        | ServiceError::Audit(AuditError::Project(_))
        | ServiceError::Export(ExportError::Blocked { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    let payload = json!({
        "error": error.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}

use grantready::workflows::grant::{
    decode_project, encode_project, GrantType, Project, ProjectId, ProjectRepository,
    ProjectSummary, RepositoryError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Holds encoded project records, so every read goes through the schema upgrade path.
#[derive(Default, Clone)]
pub(crate) struct InMemoryProjectRepository {
    records: Arc<Mutex<HashMap<ProjectId, Value>>>,
}

impl InMemoryProjectRepository {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ProjectId, Value>>, RepositoryError> {
        self.records
            .lock()
            .map_err(|_| RepositoryError::Unavailable("repository mutex poisoned".to_string()))
    }
}

impl ProjectRepository for InMemoryProjectRepository {
    fn insert(&self, project: Project) -> Result<Project, RepositoryError> {
        let mut guard = self.lock()?;
        if guard.contains_key(project.id()) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(project.id().clone(), encode_project(&project)?);
        Ok(project)
    }

    fn update(&self, project: Project) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        if guard.contains_key(project.id()) {
            guard.insert(project.id().clone(), encode_project(&project)?);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let guard = self.lock()?;
        match guard.get(id) {
            Some(record) => Ok(Some(decode_project(record.clone())?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<ProjectSummary>, RepositoryError> {
        let guard = self.lock()?;
        let mut summaries = guard
            .values()
            .map(|record| decode_project(record.clone()).map(|project| ProjectSummary::from(&project)))
            .collect::<Result<Vec<_>, _>>()?;
        summaries.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(summaries)
    }
}

pub(crate) fn parse_grant_type(raw: &str) -> Result<GrantType, String> {
    GrantType::from_code(raw).ok_or_else(|| {
        let known: Vec<&str> = GrantType::ordered()
            .into_iter()
            .map(GrantType::code)
            .collect();
        format!("unknown grant type '{raw}' (expected one of {})", known.join(", "))
    })
}

use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryProjectRepository};
use crate::routes::with_grant_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use grantready::config::AppConfig;
use grantready::error::AppError;
use grantready::telemetry;
use grantready::workflows::grant::{GrantApplicationService, RubricComplianceScorer};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let rules = config.engine.rules()?;
    info!(
        institutes = rules.catalog.institutes().count(),
        legacy_aims_fallback = rules.overlay.legacy_aims_fallback,
        "compliance rules loaded"
    );

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let repository = Arc::new(InMemoryProjectRepository::default());
    let grant_service = Arc::new(GrantApplicationService::new(
        repository,
        Arc::new(RubricComplianceScorer),
        rules,
    ));

    let app = with_grant_routes(grant_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "grant compliance engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}

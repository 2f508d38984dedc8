use std::net::SocketAddr;

use axum::Router;
use dosegate_core::config::LayerConfig;
use dosegate_runtime::Orchestrator;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod error;
mod middleware;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Dosegate API",
        version = "0.1.0",
        description = "Safety and audit layer between a closed-loop dose proposer and the pump. One process serves one patient session."
    ),
    paths(
        routes::health::health_check,
        routes::tick::evaluate_tick,
        routes::audit::audit_status,
    ),
    components(schemas(
        HealthResponse,
        routes::tick::TickRequest,
        dosegate_core::error::ApiError,
        dosegate_core::decision::ProposedDose,
        dosegate_core::decision::ModulatedDecision,
        dosegate_core::context::TickContext,
        dosegate_core::context::GlucoseSnapshot,
        dosegate_core::context::DoseContext,
        dosegate_core::context::PkpdStage,
        dosegate_core::hypo_guard::HypoCheck,
        dosegate_core::hypo_guard::HypoState,
        dosegate_core::safety::SafetyScore,
        dosegate_core::sentinel::SentinelAdvice,
        dosegate_core::sentinel::SentinelReason,
        dosegate_core::sentinel::Tier,
        dosegate_core::status::AuditStatus,
        dosegate_core::status::SkipReason,
        dosegate_core::status::OfflineReason,
        dosegate_core::status::ErrorCategory,
        dosegate_core::status::AuditImpact,
        dosegate_core::verdict::AuditorVerdict,
        dosegate_core::verdict::VerdictKind,
        dosegate_core::verdict::RiskFlag,
        dosegate_core::verdict::BoundedAdjustments,
        dosegate_core::modulation::ModulationMode,
        dosegate_core::rate_limit::RateLimitState,
        dosegate_runtime::TickOutcome,
        dosegate_runtime::StatusRecord,
        dosegate_runtime::AuditSnapshot,
        dosegate_runtime::cache::CachedVerdict,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub mode: String,
    pub auditor_configured: bool,
}

fn app(state: state::AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::tick::router().layer(middleware::rate_limit::tick_layer()))
        .merge(routes::audit::router().layer(middleware::rate_limit::status_layer()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "dosegate_api=debug,dosegate_runtime=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = LayerConfig::from_env()?;
    tracing::info!(
        enabled = config.enabled,
        mode = config.mode.as_str(),
        auditor_configured = config.auditor.is_configured(),
        "config_loaded"
    );

    let orchestrator = Orchestrator::from_config(config)?;
    let app = app(state::AppState::new(orchestrator));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Dosegate API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

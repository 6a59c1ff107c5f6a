use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use ipre_core::config::{EngineOptions, Settings};
use ipre_core::domain::recommendation::Recommendation;
use ipre_core::engine::RecommendationEngine;
use ipre_core::error::EngineError;
use ipre_core::stats::{BasicStats, DetailedStats, PriceHistory, DEFAULT_HISTORY_MONTHS};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let options = EngineOptions::from_env()?;
    let pool = connect_pool(&settings).await;
    let engine = RecommendationEngine::from_settings(&settings, options, pool)?;

    let state = AppState {
        engine: Arc::new(engine),
        settings: Arc::new(settings),
    };
    let app = build_router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Postgres is optional: without it predicted preferences come from the blob store.
async fn connect_pool(settings: &Settings) -> Option<PgPool> {
    let db_url = settings.database_url.as_deref()?;
    match sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
    {
        Ok(pool) => match ipre_core::storage::migrate(&pool).await {
            Ok(()) => Some(pool),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "db migrations failed; risk preferences fall back to blob store");
                None
            }
        },
        Err(e) => {
            let err = anyhow::Error::new(e);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "db connect failed; risk preferences fall back to blob store");
            None
        }
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(recommend))
        .route("/healthz", get(healthz))
        .route("/stat/", get(basic_stat))
        .route("/stat/detailed/", get(detailed_stat))
        .route("/stat/history/", get(history_stat))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    engine: Arc<RecommendationEngine>,
    settings: Arc<Settings>,
}

#[derive(Debug)]
enum ApiError {
    BadRequest(&'static str),
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Engine(e) => {
                let status = match &e {
                    EngineError::Validation(_) => StatusCode::BAD_REQUEST,
                    EngineError::DataUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let body = e.to_string();
                if status.is_server_error() {
                    tracing::error!(kind = e.kind(), error = %body, "request failed");
                    sentry_anyhow::capture_anyhow(&anyhow::Error::new(e));
                }
                (status, body).into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecommendQuery {
    uuid: Option<String>,
    #[serde(rename = "riskAversion")]
    risk_aversion: Option<String>,
}

async fn recommend(
    State(state): State<AppState>,
    Query(q): Query<RecommendQuery>,
) -> Result<Json<Recommendation>, ApiError> {
    let Some(user_id) = q.uuid.filter(|u| !u.is_empty()) else {
        return Err(ApiError::BadRequest("UUID is not specified"));
    };
    if !state.settings.is_valid_user(&user_id) {
        return Err(ApiError::BadRequest("Received unexpected UUID"));
    }

    let risk_preference = match q.risk_aversion.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<f64>() {
            Ok(v) if (0.0..=1.0).contains(&v) => Some(v),
            _ => return Err(ApiError::BadRequest("Received invalid risk aversion")),
        },
    };

    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("recommend", %request_id, user_id = %user_id);
    let rec = state
        .engine
        .make_recommendation(&user_id, risk_preference)
        .instrument(span)
        .await?;
    Ok(Json(rec))
}

#[derive(Debug, Deserialize)]
struct StatQuery {
    asset_name: Option<String>,
}

impl StatQuery {
    fn asset(self) -> Result<String, ApiError> {
        self.asset_name
            .filter(|a| !a.is_empty())
            .ok_or(ApiError::BadRequest("Asset name is not specified"))
    }
}

async fn basic_stat(
    State(state): State<AppState>,
    Query(q): Query<StatQuery>,
) -> Result<Json<BasicStats>, ApiError> {
    let asset = q.asset()?;
    Ok(Json(state.engine.basic_stats(&asset).await?))
}

async fn detailed_stat(
    State(state): State<AppState>,
    Query(q): Query<StatQuery>,
) -> Result<Json<DetailedStats>, ApiError> {
    let asset = q.asset()?;
    Ok(Json(state.engine.detailed_stats(&asset).await?))
}

async fn history_stat(
    State(state): State<AppState>,
    Query(q): Query<StatQuery>,
) -> Result<Json<PriceHistory>, ApiError> {
    let asset = q.asset()?;
    Ok(Json(
        state
            .engine
            .price_history(&asset, DEFAULT_HISTORY_MONTHS)
            .await?,
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

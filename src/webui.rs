use crate::analysis::{
    AnalysisEngine, AnalysisRequest, AnalysisResponse, CancellationToken, RiskReport,
    RiskReportRequest,
};
use crate::data::PriceProvider;
use crate::error::AnalysisError;
use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone, Debug, Serialize)]
struct ApiError {
    error: String,
}

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, Json<ApiError>)>;

/// Cancels the evaluation when the handler future is dropped, e.g. because
/// the client disconnected.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

pub fn router<P: PriceProvider + 'static>(engine: Arc<AnalysisEngine<P>>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/allocation", post(allocation::<P>))
        .route("/api/risk", post(risk_report::<P>))
        .with_state(engine)
}

pub async fn run_webui_server<P: PriceProvider + 'static>(
    port: u16,
    engine: AnalysisEngine<P>,
) -> Result<()> {
    let app = router(Arc::new(engine));

    let addr = format!("0.0.0.0:{}", port);
    info!("WebUI listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn allocation<P: PriceProvider + 'static>(
    State(engine): State<Arc<AnalysisEngine<P>>>,
    Json(req): Json<AnalysisRequest>,
) -> ApiResult<AnalysisResponse> {
    let guard = CancelOnDrop(CancellationToken::new());
    let response = engine
        .run_allocation(req, guard.0.clone())
        .await
        .map_err(analysis_err)?;
    Ok(Json(response))
}

async fn risk_report<P: PriceProvider + 'static>(
    State(engine): State<Arc<AnalysisEngine<P>>>,
    Json(req): Json<RiskReportRequest>,
) -> ApiResult<RiskReport> {
    if req.positions.is_empty() {
        return Err(api_err(StatusCode::BAD_REQUEST, "positions cannot be empty"));
    }
    let report = engine.run_risk_report(req).await.map_err(analysis_err)?;
    Ok(Json(report))
}

fn analysis_err(err: AnalysisError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        AnalysisError::InvalidParameters(_) => Some(StatusCode::BAD_REQUEST),
        AnalysisError::InsufficientData { .. } | AnalysisError::InfeasibleParameters { .. } => {
            Some(StatusCode::UNPROCESSABLE_ENTITY)
        }
        AnalysisError::Provider { .. } | AnalysisError::Cancelled => None,
    };
    match status {
        Some(status) => {
            warn!("Rejected request: {}", err);
            api_err(status, &err.to_string())
        }
        None => {
            error!("Request failed: {:#}", anyhow::Error::from(err));
            internal_err("analysis failed; see server log")
        }
    }
}

fn api_err(status: StatusCode, message: &str) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: message.to_string(),
        }),
    )
}

fn internal_err<E: std::fmt::Display>(err: E) -> (StatusCode, Json<ApiError>) {
    api_err(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
}

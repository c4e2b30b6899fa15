/// Liveness, readiness and Prometheus endpoints
///
/// Readiness answers from the media tables and the blob root, the two
/// things an upload needs.
use crate::{
    blob_store::BlobBackend,
    context::AppContext,
    error::{CmsError, CmsResult},
    media::StorageSummary,
    metrics,
};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::json;

/// Readiness report
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub status: &'static str,
    pub version: &'static str,
    pub storage: StorageSummary,
    /// Files under the blob root, including orphans awaiting the sweep
    pub files_on_disk: usize,
}

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(prometheus_metrics))
}

/// Prometheus scrape endpoint
pub async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

pub async fn liveness() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSeconds": metrics::UPTIME_SECONDS.get(),
    }))
}

/// 200 with storage totals when the database and blob root both answer, 503 otherwise
pub async fn readiness(State(ctx): State<AppContext>) -> Response {
    match check_storage(&ctx).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "version": env!("CARGO_PKG_VERSION"),
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

async fn check_storage(ctx: &AppContext) -> CmsResult<Readiness> {
    let storage = ctx.metadata.storage_summary().await?;

    let root = ctx.blob_backend.base_path();
    if !tokio::fs::metadata(root).await?.is_dir() {
        return Err(CmsError::BlobStorage(format!("{:?} is not a directory", root)));
    }
    let files_on_disk = ctx.blob_backend.list().await?.len();

    Ok(Readiness {
        status: "ready",
        version: env!("CARGO_PKG_VERSION"),
        storage,
        files_on_disk,
    })
}

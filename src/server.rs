/// HTTP server setup and routing
use crate::{
    api::middleware::track_http_metrics,
    context::AppContext,
    error::{CmsError, CmsResult},
};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method, StatusCode},
    middleware,
    response::Json,
    Router,
};
use serde_json::json;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Room for multipart boundaries and form fields on top of the file itself
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Build the main application router
/// Returns Router<()> because state is already provided
pub fn build_router(ctx: AppContext) -> Router {
    // Create CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::RANGE]);

    // The engine enforces the exact ceiling; this only bounds buffering
    let body_limit = ctx
        .config
        .storage
        .media
        .max_upload_size
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .merge(crate::api::routes(&ctx.config.storage.media.url_prefix))
        // Provide state - converts Router<AppContext> to Router<()>
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(track_http_metrics))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Start the HTTP server
pub async fn serve(ctx: AppContext) -> CmsResult<()> {
    let addr = format!("{}:{}", ctx.config.service.hostname, ctx.config.service.port);

    info!("CMS media service listening on {}", addr);
    info!("   Service URL: {}", ctx.service_url());
    info!("   Media root: {:?}", ctx.config.storage.media.location);

    let app = build_router(ctx);

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CmsError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    // Axum 0.7: Router<()> can be passed directly to serve
    axum::serve(listener, app)
        .await
        .map_err(|e| CmsError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

/// API routes and handlers
pub mod activities;
pub mod health;
pub mod media;
pub mod middleware;
pub mod storage;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
///
/// Stored files are served under `url_prefix`.
pub fn routes(url_prefix: &str) -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(media::routes())
        .merge(activities::routes())
        .merge(storage::routes(url_prefix))
}

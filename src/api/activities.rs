/// Activity log listing
use crate::{
    activity::{ActivityPage, ActivityQuery},
    auth::AuthContext,
    context::AppContext,
    error::CmsResult,
};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

pub fn routes() -> Router<AppContext> {
    Router::new().route("/api/activities", get(list_activities))
}

/// List activity entries, optionally filtered by `user_id`, `type` and `entity_type`
async fn list_activities(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Query(query): Query<ActivityQuery>,
) -> CmsResult<Json<ActivityPage>> {
    Ok(Json(ctx.activity_log.list(&query).await?))
}

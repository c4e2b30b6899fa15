/// Media upload, listing and release endpoints
use crate::{
    auth::AuthContext,
    context::AppContext,
    error::{CmsError, CmsResult},
    media::{IngestOutcome, IngestRequest, MediaQuery, MediaView},
};
use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::Serialize;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Build media routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/media", get(list_media).post(upload_media))
        .route("/api/media/:id", get(get_media).delete(delete_media))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub media: UploadedMedia,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedMedia {
    #[serde(flatten)]
    pub outcome: IngestOutcome,
    /// Echoed from the form, not stored
    pub alt_text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MediaListResponse {
    pub media: Vec<MediaView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub message: String,
    pub blob_reclaimed: bool,
}

/// Upload a file
///
/// Expects multipart form data with a `file` part and an optional
/// `altText` part.
async fn upload_media(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> CmsResult<Json<UploadResponse>> {
    let limit = ctx.engine.limits().max_upload_size;
    let declared_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    let multipart_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            CmsError::TooLarge {
                size: declared_size.unwrap_or(limit + 1),
                limit,
            }
        } else {
            CmsError::Validation(format!("Invalid multipart body: {}", e))
        }
    };

    let mut file: Option<(String, String, Vec<u8>)> = None;
    let mut alt_text = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("file") => {
                if file.is_some() {
                    return Err(CmsError::Validation(
                        "Only one file may be uploaded per request".to_string(),
                    ));
                }
                let filename = field
                    .file_name()
                    .filter(|name| !name.is_empty())
                    .unwrap_or("upload")
                    .to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_MIME_TYPE)
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((filename, mime_type, bytes.to_vec()));
            }
            Some("altText") => {
                let text = field.text().await.map_err(multipart_error)?;
                alt_text = Some(text).filter(|t| !t.is_empty());
            }
            _ => {}
        }
    }

    let (filename, mime_type, bytes) = file.ok_or(CmsError::MissingFile)?;

    let outcome = ctx
        .engine
        .ingest(IngestRequest {
            bytes,
            mime_type,
            filename,
            owner_id: auth.user_id,
        })
        .await?;

    Ok(Json(UploadResponse {
        message: "File uploaded successfully".to_string(),
        media: UploadedMedia { outcome, alt_text },
    }))
}

/// List media, newest first
async fn list_media(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Query(query): Query<MediaQuery>,
) -> CmsResult<Json<MediaListResponse>> {
    let media = ctx.engine.list(&query).await?;
    Ok(Json(MediaListResponse { media }))
}

async fn get_media(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(id): Path<String>,
) -> CmsResult<Json<MediaView>> {
    ctx.engine
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| CmsError::NotFound(format!("Media file not found: {}", id)))
}

/// Release the caller's media record
async fn delete_media(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> CmsResult<Json<DeleteResponse>> {
    let outcome = ctx.engine.release(&id, &auth.user_id).await?;

    Ok(Json(DeleteResponse {
        message: "Media file deleted successfully".to_string(),
        blob_reclaimed: outcome.blob_reclaimed,
    }))
}

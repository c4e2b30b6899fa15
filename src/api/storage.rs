/// Stored file serving
use crate::{
    context::AppContext,
    error::{CmsError, CmsResult},
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};

const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";

/// Build file serving routes under the configured URL prefix
pub fn routes(url_prefix: &str) -> Router<AppContext> {
    let prefix = url_prefix.trim_end_matches('/');
    Router::new().route(&format!("{}/*path", prefix), get(get_stored_file))
}

/// Serve stored bytes by storage path
///
/// Storage paths are never reused, so the content behind a path never
/// changes and can be cached forever. The content hash is the ETag.
async fn get_stored_file(
    State(ctx): State<AppContext>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> CmsResult<Response> {
    let (blob, data) = ctx
        .engine
        .open(&path)
        .await?
        .ok_or_else(|| CmsError::NotFound(format!("File not found: {}", path)))?;

    let total_size = data.len();
    let etag = format!("\"{}\"", blob.hash);

    // Check If-None-Match header for 304 Not Modified
    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        if if_none_match.split(',').any(|tag| tag.trim() == etag || tag.trim() == "*") {
            return build(
                Response::builder()
                    .status(StatusCode::NOT_MODIFIED)
                    .header(header::ETAG, etag)
                    .header(header::CACHE_CONTROL, IMMUTABLE_CACHE),
                Body::empty(),
            );
        }
    }

    if let Some(range_str) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        if let Some((start, end)) = parse_range(range_str, total_size) {
            let length = end - start + 1;
            let partial_data = data[start..=end].to_vec();

            return build(
                Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_TYPE, &blob.mime_type)
                    .header(header::CONTENT_LENGTH, length.to_string())
                    .header(
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", start, end, total_size),
                    )
                    .header(header::ETAG, etag)
                    .header(header::CACHE_CONTROL, IMMUTABLE_CACHE)
                    .header(header::ACCEPT_RANGES, "bytes"),
                Body::from(partial_data),
            );
        }
    }

    build(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, &blob.mime_type)
            .header(header::CONTENT_LENGTH, total_size.to_string())
            .header(header::ETAG, etag)
            .header(header::CACHE_CONTROL, IMMUTABLE_CACHE)
            .header(header::ACCEPT_RANGES, "bytes"),
        Body::from(data),
    )
}

fn build(builder: axum::http::response::Builder, body: Body) -> CmsResult<Response> {
    builder
        .body(body)
        .map_err(|e| CmsError::Internal(format!("Failed to build response: {}", e)))
}

/// Parse HTTP Range header
///
/// Returns (start, end) inclusive byte positions, or None if invalid
fn parse_range(range_header: &str, total_size: usize) -> Option<(usize, usize)> {
    // Expected format: "bytes=start-end" or "bytes=start-" or "bytes=-suffix"
    let range_spec = range_header.trim().strip_prefix("bytes=")?;
    if total_size == 0 || range_spec.contains(',') {
        return None;
    }

    let (start_str, end_str) = range_spec.split_once('-')?;

    if start_str.is_empty() {
        // Suffix range: "bytes=-500" (last 500 bytes)
        let suffix = end_str.parse::<usize>().ok().filter(|s| *s > 0)?;
        return Some((total_size.saturating_sub(suffix), total_size - 1));
    }

    let start = start_str.parse::<usize>().ok()?;
    if start >= total_size {
        return None;
    }

    if end_str.is_empty() {
        // Open-ended range: "bytes=500-" (from 500 to end)
        return Some((start, total_size - 1));
    }

    let end = end_str.parse::<usize>().ok()?.min(total_size - 1);
    (start <= end).then_some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_complete() {
        assert_eq!(parse_range("bytes=0-499", 1000), Some((0, 499)));
        assert_eq!(parse_range("bytes=500-999", 1000), Some((500, 999)));
    }

    #[test]
    fn test_parse_range_open_ended() {
        assert_eq!(parse_range("bytes=500-", 1000), Some((500, 999)));
        assert_eq!(parse_range("bytes=0-", 1000), Some((0, 999)));
    }

    #[test]
    fn test_parse_range_suffix() {
        assert_eq!(parse_range("bytes=-500", 1000), Some((500, 999)));
        assert_eq!(parse_range("bytes=-5000", 1000), Some((0, 999)));
        assert_eq!(parse_range("bytes=-0", 1000), None);
    }

    #[test]
    fn test_parse_range_clamping() {
        assert_eq!(parse_range("bytes=0-2000", 1000), Some((0, 999)));
        assert_eq!(parse_range("bytes=900-2000", 1000), Some((900, 999)));
    }

    #[test]
    fn test_parse_range_invalid() {
        assert_eq!(parse_range("bytes=invalid", 1000), None);
        assert_eq!(parse_range("bytes=1000-", 1000), None);
        assert_eq!(parse_range("bytes=500-400", 1000), None);
        assert_eq!(parse_range("bytes=0-1,5-9", 1000), None);
        assert_eq!(parse_range("bytes=0-10", 0), None);
        assert_eq!(parse_range("invalid", 1000), None);
    }
}

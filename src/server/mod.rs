//! Thin `axum` demo host wiring the dispatcher onto `*.m3u8`/`*.hls`
//! requests. This is the runnable surface for exercising the core without a
//! real nginx/ingress in front of it — it does not own routing-table
//! configuration, TLS termination, or connection pooling the way a
//! production embedding would.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, RawQuery, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;

use vodstream_media::{dispatch, request, DispatchOutcome, Error, Mp4File, RequestKind};

use crate::telemetry::TelemetrySink;

const VERSION_HEADER_VALUE: &str = "vodstream-1.0";

/// Shared, immutable per-server context. No `Mutex`, no process-wide
/// mutable state — every request opens its own mapping.
#[derive(Clone)]
pub struct AppContext {
    pub media_dir: PathBuf,
    pub default_target_seconds: f64,
    pub telemetry: Arc<dyn TelemetrySink>,
}

/// Builds the demo router: `/health`, plus a single catch-all media route.
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/{filename}", get(media_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

#[tracing::instrument(skip(ctx))]
async fn media_handler(State(ctx): State<AppContext>, Path(filename): Path<String>, RawQuery(query): RawQuery) -> Response {
    let query = query.unwrap_or_default();
    match handle_media_request(&ctx, &filename, &query) {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(diagnostic = %err.diagnostic(), "request failed");
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

fn handle_media_request(ctx: &AppContext, filename: &str, query: &str) -> vodstream_media::Result<Response> {
    let kind = RequestKind::from_path(filename)
        .ok_or_else(|| Error::bad_request(format!("unsupported extension: {filename}")))?;
    let stem = strip_known_extension(filename);
    let options = dispatch::parse_query(query)?;

    // `length=` overrides `target_seconds` for playlists only.
    let target_seconds = match kind {
        RequestKind::Playlist => options.length.map(|l| l as f64).unwrap_or(ctx.default_target_seconds),
        RequestKind::Segment => ctx.default_target_seconds,
    };

    let source_path = ctx.media_dir.join(format!("{stem}.mp4"));
    let mp4 = Mp4File::open(&source_path, target_seconds)?;
    let passthrough = passthrough_query(query);
    let outcome = request::dispatch_request(&mp4, stem, kind, &options, &passthrough)?;

    Ok(match outcome {
        DispatchOutcome::Playlist(body) => {
            let segment_count = mp4.segments().len();
            ctx.telemetry.emit_event(&format!("ios_playlist&segments={segment_count}"), stem, options.hash.as_deref());

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, request::PLAYLIST_CONTENT_TYPE)
                .header("X-Mod-HLS-Version", VERSION_HEADER_VALUE)
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from(body))
                .unwrap()
        }
        DispatchOutcome::Segment(sink) => {
            ctx.telemetry.emit_event("ios_view", stem, options.hash.as_deref());

            let content_length = sink.content_length();
            let body: Vec<u8> = sink.into_chunks().into_iter().flat_map(|chunk| chunk.data).collect();

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, request::SEGMENT_CONTENT_TYPE)
                .header(header::CONTENT_LENGTH, content_length.to_string())
                .header(header::ACCEPT_RANGES, "bytes")
                .header("X-Mod-HLS-Version", VERSION_HEADER_VALUE)
                .body(Body::from(body))
                .unwrap()
        }
    })
}

fn strip_known_extension(filename: &str) -> &str {
    filename.strip_suffix(".m3u8").or_else(|| filename.strip_suffix(".hls")).unwrap_or(filename)
}

/// The request query string, forwarded verbatim onto segment URLs, minus
/// the `video=`/`audio=` keys the playlist writer sets itself per segment.
fn passthrough_query(query: &str) -> String {
    query
        .split('&')
        .filter(|pair| !pair.is_empty() && !pair.starts_with("video=") && !pair.starts_with("audio="))
        .collect::<Vec<_>>()
        .join("&")
}

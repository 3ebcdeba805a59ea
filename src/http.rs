//! axum router and handlers for every endpoint in SPEC_FULL.md §6.

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;

use crate::archive;
use crate::database::{self, AssetQuery, SortKey};
use crate::error::{VaultError, VaultResult};
use crate::ingest::IngestTask;
use crate::read_pipeline;
use crate::state::{AppState, VaultContext};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/create_vault", post(create_vault))
        .route("/api/unlock_vault", post(unlock_vault))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/:id", get(get_project))
        .route("/api/projects/:id/collections", get(list_collections))
        .route("/api/projects/:id/download", get(download_project))
        .route("/api/collections", post(create_collection))
        .route("/api/collections/:id", get(get_collection))
        .route("/api/collections/:id/assets", get(list_assets))
        .route(
            "/api/collections/:id/assets/download",
            post(download_selection),
        )
        .route("/api/collections/:id/download", get(download_collection))
        .route("/api/upload/chunk", post(upload_chunk))
        .route("/api/upload/complete", post(upload_complete))
        .route("/api/assets/:id", get(get_asset))
        .route("/api/assets/:id/preview", get(get_asset_preview))
        .route("/api/maintenance/vacuum", post(vacuum))
        .layer(CompressionLayer::new().gzip(true))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn require_context(state: &AppState) -> VaultResult<VaultContext> {
    state.context().await.ok_or(VaultError::AuthFailed)
}

// --- vault lifecycle --------------------------------------------------

#[derive(Deserialize)]
struct VaultRequest {
    db: String,
    password: String,
}

async fn create_vault(
    State(state): State<AppState>,
    Json(req): Json<VaultRequest>,
) -> VaultResult<impl IntoResponse> {
    state.create(&req.db, &req.password).await?;
    Ok(StatusCode::CREATED)
}

async fn unlock_vault(
    State(state): State<AppState>,
    Json(req): Json<VaultRequest>,
) -> VaultResult<impl IntoResponse> {
    if state.unlock(&req.db, &req.password).await? {
        Ok(StatusCode::OK)
    } else {
        Err(VaultError::AuthFailed)
    }
}

// --- projects -----------------------------------------------------------

async fn list_projects(State(state): State<AppState>) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    Ok(Json(database::list_projects(&ctx.pool).await?))
}

#[derive(Deserialize)]
struct NewProjectRequest {
    name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    description: Option<String>,
}

async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<NewProjectRequest>,
) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    let project = database::create_project(
        &ctx.pool,
        &req.name,
        req.kind.as_deref().unwrap_or("project"),
        req.description.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    let project = database::get_project(&ctx.pool, id)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("project {id}")))?;
    Ok(Json(project))
}

async fn list_collections(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    Ok(Json(database::list_collections_for_project(&ctx.pool, id).await?))
}

async fn download_project(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    let entries = archive::entries_for_project(&ctx.pool, id).await?;
    zip_response(&ctx, entries).await
}

// --- collections ----------------------------------------------------------

#[derive(Deserialize)]
struct NewCollectionRequest {
    project_id: i64,
    name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    parent_id: Option<i64>,
}

async fn create_collection(
    State(state): State<AppState>,
    Json(req): Json<NewCollectionRequest>,
) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    let collection = database::create_collection(
        &ctx.pool,
        req.project_id,
        req.parent_id,
        &req.name,
        req.kind.as_deref().unwrap_or("collection"),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(collection)))
}

async fn get_collection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    let collection = database::get_collection(&ctx.pool, id)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("collection {id}")))?;
    Ok(Json(collection))
}

#[derive(Deserialize)]
struct AssetListQuery {
    #[serde(default)]
    offset: i64,
    #[serde(default = "default_limit")]
    limit: i64,
    query: Option<String>,
    filter_by_type: Option<String>,
    sort_by: Option<String>,
    sort_order: Option<String>,
    tag: Option<String>,
}

fn default_limit() -> i64 {
    50
}

#[derive(Serialize)]
struct AssetListResponse {
    assets: Vec<crate::models::Asset>,
    total: i64,
    all_formats: Vec<String>,
}

async fn list_assets(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<AssetListQuery>,
) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;

    let descending = q.sort_order.as_deref() == Some("desc");
    let sort = match q.sort_by.as_deref() {
        Some("size") if descending => SortKey::SizeDesc,
        Some("size") => SortKey::SizeAsc,
        _ if descending => SortKey::FilenameDesc,
        _ => SortKey::FilenameAsc,
    };

    let page = database::list_assets_for_collection(
        &ctx.pool,
        AssetQuery {
            collection_id: id,
            offset: q.offset,
            limit: q.limit,
            query: q.query.as_deref(),
            format: q.filter_by_type.as_deref(),
            tag: q.tag.as_deref(),
            sort,
        },
    )
    .await?;

    Ok(Json(AssetListResponse {
        assets: page.assets,
        total: page.total,
        all_formats: page.all_formats,
    }))
}

async fn download_collection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    let entries = archive::entries_for_collection(&ctx.pool, id).await?;
    zip_response(&ctx, entries).await
}

#[derive(Deserialize)]
struct SelectionRequest {
    ids: Vec<i64>,
}

async fn download_selection(
    State(state): State<AppState>,
    Path(_collection_id): Path<i64>,
    Json(req): Json<SelectionRequest>,
) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    let entries = archive::entries_for_selection(&ctx.pool, &req.ids).await?;
    zip_response(&ctx, entries).await
}

/// Runs `archive::write_zip` in a background task against a channel-backed
/// `Write`, so the archive streams into the response as entries are
/// produced instead of being buffered whole first.
async fn zip_response(
    ctx: &VaultContext,
    entries: Vec<archive::ArchiveEntry>,
) -> VaultResult<impl IntoResponse> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let pool = ctx.pool.clone();
    tokio::spawn(async move {
        let writer = archive::ChannelWriter::new(tx.clone());
        if let Err(e) = archive::write_zip(&pool, &entries, writer).await {
            let _ = tx.send(Err(e));
        }
    });

    let body = Body::from_stream(UnboundedReceiverStream::new(rx));
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/zip")],
        body,
    ))
}

// --- uploads ----------------------------------------------------------

#[derive(Deserialize)]
struct UploadChunkQuery {
    upload_id: String,
    chunk_index: u64,
}

async fn upload_chunk(
    State(state): State<AppState>,
    Query(q): Query<UploadChunkQuery>,
    body: Bytes,
) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    ctx.staging.write_part(&q.upload_id, q.chunk_index, &body).await?;
    Ok(Json(serde_json::json!({"message": "ok"})))
}

#[derive(Deserialize)]
struct UploadCompleteRequest {
    upload_id: String,
    filename: String,
    collection_id: i64,
    path_prefix: Option<String>,
}

async fn upload_complete(
    State(state): State<AppState>,
    Json(req): Json<UploadCompleteRequest>,
) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    // Validate contiguity up front so malformed uploads are rejected
    // before a task is enqueued (SPEC_FULL.md §4.5/§9).
    ctx.staging.ordered_parts(&req.upload_id).await?;

    ctx.ingest
        .submit(IngestTask {
            collection_id: req.collection_id,
            upload_id: req.upload_id,
            filename: req.filename,
            path_prefix: req.path_prefix,
        })
        .await
        .map_err(|_| VaultError::Internal("ingestion queue closed".to_string()))?;

    Ok(StatusCode::OK)
}

// --- asset reads --------------------------------------------------------

async fn get_asset(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    let asset = database::get_asset(&ctx.pool, id)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("asset {id}")))?;
    let manifest = crate::manifest::Manifest::decode(&asset.manifest)
        .map_err(|e| VaultError::Internal(format!("malformed manifest: {e}")))?;
    let total_size = manifest.total_size;

    if let Some(range) = parse_range(&headers, total_size)? {
        let (start, end) = range;
        let body = Body::from_stream(read_pipeline::stream_asset_range(ctx.pool.clone(), id, start, end));
        return Ok((
            StatusCode::PARTIAL_CONTENT,
            [
                (axum::http::header::ACCEPT_RANGES, "bytes".to_string()),
                (
                    axum::http::header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{total_size}"),
                ),
            ],
            body,
        ));
    }

    let body = Body::from_stream(read_pipeline::stream_asset_data(ctx.pool.clone(), id));
    Ok((
        StatusCode::OK,
        [
            (axum::http::header::ACCEPT_RANGES, "bytes".to_string()),
            (axum::http::header::CONTENT_RANGE, String::new()),
        ],
        body,
    ))
}

/// Parses `Range: bytes=start-end`, returning `None` when absent and an
/// error when the header is present but unsatisfiable.
fn parse_range(headers: &HeaderMap, total_size: u64) -> VaultResult<Option<(u64, u64)>> {
    let Some(value) = headers.get(axum::http::header::RANGE) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| VaultError::ClientMalformed("invalid Range header".to_string()))?;
    let rest = value
        .strip_prefix("bytes=")
        .ok_or_else(|| VaultError::ClientMalformed("invalid Range header".to_string()))?;
    let (start_str, end_str) = rest
        .split_once('-')
        .ok_or_else(|| VaultError::ClientMalformed("invalid Range header".to_string()))?;

    let start: u64 = start_str
        .parse()
        .map_err(|_| VaultError::ClientMalformed("invalid Range start".to_string()))?;
    let end: u64 = if end_str.is_empty() {
        total_size.saturating_sub(1)
    } else {
        end_str
            .parse()
            .map_err(|_| VaultError::ClientMalformed("invalid Range end".to_string()))?
    };

    if start >= total_size || end >= total_size || start > end {
        return Err(VaultError::RangeUnsatisfiable);
    }
    Ok(Some((start, end)))
}

async fn get_asset_preview(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    Ok(Json(read_pipeline::get_asset_preview(&ctx.pool, id).await?))
}

// --- maintenance --------------------------------------------------------

async fn vacuum(State(state): State<AppState>) -> VaultResult<impl IntoResponse> {
    let ctx = require_context(&state).await?;
    database::vacuum(&ctx.pool).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_rejects_reversed_bounds() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::RANGE, "bytes=100-10".parse().unwrap());
        assert!(parse_range(&headers, 1000).is_err());
    }

    #[test]
    fn range_header_with_open_end_clamps_to_total_size() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::RANGE, "bytes=5-".parse().unwrap());
        let (start, end) = parse_range(&headers, 10).unwrap().unwrap();
        assert_eq!((start, end), (5, 9));
    }

    #[test]
    fn missing_range_header_is_none() {
        let headers = HeaderMap::new();
        assert!(parse_range(&headers, 10).unwrap().is_none());
    }
}

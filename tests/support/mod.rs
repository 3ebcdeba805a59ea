//! Shared helpers for the end-to-end scenario tests (§8 of SPEC_FULL.md).
//! Drives the public chunker/chunk_store/manifest/database surface the
//! same way `ingest::process_task` does internally, so these tests
//! exercise the real component contracts without reaching into crate-
//! private plumbing.

use compactvault::chunker;
use compactvault::chunk_store;
use compactvault::database::{self, NewAsset};
use compactvault::error::VaultResult;
use compactvault::manifest::Manifest;
use compactvault::models::derive_format_and_kind;
use bytes::Bytes;
use sqlx::SqlitePool;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

pub async fn fresh_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    database::ensure_schema(&pool).await.unwrap();
    pool
}

/// Chunks `data`, stores each unique chunk, and commits an asset under
/// `collection_id` with `filename`. Returns the new asset id.
pub async fn ingest_bytes(pool: &SqlitePool, collection_id: i64, filename: &str, data: Vec<u8>) -> i64 {
    let mut raw_chunks = Vec::new();
    chunker::chunk_stream(std::io::Cursor::new(data), |c| raw_chunks.push(c))
        .await
        .unwrap();

    let mut manifest = Manifest::new(filename.to_string());
    for chunk in &raw_chunks {
        let hash = chunk_store::put(pool, chunk).await.unwrap();
        manifest.push(hash, chunk.len() as u64);
    }

    let (format, kind) = derive_format_and_kind(filename);
    let encoded = manifest.encode().unwrap();

    database::insert_asset(
        pool,
        NewAsset {
            collection_id,
            kind,
            format: &format,
            manifest: &encoded,
            filename,
        },
    )
    .await
    .unwrap()
}

/// Drains a chunk stream into one buffer, panicking on any error — for
/// scenario tests that only care about the happy-path bytes.
pub async fn collect(mut stream: ReceiverStream<VaultResult<Bytes>>) -> Vec<u8> {
    try_collect(&mut stream).await.unwrap()
}

/// Drains a chunk stream into one buffer, surfacing the first error.
pub async fn try_collect(stream: &mut ReceiverStream<VaultResult<Bytes>>) -> VaultResult<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

pub async fn base_collection(pool: &SqlitePool) -> i64 {
    let project = database::create_project(pool, "proj", "project", None).await.unwrap();
    let collection = database::create_collection(pool, project.id, None, "root", "collection")
        .await
        .unwrap();
    collection.id
}

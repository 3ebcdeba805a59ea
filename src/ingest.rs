//! Ingestion workers: a bounded queue of completed-upload tasks drained by
//! a pool of workers that concatenate parts, chunk, store, and commit.

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::chunker;
use crate::chunk_store;
use crate::database;
use crate::manifest::Manifest;
use crate::models::derive_format_and_kind;
use crate::upload_staging::UploadStaging;

pub struct IngestTask {
    pub collection_id: i64,
    pub upload_id: String,
    pub filename: String,
    pub path_prefix: Option<String>,
}

#[derive(Clone)]
pub struct IngestHandle {
    sender: mpsc::Sender<IngestTask>,
}

impl IngestHandle {
    /// Enqueues a task, backpressuring the caller if the queue is full.
    pub async fn submit(&self, task: IngestTask) -> Result<(), IngestTask> {
        self.sender.send(task).await.map_err(|e| e.0)
    }
}

/// Host CPU count, minimum 4 — matches the donor prototype's
/// `os.cpu_count() or 4` worker-pool sizing.
pub fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(4)
}

/// Spawns `workers` ingestion tasks consuming a bounded channel, returning
/// a handle producers use to submit completed uploads.
pub fn spawn_workers(pool: SqlitePool, staging: Arc<UploadStaging>, workers: usize) -> IngestHandle {
    let (sender, receiver) = mpsc::channel(workers * 2);
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

    for worker_id in 0..workers {
        let pool = pool.clone();
        let staging = staging.clone();
        let receiver = receiver.clone();
        tokio::spawn(async move {
            loop {
                let task = {
                    let mut rx = receiver.lock().await;
                    rx.recv().await
                };
                let Some(task) = task else {
                    break;
                };
                if let Err(e) = process_task(&pool, &staging, &task).await {
                    tracing::error!(worker_id, upload_id = %task.upload_id, error = %e, "ingestion failed");
                }
                if let Err(e) = staging.cleanup(&task.upload_id).await {
                    tracing::error!(upload_id = %task.upload_id, error = %e, "cleanup failed");
                }
            }
        });
    }

    IngestHandle { sender }
}

async fn process_task(
    pool: &SqlitePool,
    staging: &UploadStaging,
    task: &IngestTask,
) -> crate::error::VaultResult<()> {
    // The collection must be resolved before the asset is inserted: assets.collection_id
    // is a foreign key, and a later UPDATE would momentarily point it at nothing.
    let collection_id = if let Some(prefix) = task.path_prefix.as_deref().filter(|p| !p.is_empty()) {
        database::get_or_create_collection_from_path(pool, task.collection_id, prefix).await?
    } else {
        task.collection_id
    };

    let parts = staging.ordered_parts(&task.upload_id).await?;

    let concat_path = staging.root().join(format!("{}.concat", task.upload_id));
    concatenate_parts(&parts, &concat_path).await?;

    let result = ingest_from_file(pool, &concat_path, collection_id, &task.filename).await;
    let _ = fs::remove_file(&concat_path).await;
    result?;

    Ok(())
}

async fn concatenate_parts(parts: &[PathBuf], dest: &PathBuf) -> std::io::Result<()> {
    let mut out = fs::File::create(dest).await?;
    for part in parts {
        let bytes = fs::read(part).await?;
        out.write_all(&bytes).await?;
    }
    out.flush().await?;
    Ok(())
}

/// Runs CDC over `path`, stores each unique chunk, builds the manifest,
/// and commits the asset row under `collection_id`. Returns the new asset id.
async fn ingest_from_file(
    pool: &SqlitePool,
    path: &PathBuf,
    collection_id: i64,
    filename: &str,
) -> crate::error::VaultResult<i64> {
    let blocking_path = path.clone();
    // The sentinel scan and per-chunk hash/compress are CPU-bound; running
    // them on a blocking thread keeps the async executor free for I/O while
    // this worker is busy on one upload.
    let chunks: Vec<(String, Vec<u8>, u64)> = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&blocking_path)?;
        let mut out = Vec::new();
        chunker::chunk_reader(file, |raw| {
            let (hash, compressed) = chunk_store::compress_and_hash(&raw)?;
            out.push((hash, compressed, raw.len() as u64));
            Ok(())
        })?;
        Ok::<_, std::io::Error>(out)
    })
    .await
    .map_err(|e| crate::error::VaultError::Internal(format!("chunking task panicked: {e}")))??;

    let mut manifest = Manifest::new(filename.to_string());
    for (hash, compressed, size) in chunks {
        chunk_store::store_compressed(pool, &hash, compressed).await?;
        manifest.push(hash, size);
    }

    let (format, kind) = derive_format_and_kind(filename);
    let encoded = manifest
        .encode()
        .map_err(|e| crate::error::VaultError::Internal(e.to_string()))?;

    let asset_id = database::insert_asset(
        pool,
        database::NewAsset {
            collection_id,
            kind,
            format: &format,
            manifest: &encoded,
            filename,
        },
    )
    .await?;

    Ok(asset_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ensure_schema;

    #[tokio::test]
    async fn ingest_small_file_produces_one_chunk_manifest() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        ensure_schema(&pool).await.unwrap();
        let project = database::create_project(&pool, "proj", "project", None).await.unwrap();
        let collection = database::create_collection(&pool, project.id, None, "root", "collection")
            .await
            .unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hello.txt");
        fs::write(&path, b"hello").await.unwrap();

        let asset_id = ingest_from_file(&pool, &path, collection.id, "hello.txt").await.unwrap();
        let asset = database::get_asset(&pool, asset_id).await.unwrap().unwrap();
        assert_eq!(asset.collection_id, Some(collection.id));
        let manifest = Manifest::decode(&asset.manifest).unwrap();
        assert_eq!(manifest.chain.len(), 1);
        assert_eq!(manifest.total_size, 5);
        assert_eq!(asset.kind, "text");
    }

    #[tokio::test]
    async fn process_task_never_inserts_a_placeholder_collection_id() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        ensure_schema(&pool).await.unwrap();
        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await.unwrap();
        let project = database::create_project(&pool, "proj", "project", None).await.unwrap();
        let collection = database::create_collection(&pool, project.id, None, "root", "collection")
            .await
            .unwrap();

        let staging_dir = tempfile::tempdir().unwrap();
        let staging = UploadStaging::new(staging_dir.path().to_path_buf()).await.unwrap();
        staging.write_part("up1", 0, b"hello").await.unwrap();

        let task = IngestTask {
            collection_id: collection.id,
            upload_id: "up1".to_string(),
            filename: "hello.txt".to_string(),
            path_prefix: None,
        };
        process_task(&pool, &staging, &task).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM assets WHERE collection_id = ?")
            .bind(collection.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}

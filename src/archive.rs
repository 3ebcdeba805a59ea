//! Zip archival: streams multiple assets into a single zip output with
//! stored (uncompressed) entries.

use sqlx::SqlitePool;
use std::io::Write;
use tokio_stream::StreamExt;
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::database;
use crate::error::VaultResult;
use crate::read_pipeline;

/// An asset id paired with the path it should occupy inside the archive.
pub struct ArchiveEntry {
    pub asset_id: i64,
    pub path_in_zip: String,
}

/// A `Write` sink that forwards every write as one `Bytes` frame over an
/// unbounded channel. `UnboundedSender::send` never blocks, so it's safe to
/// call from the synchronous `Write` impl `zip::ZipWriter` requires.
pub struct ChannelWriter {
    tx: tokio::sync::mpsc::UnboundedSender<VaultResult<bytes::Bytes>>,
}

impl ChannelWriter {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<VaultResult<bytes::Bytes>>) -> Self {
        ChannelWriter { tx }
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx
            .send(Ok(bytes::Bytes::copy_from_slice(buf)))
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "zip response receiver dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Streams every entry into a zip at `writer`, stored (uncompressed). Uses
/// `ZipWriter::new_stream`, which writes a trailing data descriptor per
/// entry instead of seeking back to patch the local file header — so
/// `writer` only needs `Write`, and the whole archive never has to be
/// buffered before it can be sent.
pub async fn write_zip<W: Write>(
    pool: &SqlitePool,
    entries: &[ArchiveEntry],
    writer: W,
) -> VaultResult<W> {
    let mut zip = ZipWriter::new_stream(writer);
    let options: FileOptions = FileOptions::default().compression_method(zip::CompressionMethod::Stored);

    for entry in entries {
        zip.start_file(&entry.path_in_zip, options)?;
        let mut stream = read_pipeline::stream_asset_data(pool.clone(), entry.asset_id);
        while let Some(chunk) = stream.next().await {
            zip.write_all(&chunk?)?;
        }
    }

    let writer = zip.finish()?;
    Ok(writer)
}

/// Depth-first walk of a collection's subtree, prefixing each asset's
/// filename with `<collection.name>/…/<filename>`.
pub async fn entries_for_collection(pool: &SqlitePool, collection_id: i64) -> VaultResult<Vec<ArchiveEntry>> {
    let collection = database::get_collection(pool, collection_id)
        .await?
        .ok_or_else(|| crate::error::VaultError::NotFound(format!("collection {collection_id}")))?;
    walk_collection(pool, collection_id, format!("{}/", collection.name)).await
}

/// Same walk, prefixed additionally with `<project.name>/`.
pub async fn entries_for_project(pool: &SqlitePool, project_id: i64) -> VaultResult<Vec<ArchiveEntry>> {
    let project = database::get_project(pool, project_id)
        .await?
        .ok_or_else(|| crate::error::VaultError::NotFound(format!("project {project_id}")))?;
    let mut entries = Vec::new();
    for collection in database::top_level_collections(pool, project_id).await? {
        let prefix = format!("{}/{}/", project.name, collection.name);
        entries.extend(walk_collection(pool, collection.id, prefix).await?);
    }
    Ok(entries)
}

/// Flat archive of an explicit selection, in submitted order.
pub async fn entries_for_selection(pool: &SqlitePool, asset_ids: &[i64]) -> VaultResult<Vec<ArchiveEntry>> {
    let mut entries = Vec::with_capacity(asset_ids.len());
    for &asset_id in asset_ids {
        let filename = database::get_asset_filename(pool, asset_id)
            .await?
            .unwrap_or_else(|| format!("asset_{asset_id}"));
        entries.push(ArchiveEntry {
            asset_id,
            path_in_zip: filename,
        });
    }
    Ok(entries)
}

fn walk_collection(
    pool: &SqlitePool,
    collection_id: i64,
    prefix: String,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = VaultResult<Vec<ArchiveEntry>>> + Send + '_>> {
    Box::pin(walk_collection_inner(pool, collection_id, prefix))
}

async fn walk_collection_inner(pool: &SqlitePool, collection_id: i64, prefix: String) -> VaultResult<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();

    let page = database::list_assets_for_collection(
        pool,
        database::AssetQuery {
            collection_id,
            offset: 0,
            limit: i64::MAX,
            query: None,
            format: None,
            tag: None,
            sort: database::SortKey::FilenameAsc,
        },
    )
    .await?;
    for asset in page.assets {
        let filename = database::get_asset_filename(pool, asset.id)
            .await?
            .unwrap_or_else(|| format!("asset_{}", asset.id));
        entries.push(ArchiveEntry {
            asset_id: asset.id,
            path_in_zip: format!("{prefix}{filename}"),
        });
    }

    for child in database::child_collections(pool, collection_id).await? {
        let child_prefix = format!("{prefix}{}/", child.name);
        entries.extend(walk_collection(pool, child.id, child_prefix).await?);
    }

    Ok(entries)
}

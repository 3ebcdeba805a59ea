//! The catalog: projects, collections, assets, metadata, vault properties,
//! and the chunk table, all in one SQLite database file.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::chunk_store;
use crate::chunker;
use crate::error::{VaultError, VaultResult};
use crate::manifest::Manifest;
use crate::models::{derive_format_and_kind, Asset, Collection, Project};

/// Serializes the catalog's check-then-act critical sections (path-prefix
/// resolution, the legacy-schema migration) the way the donor's `RLock`
/// guarded its whole `Database` object — one process-wide section at a
/// time, not per-connection locking. `const_new` makes this a plain
/// static with no lazy-init machinery.
static CRITICAL_SECTION: Mutex<()> = Mutex::const_new(());

/// Opens (creating if necessary) the schema in `pool`. Idempotent.
pub async fn ensure_schema(pool: &SqlitePool) -> VaultResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS vault_properties (key TEXT PRIMARY KEY, value TEXT)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            description TEXT,
            order_index INTEGER,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS collections (
            id INTEGER PRIMARY KEY,
            project_id INTEGER NOT NULL REFERENCES projects(id),
            parent_id INTEGER REFERENCES collections(id),
            name TEXT,
            type TEXT,
            order_index INTEGER,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS assets (
            id INTEGER PRIMARY KEY,
            collection_id INTEGER REFERENCES collections(id),
            type TEXT NOT NULL,
            format TEXT,
            manifest TEXT,
            order_index INTEGER,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS metadata (
            id INTEGER PRIMARY KEY,
            asset_id INTEGER REFERENCES assets(id),
            key TEXT NOT NULL,
            value TEXT
        )",
    )
    .execute(pool)
    .await?;

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_metadata_asset ON metadata(asset_id)",
        "CREATE INDEX IF NOT EXISTS idx_metadata_key ON metadata(key)",
        "CREATE INDEX IF NOT EXISTS idx_metadata_asset_key ON metadata(asset_id, key)",
        "CREATE INDEX IF NOT EXISTS idx_metadata_value ON metadata(value)",
        "CREATE INDEX IF NOT EXISTS idx_collections_project ON collections(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_collections_parent ON collections(parent_id)",
        "CREATE INDEX IF NOT EXISTS idx_assets_collection ON assets(collection_id)",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    sqlx::query("CREATE TABLE IF NOT EXISTS chunks (hash TEXT PRIMARY KEY, data BLOB)")
        .execute(pool)
        .await?;

    ensure_schema_extensions(pool).await?;
    Ok(())
}

/// Backfills columns added after the initial schema (`order_index`,
/// `parent_id`) for vaults created by an older version of this catalog,
/// and detects the legacy pre-chunked schema (an `assets.data` column).
async fn ensure_schema_extensions(pool: &SqlitePool) -> VaultResult<()> {
    let has_column = |table: &str, column: &str| {
        let table = table.to_string();
        let column = column.to_string();
        let pool = pool.clone();
        async move {
            let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
                .fetch_all(&pool)
                .await?;
            Ok::<bool, sqlx::Error>(rows.iter().any(|r| r.get::<String, _>("name") == column))
        }
    };

    if has_column("assets", "data").await? {
        tracing::warn!(
            "legacy pre-chunked schema detected (assets.data column present); \
             migrating to the chunked schema"
        );
        migrate_legacy_blobs(pool).await?;
    }

    if !has_column("collections", "order_index").await? {
        sqlx::query("ALTER TABLE collections ADD COLUMN order_index INTEGER")
            .execute(pool)
            .await?;
    }
    if !has_column("collections", "parent_id").await? {
        sqlx::query("ALTER TABLE collections ADD COLUMN parent_id INTEGER REFERENCES collections(id)")
            .execute(pool)
            .await?;
    }
    if !has_column("assets", "order_index").await? {
        sqlx::query("ALTER TABLE assets ADD COLUMN order_index INTEGER")
            .execute(pool)
            .await?;
    }

    Ok(())
}

/// Migrates every legacy asset row (one with a non-null `data` blob) to the
/// chunked schema: streams the blob through the chunker and chunk store,
/// writes the resulting manifest, and clears `data`. Runs inside one
/// transaction so a failure partway through leaves the vault untouched.
async fn migrate_legacy_blobs(pool: &SqlitePool) -> VaultResult<()> {
    let _guard = CRITICAL_SECTION.lock().await;

    let rows: Vec<(i64, Vec<u8>)> =
        sqlx::query_as("SELECT id, data FROM assets WHERE data IS NOT NULL")
            .fetch_all(pool)
            .await?;
    if rows.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for (asset_id, blob) in rows {
        let filename = sqlx::query_as::<_, (String,)>(
            "SELECT value FROM metadata WHERE asset_id = ? AND key = 'filename' LIMIT 1",
        )
        .bind(asset_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|(v,)| v)
        .unwrap_or_else(|| format!("asset_{asset_id}"));

        let mut manifest = Manifest::new(filename.clone());
        let mut raw_chunks: Vec<Vec<u8>> = Vec::new();
        chunker::chunk_reader(std::io::Cursor::new(blob), |chunk| {
            raw_chunks.push(chunk);
            Ok(())
        })?;

        for chunk in &raw_chunks {
            let (hash, compressed) = chunk_store::compress_and_hash(chunk)?;
            sqlx::query("INSERT OR IGNORE INTO chunks (hash, data) VALUES (?, ?)")
                .bind(&hash)
                .bind(compressed)
                .execute(&mut *tx)
                .await?;
            manifest.push(hash, chunk.len() as u64);
        }

        let (format, kind) = derive_format_and_kind(&filename);
        let encoded = manifest
            .encode()
            .map_err(|e| VaultError::Internal(e.to_string()))?;

        sqlx::query("UPDATE assets SET type = ?, format = ?, manifest = ?, data = NULL WHERE id = ?")
            .bind(kind)
            .bind(&format)
            .bind(&encoded)
            .bind(asset_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn vacuum(pool: &SqlitePool) -> VaultResult<()> {
    sqlx::query("VACUUM").execute(pool).await?;
    Ok(())
}

// --- vault properties -------------------------------------------------

pub async fn get_property(pool: &SqlitePool, key: &str) -> VaultResult<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM vault_properties WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(v,)| v))
}

pub async fn set_property(pool: &SqlitePool, key: &str, value: &str) -> VaultResult<()> {
    sqlx::query("INSERT OR REPLACE INTO vault_properties (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}

// --- projects -----------------------------------------------------------

pub async fn create_project(
    pool: &SqlitePool,
    name: &str,
    kind: &str,
    description: Option<&str>,
) -> VaultResult<Project> {
    let now: DateTime<Utc> = Utc::now();
    let id = sqlx::query(
        "INSERT INTO projects (name, type, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(kind)
    .bind(description)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_project(pool, id).await?.ok_or_else(|| {
        VaultError::Internal("project vanished immediately after insert".to_string())
    })
}

pub async fn get_project(pool: &SqlitePool, id: i64) -> VaultResult<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(project)
}

pub async fn list_projects(pool: &SqlitePool) -> VaultResult<Vec<Project>> {
    let projects = sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY order_index, id")
        .fetch_all(pool)
        .await?;
    Ok(projects)
}

// --- collections ----------------------------------------------------------

pub async fn create_collection(
    pool: &SqlitePool,
    project_id: i64,
    parent_id: Option<i64>,
    name: &str,
    kind: &str,
) -> VaultResult<Collection> {
    let id = sqlx::query(
        "INSERT INTO collections (project_id, parent_id, name, type) VALUES (?, ?, ?, ?)",
    )
    .bind(project_id)
    .bind(parent_id)
    .bind(name)
    .bind(kind)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_collection(pool, id).await?.ok_or_else(|| {
        VaultError::Internal("collection vanished immediately after insert".to_string())
    })
}

pub async fn get_collection(pool: &SqlitePool, id: i64) -> VaultResult<Option<Collection>> {
    let collection = sqlx::query_as::<_, Collection>("SELECT * FROM collections WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(collection)
}

pub async fn list_collections_for_project(
    pool: &SqlitePool,
    project_id: i64,
) -> VaultResult<Vec<Collection>> {
    let collections = sqlx::query_as::<_, Collection>(
        "SELECT * FROM collections WHERE project_id = ? ORDER BY order_index, id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(collections)
}

pub async fn child_collections(pool: &SqlitePool, parent_id: i64) -> VaultResult<Vec<Collection>> {
    let collections = sqlx::query_as::<_, Collection>(
        "SELECT * FROM collections WHERE parent_id = ? ORDER BY order_index, id",
    )
    .bind(parent_id)
    .fetch_all(pool)
    .await?;
    Ok(collections)
}

pub async fn top_level_collections(pool: &SqlitePool, project_id: i64) -> VaultResult<Vec<Collection>> {
    let collections = sqlx::query_as::<_, Collection>(
        "SELECT * FROM collections WHERE project_id = ? AND parent_id IS NULL ORDER BY order_index, id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(collections)
}

/// Resolves a slash-separated `path` beneath `base_collection_id`,
/// creating any missing intermediate collections. Returns the id of the
/// deepest collection named by `path`.
///
/// The whole walk runs under `CRITICAL_SECTION`: each segment is a
/// check-then-insert, and without serializing it two concurrent ingests
/// resolving the same new prefix can both see "missing" and each create a
/// sibling collection with the same `(project_id, parent_id, name)`.
pub async fn get_or_create_collection_from_path(
    pool: &SqlitePool,
    base_collection_id: i64,
    path: &str,
) -> VaultResult<i64> {
    let _guard = CRITICAL_SECTION.lock().await;

    let base = get_collection(pool, base_collection_id)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("collection {base_collection_id}")))?;
    let project_id = base.project_id;

    let mut current_parent_id = base_collection_id;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM collections WHERE project_id = ? AND parent_id = ? AND name = ?",
        )
        .bind(project_id)
        .bind(current_parent_id)
        .bind(segment)
        .fetch_optional(pool)
        .await?;

        current_parent_id = match existing {
            Some((id,)) => id,
            None => {
                create_collection(pool, project_id, Some(current_parent_id), segment, "collection")
                    .await?
                    .id
            }
        };
    }
    Ok(current_parent_id)
}

// --- assets ---------------------------------------------------------------

pub struct NewAsset<'a> {
    pub collection_id: i64,
    pub kind: &'a str,
    pub format: &'a str,
    pub manifest: &'a str,
    pub filename: &'a str,
}

/// Inserts an asset row and its `filename` metadata row in a single
/// transaction (§4.6 step 5).
pub async fn insert_asset(pool: &SqlitePool, new: NewAsset<'_>) -> VaultResult<i64> {
    let mut tx = pool.begin().await?;

    let asset_id = sqlx::query(
        "INSERT INTO assets (collection_id, type, format, manifest) VALUES (?, ?, ?, ?)",
    )
    .bind(new.collection_id)
    .bind(new.kind)
    .bind(new.format)
    .bind(new.manifest)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    sqlx::query("INSERT INTO metadata (asset_id, key, value) VALUES (?, 'filename', ?)")
        .bind(asset_id)
        .bind(new.filename)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(asset_id)
}

pub async fn get_asset(pool: &SqlitePool, id: i64) -> VaultResult<Option<Asset>> {
    let asset = sqlx::query_as::<_, Asset>("SELECT * FROM assets WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(asset)
}

pub async fn get_asset_filename(pool: &SqlitePool, asset_id: i64) -> VaultResult<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT value FROM metadata WHERE asset_id = ? AND key = 'filename' LIMIT 1",
    )
    .bind(asset_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(v,)| v))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    FilenameAsc,
    FilenameDesc,
    SizeAsc,
    SizeDesc,
}

pub struct AssetQuery<'a> {
    pub collection_id: i64,
    pub offset: i64,
    pub limit: i64,
    pub query: Option<&'a str>,
    pub format: Option<&'a str>,
    pub tag: Option<&'a str>,
    pub sort: SortKey,
}

pub struct AssetPage {
    pub assets: Vec<Asset>,
    pub total: i64,
    pub all_formats: Vec<String>,
}

/// Paginated, filtered, sorted asset listing for a collection. Sorting by
/// size reads `total_size` out of the manifest JSON; sorting by filename
/// joins against the `filename` metadata row.
pub async fn list_assets_for_collection(pool: &SqlitePool, q: AssetQuery<'_>) -> VaultResult<AssetPage> {
    let mut where_clauses = vec!["a.collection_id = ?".to_string()];
    if q.query.is_some() {
        where_clauses.push(
            "EXISTS (SELECT 1 FROM metadata m WHERE m.asset_id = a.id AND m.key = 'filename' \
             AND m.value LIKE ? COLLATE NOCASE)"
                .to_string(),
        );
    }
    if q.format.is_some() {
        where_clauses.push("a.format = ?".to_string());
    }
    if q.tag.is_some() {
        where_clauses.push(
            "EXISTS (SELECT 1 FROM metadata m WHERE m.asset_id = a.id AND m.key = 'tags' \
             AND m.value LIKE ?)"
                .to_string(),
        );
    }
    let where_sql = where_clauses.join(" AND ");

    let order_sql = match q.sort {
        SortKey::SizeAsc => "json_extract(a.manifest, '$.total_size') ASC",
        SortKey::SizeDesc => "json_extract(a.manifest, '$.total_size') DESC",
        SortKey::FilenameAsc => {
            "(SELECT m.value FROM metadata m WHERE m.asset_id = a.id AND m.key = 'filename') ASC"
        }
        SortKey::FilenameDesc => {
            "(SELECT m.value FROM metadata m WHERE m.asset_id = a.id AND m.key = 'filename') DESC"
        }
    };

    let count_sql = format!("SELECT COUNT(*) FROM assets a WHERE {where_sql}");
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql).bind(q.collection_id);
    if let Some(query) = q.query {
        count_query = count_query.bind(format!("%{query}%"));
    }
    if let Some(format) = q.format {
        count_query = count_query.bind(format);
    }
    if let Some(tag) = q.tag {
        count_query = count_query.bind(format!("%{tag}%"));
    }
    let (total,) = count_query.fetch_one(pool).await?;

    let select_sql =
        format!("SELECT a.* FROM assets a WHERE {where_sql} ORDER BY {order_sql} LIMIT ? OFFSET ?");
    let mut select_query = sqlx::query_as::<_, Asset>(&select_sql).bind(q.collection_id);
    if let Some(query) = q.query {
        select_query = select_query.bind(format!("%{query}%"));
    }
    if let Some(format) = q.format {
        select_query = select_query.bind(format);
    }
    if let Some(tag) = q.tag {
        select_query = select_query.bind(format!("%{tag}%"));
    }
    select_query = select_query.bind(q.limit).bind(q.offset);
    let assets = select_query.fetch_all(pool).await?;

    let all_formats: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT format FROM assets WHERE collection_id = ? AND format IS NOT NULL",
    )
    .bind(q.collection_id)
    .fetch_all(pool)
    .await?;

    Ok(AssetPage {
        assets,
        total,
        all_formats: all_formats.into_iter().map(|(f,)| f).collect(),
    })
}

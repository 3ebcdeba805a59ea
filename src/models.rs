//! Row types for the catalog: projects, collections (a forest), assets,
//! and free-form per-asset metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub description: Option<String>,
    pub order_index: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Collection {
    pub id: i64,
    pub project_id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub order_index: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Asset {
    pub id: i64,
    pub collection_id: Option<i64>,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub format: Option<String>,
    pub manifest: String,
    pub order_index: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Metadata {
    pub id: i64,
    pub asset_id: i64,
    pub key: String,
    pub value: String,
}

/// Derives an asset `type` from a lowercased file extension, matching the
/// fixed table used to populate `assets.type`.
pub fn asset_kind_for_extension(extension: &str) -> &'static str {
    match extension {
        "txt" | "html" | "css" | "js" | "md" | "json" | "csv" | "xml" | "py" => "text",
        "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" => "image",
        "mp3" | "wav" | "ogg" | "m4a" | "flac" => "audio",
        "mp4" | "mov" | "webm" | "mkv" | "avi" | "flv" => "video",
        "gltf" | "glb" => "3d",
        "epub" | "pdf" | "zip" | "rar" | "7z" => "binary",
        _ => "binary",
    }
}

/// Splits a filename into `(format, type)`, where `format` is the
/// lowercased extension or `"binary"` if there is none.
pub fn derive_format_and_kind(filename: &str) -> (String, &'static str) {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => {
            let ext = ext.to_lowercase();
            let kind = asset_kind_for_extension(&ext);
            (ext, kind)
        }
        _ => ("binary".to_string(), "binary"),
    }
}

//! Content-addressed, deduplicated, compressed chunk store backed by the
//! vault's `chunks` table.

use flate2::write::ZlibEncoder;
use flate2::read::ZlibDecoder;
use flate2::Compression;
use sqlx::SqlitePool;
use std::io::{Read, Write};

use crate::error::{VaultError, VaultResult};

pub fn hash_bytes(data: &[u8]) -> String {
    let hash = blake2b_simd::Params::new().hash_length(64).hash(data);
    hex::encode(hash.as_bytes())
}

fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Hashes and compresses `data`. Pure CPU work — safe to run inside
/// `tokio::task::spawn_blocking`.
pub fn compress_and_hash(data: &[u8]) -> std::io::Result<(String, Vec<u8>)> {
    let hash = hash_bytes(data);
    let compressed = compress(data)?;
    Ok((hash, compressed))
}

/// Writes an already-compressed chunk under `hash` if not already present.
pub async fn store_compressed(pool: &SqlitePool, hash: &str, compressed: Vec<u8>) -> VaultResult<()> {
    sqlx::query("INSERT OR IGNORE INTO chunks (hash, data) VALUES (?, ?)")
        .bind(hash)
        .bind(compressed)
        .execute(pool)
        .await?;
    Ok(())
}

/// Stores `data` under its content hash if not already present. Returns the
/// hex digest either way.
pub async fn put(pool: &SqlitePool, data: &[u8]) -> VaultResult<String> {
    let (hash, compressed) = compress_and_hash(data).map_err(VaultError::Io)?;
    store_compressed(pool, &hash, compressed).await?;
    Ok(hash)
}

/// Fetches and decompresses the chunk stored under `hash`.
///
/// A chunk whose stored bytes fail to decompress is reported distinctly
/// from a missing chunk so callers can implement the corrupt-chunk skip
/// policy (§7) instead of aborting the whole read.
pub enum ChunkFetch {
    Found(Vec<u8>),
    Missing,
    Corrupt,
}

pub async fn get(pool: &SqlitePool, hash: &str) -> VaultResult<ChunkFetch> {
    let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT data FROM chunks WHERE hash = ?")
        .bind(hash)
        .fetch_optional(pool)
        .await?;
    let Some((compressed,)) = row else {
        return Ok(ChunkFetch::Missing);
    };
    match decompress(&compressed) {
        Ok(data) => Ok(ChunkFetch::Found(data)),
        Err(e) => {
            tracing::error!(hash, error = %e, "corrupt chunk");
            Ok(ChunkFetch::Corrupt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_is_idempotent_and_get_round_trips() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE chunks (hash TEXT PRIMARY KEY, data BLOB)")
            .execute(&pool)
            .await
            .unwrap();

        let data = b"hello world".to_vec();
        let h1 = put(&pool, &data).await.unwrap();
        let h2 = put(&pool, &data).await.unwrap();
        assert_eq!(h1, h2);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);

        match get(&pool, &h1).await.unwrap() {
            ChunkFetch::Found(bytes) => assert_eq!(bytes, data),
            _ => panic!("expected chunk to be found"),
        }
    }

    #[tokio::test]
    async fn get_missing_hash_is_missing() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE chunks (hash TEXT PRIMARY KEY, data BLOB)")
            .execute(&pool)
            .await
            .unwrap();
        match get(&pool, "nonexistent").await.unwrap() {
            ChunkFetch::Missing => {}
            _ => panic!("expected missing"),
        }
    }
}

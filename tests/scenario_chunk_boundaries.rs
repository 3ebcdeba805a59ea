//! S2/S3: chunker emits a sentinel-bounded split, and clamps at
//! `MAX_CHUNK_SIZE` when no sentinel ever appears.

mod support;

use compactvault::chunker::{chunk_stream, MAX_CHUNK_SIZE, SENTINEL};
use compactvault::manifest::Manifest;
use compactvault::{database, read_pipeline};

#[tokio::test]
async fn sentinel_splits_into_two_chunks() {
    let pool = support::fresh_pool().await;
    let collection_id = support::base_collection(&pool).await;

    let mut data = vec![0x41u8; 5000];
    data.extend_from_slice(&SENTINEL);
    data.extend(vec![0x42u8; 5000]);

    let asset_id = support::ingest_bytes(&pool, collection_id, "split.bin", data.clone()).await;
    let asset = database::get_asset(&pool, asset_id).await.unwrap().unwrap();
    let manifest = Manifest::decode(&asset.manifest).unwrap();

    assert_eq!(manifest.chain.len(), 2);
    assert_eq!(manifest.chain[0].size, 5002);
    assert_eq!(manifest.chain[1].size, 5000);

    let chunks = support::collect(read_pipeline::stream_asset_data(pool.clone(), asset_id)).await;
    assert_eq!(chunks, data);
}

#[tokio::test]
async fn no_sentinel_clamps_at_max_chunk_size() {
    let data = vec![0u8; MAX_CHUNK_SIZE * 3];
    let mut sizes = Vec::new();
    chunk_stream(std::io::Cursor::new(data), |c| sizes.push(c.len()))
        .await
        .unwrap();

    assert_eq!(sizes, vec![MAX_CHUNK_SIZE, MAX_CHUNK_SIZE, MAX_CHUNK_SIZE]);
}

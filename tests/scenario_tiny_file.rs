//! S1: a single tiny upload round-trips exactly and yields one chain entry.

mod support;

use compactvault::manifest::Manifest;
use compactvault::{database, read_pipeline};

#[tokio::test]
async fn tiny_file_round_trips_with_single_chain_entry() {
    let pool = support::fresh_pool().await;
    let collection_id = support::base_collection(&pool).await;

    let asset_id = support::ingest_bytes(&pool, collection_id, "hello.txt", b"hello".to_vec()).await;

    let asset = database::get_asset(&pool, asset_id).await.unwrap().unwrap();
    let manifest = Manifest::decode(&asset.manifest).unwrap();
    assert_eq!(manifest.chain.len(), 1);
    assert_eq!(manifest.chain[0].size, 5);
    assert_eq!(manifest.chain[0].previous_hash, None);

    let chunks = support::collect(read_pipeline::stream_asset_data(pool.clone(), asset_id)).await;
    assert_eq!(chunks, b"hello");
}

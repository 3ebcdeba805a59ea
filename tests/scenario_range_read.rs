//! S4: a ranged read returns exactly the requested byte span.

mod support;

use compactvault::read_pipeline;

#[tokio::test]
async fn range_read_returns_exact_slice() {
    let pool = support::fresh_pool().await;
    let collection_id = support::base_collection(&pool).await;

    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let asset_id = support::ingest_bytes(&pool, collection_id, "data.bin", data.clone()).await;

    let slice = support::collect(read_pipeline::stream_asset_range(pool.clone(), asset_id, 100_000, 100_009)).await;
    assert_eq!(slice, &data[100_000..=100_009]);
}

#[tokio::test]
async fn range_past_total_size_is_rejected() {
    let pool = support::fresh_pool().await;
    let collection_id = support::base_collection(&pool).await;
    let asset_id = support::ingest_bytes(&pool, collection_id, "tiny.bin", vec![0u8; 10]).await;

    let mut stream = read_pipeline::stream_asset_range(pool.clone(), asset_id, 0, 20);
    assert!(support::try_collect(&mut stream).await.is_err());
}

//! S5: uploading identical bytes into two collections shares every chunk
//! instead of doubling the chunk table.

mod support;

use compactvault::database;

#[tokio::test]
async fn duplicate_uploads_do_not_duplicate_chunks() {
    let pool = support::fresh_pool().await;
    let project = database::create_project(&pool, "proj", "project", None).await.unwrap();
    let collection_a = database::create_collection(&pool, project.id, None, "a", "collection")
        .await
        .unwrap();
    let collection_b = database::create_collection(&pool, project.id, None, "b", "collection")
        .await
        .unwrap();

    let data = vec![0u8; 1024 * 1024];

    support::ingest_bytes(&pool, collection_a.id, "x.bin", data.clone()).await;
    let (count_after_first,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await
        .unwrap();

    support::ingest_bytes(&pool, collection_b.id, "x.bin", data).await;
    let (count_after_second,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await
        .unwrap();

    assert_eq!(count_after_first, count_after_second);
}

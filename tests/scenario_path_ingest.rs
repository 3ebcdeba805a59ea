//! S6: path-prefix ingest creates missing intermediate collections once,
//! and concurrent completions of the same prefix never race into
//! duplicate siblings (testable property 7, §5's serialized critical
//! section).

mod support;

use compactvault::database;
use std::sync::Arc;

#[tokio::test]
async fn repeated_prefix_does_not_create_duplicate_collections() {
    let pool = support::fresh_pool().await;
    let base = support::base_collection(&pool).await;

    let first = database::get_or_create_collection_from_path(&pool, base, "sub1/sub2")
        .await
        .unwrap();
    let second = database::get_or_create_collection_from_path(&pool, base, "sub1/sub2")
        .await
        .unwrap();
    assert_eq!(first, second);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM collections")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 3); // root + sub1 + sub2
}

#[tokio::test]
async fn concurrent_same_prefix_ingests_never_duplicate_siblings() {
    let pool = support::fresh_pool().await;
    let base = support::base_collection(&pool).await;
    let pool = Arc::new(pool);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            database::get_or_create_collection_from_path(&pool, base, "sub1/sub2")
                .await
                .unwrap()
        }));
    }

    let mut leaves = Vec::new();
    for handle in handles {
        leaves.push(handle.await.unwrap());
    }
    assert!(leaves.iter().all(|&id| id == leaves[0]));

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM collections")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 3);
}

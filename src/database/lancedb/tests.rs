use super::*;
use tempfile::TempDir;

async fn open_index(temp_dir: &TempDir, dimension: usize) -> LanceIndex {
    let uri = temp_dir.path().join("vectors");
    LanceIndex::connect(&uri.to_string_lossy(), "embeddings", dimension)
        .await
        .expect("should open index")
}

fn record(content: &str, embedding: Vec<f32>) -> NewRecord {
    NewRecord {
        embedding,
        content: content.to_string(),
    }
}

#[test]
fn literals_are_quoted_and_escaped() {
    assert_eq!(sql_literal("abc"), "'abc'");
    assert_eq!(sql_literal("it's"), "'it''s'");
}

#[tokio::test]
async fn zero_dimension_is_rejected() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let uri = temp_dir.path().join("vectors");
    let result = LanceIndex::connect(&uri.to_string_lossy(), "embeddings", 0).await;
    assert!(matches!(result, Err(RagError::InvalidInput(_))));
}

#[tokio::test]
async fn new_table_starts_empty() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let index = open_index(&temp_dir, 3).await;

    assert_eq!(index.dimension(), 3);
    assert_eq!(index.count().await.expect("count rows"), 0);
}

#[tokio::test]
async fn insert_assigns_unique_ids_in_order() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let index = open_index(&temp_dir, 3).await;

    let ids = index
        .insert(vec![
            record("first", vec![1.0, 0.0, 0.0]),
            record("second", vec![0.0, 1.0, 0.0]),
        ])
        .await
        .expect("insert records");

    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert_eq!(index.count().await.expect("count rows"), 2);

    let first = index
        .embedding_of(&ids[0])
        .await
        .expect("look up record")
        .expect("record exists");
    assert_eq!(first, vec![1.0, 0.0, 0.0]);
}

#[tokio::test]
async fn insert_rejects_wrong_width_without_writing() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let index = open_index(&temp_dir, 3).await;

    let result = index
        .insert(vec![
            record("ok", vec![1.0, 0.0, 0.0]),
            record("bad", vec![1.0, 0.0]),
        ])
        .await;

    assert!(matches!(
        result,
        Err(RagError::DimensionMismatch {
            expected: 3,
            actual: 2
        })
    ));
    assert_eq!(index.count().await.expect("count rows"), 0);
}

#[tokio::test]
async fn query_orders_by_cosine_similarity() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let index = open_index(&temp_dir, 3).await;

    index
        .insert(vec![
            record("far", vec![0.0, 0.0, 1.0]),
            record("near", vec![1.0, 0.1, 0.0]),
            record("middle", vec![1.0, 1.0, 0.0]),
        ])
        .await
        .expect("insert records");

    let rows = index
        .query(&[1.0, 0.0, 0.0], 3, None)
        .await
        .expect("query index");

    let contents: Vec<&str> = rows.iter().map(|r| r.content.as_str()).collect();
    assert_eq!(contents, vec!["near", "middle", "far"]);
    assert!(rows[0].similarity > 0.99);
    assert!(rows[2].similarity.abs() < 1e-4);
}

#[tokio::test]
async fn scores_match_cosine_similarity_exactly() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let index = open_index(&temp_dir, 2).await;

    let embedding = vec![-0.07, (1.0_f32 - 0.0049).sqrt()];
    let expected =
        crate::embeddings::cosine_similarity(&[1.0, 0.0], &embedding).expect("same dimension");
    index
        .insert(vec![record("slightly opposed", embedding)])
        .await
        .expect("insert record");

    let rows = index
        .query(&[1.0, 0.0], 1, None)
        .await
        .expect("query index");
    assert_eq!(rows[0].similarity, expected);
}

#[tokio::test]
async fn query_respects_limit_and_exclusion() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let index = open_index(&temp_dir, 2).await;

    let ids = index
        .insert(vec![
            record("self", vec![1.0, 0.0]),
            record("close", vec![0.9, 0.1]),
            record("other", vec![0.0, 1.0]),
        ])
        .await
        .expect("insert records");

    let rows = index
        .query(&[1.0, 0.0], 1, Some(&ids[0]))
        .await
        .expect("query index");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "close");
}

#[tokio::test]
async fn missing_id_has_no_embedding() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let index = open_index(&temp_dir, 2).await;

    let found = index
        .embedding_of("no-such-id' OR '1'='1")
        .await
        .expect("look up record");
    assert!(found.is_none());
}

#[tokio::test]
async fn reopening_keeps_records() {
    let temp_dir = TempDir::new().expect("create temp dir");
    {
        let index = open_index(&temp_dir, 2).await;
        index
            .insert(vec![record("persisted", vec![0.6, 0.8])])
            .await
            .expect("insert record");
    }

    let index = open_index(&temp_dir, 2).await;
    assert_eq!(index.count().await.expect("count rows"), 1);
}

#[tokio::test]
async fn reopening_with_other_dimension_fails() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let _ = open_index(&temp_dir, 2).await;

    let uri = temp_dir.path().join("vectors");
    let result = LanceIndex::connect(&uri.to_string_lossy(), "embeddings", 4).await;
    assert!(matches!(result, Err(RagError::Store(_))));
}

#[tokio::test]
async fn small_tables_skip_vector_index() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let index = open_index(&temp_dir, 2).await;
    index
        .insert(vec![record("only", vec![1.0, 0.0])])
        .await
        .expect("insert record");

    assert!(!index.create_vector_index().await.expect("index request"));
}

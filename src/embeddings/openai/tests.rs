use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> OpenAiEmbeddings {
    let config = ApiConfig {
        base_url: format!("{}/v1", server.uri()),
        api_key: "test-key".to_string(),
        embedding_model: "text-embedding-test".to_string(),
        ..ApiConfig::default()
    };
    OpenAiEmbeddings::new(&config).expect("should create client")
}

#[test]
fn client_configuration() {
    let config = ApiConfig {
        base_url: "http://test-host:1234/v1".to_string(),
        embedding_model: "test-model".to_string(),
        batch_size: 128,
        ..ApiConfig::default()
    };
    let client = OpenAiEmbeddings::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.endpoint.as_str(), "http://test-host:1234/v1/embeddings");
}

#[test]
fn client_builder_methods() {
    let client = OpenAiEmbeddings::new(&ApiConfig::default())
        .expect("Failed to create client")
        .with_model("other-model")
        .with_batch_size(0)
        .with_timeout(Duration::from_secs(5));

    assert_eq!(client.model(), "other-model");
    assert_eq!(client.batch_size, 1);
}

#[test]
fn error_message_extraction() {
    let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
    assert_eq!(
        api_error_message(401, body),
        "HTTP 401: Incorrect API key provided"
    );
    assert_eq!(api_error_message(502, ""), "HTTP 502");
    assert_eq!(api_error_message(500, "oops"), "HTTP 500: oops");
}

#[test]
fn responses_are_reordered_by_index() {
    let data = vec![
        EmbeddingData {
            index: 1,
            embedding: vec![2.0],
        },
        EmbeddingData {
            index: 0,
            embedding: vec![1.0],
        },
    ];
    let ordered = order_by_index(data, 2).expect("indices are complete");
    assert_eq!(ordered, vec![vec![1.0], vec![2.0]]);
}

#[test]
fn duplicate_indices_are_rejected() {
    let data = vec![
        EmbeddingData {
            index: 0,
            embedding: vec![1.0],
        },
        EmbeddingData {
            index: 0,
            embedding: vec![2.0],
        },
    ];
    assert!(order_by_index(data, 2).is_err());
}

#[tokio::test]
async fn embeds_batch_against_api() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "text-embedding-test",
            "input": ["alpha", "beta"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
            ],
            "model": "text-embedding-test"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let embeddings = client
        .embed_batch(&["alpha".to_string(), "beta".to_string()])
        .await
        .expect("embedding should succeed");

    assert_eq!(embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn splits_requests_by_batch_size() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"index": 0, "embedding": [0.5]},
                {"index": 1, "embedding": [0.5]}
            ]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server).with_batch_size(2);
    let inputs: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
    let embeddings = client
        .embed_batch(&inputs)
        .await
        .expect("embedding should succeed");

    assert_eq!(embeddings.len(), 4);
}

#[tokio::test]
async fn api_errors_carry_upstream_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached", "type": "requests"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client.embed_batch(&["hello".to_string()]).await;

    match result {
        Err(RagError::EmbeddingService(message)) => {
            assert!(message.contains("429"));
            assert!(message.contains("Rate limit reached"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn count_mismatch_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "embedding": [0.5]}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .embed_batch(&["a".to_string(), "b".to_string()])
        .await;

    assert!(matches!(result, Err(RagError::EmbeddingService(_))));
}

#[tokio::test]
async fn empty_input_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let embeddings = client.embed_batch(&[]).await.expect("no-op succeeds");
    assert!(embeddings.is_empty());
}

use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> OpenAiChat {
    let config = ApiConfig {
        base_url: format!("{}/v1", server.uri()),
        api_key: "test-key".to_string(),
        chat_model: "chat-test".to_string(),
        ..ApiConfig::default()
    };
    OpenAiChat::new(&config).expect("should create client")
}

fn sse_body(tokens: &[&str]) -> String {
    let mut body = String::new();
    for token in tokens {
        let chunk = json!({"choices": [{"index": 0, "delta": {"content": token}}]});
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

async fn collect(mut rx: mpsc::Receiver<Result<String>>) -> Vec<Result<String>> {
    let mut items = Vec::new();
    while let Some(item) = rx.recv().await {
        items.push(item);
    }
    items
}

#[test]
fn stream_line_parsing() {
    assert_eq!(
        parse_stream_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#).expect("parse"),
        StreamLine::Token("Hi".to_string())
    );
    assert_eq!(
        parse_stream_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#)
            .expect("parse"),
        StreamLine::Skip
    );
    assert_eq!(
        parse_stream_line(r#"data: {"choices":[]}"#).expect("parse"),
        StreamLine::Skip
    );
    assert_eq!(parse_stream_line("").expect("parse"), StreamLine::Skip);
    assert_eq!(
        parse_stream_line(": keep-alive").expect("parse"),
        StreamLine::Skip
    );
    assert_eq!(
        parse_stream_line("data: [DONE]").expect("parse"),
        StreamLine::Finished
    );
    assert!(parse_stream_line("data: {not json").is_err());
    assert!(matches!(
        parse_stream_line(r#"data: {"error":{"message":"overloaded"}}"#),
        Err(RagError::GenerationService(m)) if m == "overloaded"
    ));
}

#[test]
fn client_configuration() {
    let config = ApiConfig {
        base_url: "http://test-host:1234/v1/".to_string(),
        chat_model: "some-model".to_string(),
        ..ApiConfig::default()
    };
    let client = OpenAiChat::new(&config).expect("create client");

    assert_eq!(
        client.endpoint.as_str(),
        "http://test-host:1234/v1/chat/completions"
    );
    assert_eq!(client.model(), "some-model");
    assert_eq!(client.with_model("other").model(), "other");
}

#[tokio::test]
async fn streams_tokens_in_order() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "chat-test",
            "stream": true,
            "max_tokens": 2000,
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&["Hel", "lo", "!"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let items = collect(client.stream_chat(vec![ChatMessage::user("hi")])).await;

    let tokens: Vec<String> = items
        .into_iter()
        .map(|item| item.expect("token"))
        .collect();
    assert_eq!(tokens, vec!["Hel", "lo", "!"]);
}

#[tokio::test]
async fn upstream_error_is_final_item() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let items = collect(client.stream_chat(vec![ChatMessage::user("hi")])).await;

    assert_eq!(items.len(), 1);
    match &items[0] {
        Err(RagError::GenerationService(message)) => {
            assert!(message.contains("401"));
            assert!(message.contains("Incorrect API key provided"));
        }
        other => panic!("unexpected item: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_chunk_stops_stream_with_error() {
    let server = MockServer::start().await;

    let body = format!(
        "data: {}\n\ndata: {{broken\n\n",
        json!({"choices": [{"delta": {"content": "partial"}}]})
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let items = collect(client.stream_chat(vec![ChatMessage::user("hi")])).await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().expect("token"), "partial");
    assert!(matches!(items[1], Err(RagError::GenerationService(_))));
}

#[tokio::test]
async fn scripted_completion_replays_tokens_then_fails() {
    let completion = ScriptedCompletion::new(["a", "b"]).then_fail("cut off");
    let items = collect(completion.stream_chat(vec![ChatMessage::user("q")])).await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[1].as_ref().expect("token"), "b");
    assert!(matches!(items[2], Err(RagError::GenerationService(_))));
    assert_eq!(completion.requests().len(), 1);
}

#[tokio::test]
async fn body_without_done_marker_is_truncated() {
    let server = MockServer::start().await;

    let body = format!(
        "data: {}\n\n",
        json!({"choices": [{"delta": {"content": "half an ans"}}]})
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let items = collect(client.stream_chat(vec![ChatMessage::user("hi")])).await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().expect("token"), "half an ans");
    match &items[1] {
        Err(RagError::GenerationService(message)) => assert!(message.contains("[DONE]")),
        other => panic!("unexpected item: {other:?}"),
    }
}

/// Serve one request with an SSE body that emits a token every `interval`
fn slow_sse_server(tokens: &'static [&'static str], interval: Duration) -> String {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("local addr");

    std::thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept connection");
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read request line");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().expect("content length");
                }
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).expect("read request body");

        let mut stream = stream;
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
            )
            .expect("write head");
        for token in tokens {
            std::thread::sleep(interval);
            let chunk = json!({"choices": [{"delta": {"content": token}}]});
            stream
                .write_all(format!("data: {}\n\n", chunk).as_bytes())
                .expect("write chunk");
            stream.flush().expect("flush chunk");
        }
        stream.write_all(b"data: [DONE]\n\n").expect("write done");
    });

    format!("http://{}/v1", addr)
}

#[tokio::test]
async fn long_stream_outlives_request_timeout() {
    let base_url = slow_sse_server(&["one ", "two ", "three ", "four"], Duration::from_millis(400));
    let config = ApiConfig {
        base_url,
        timeout_seconds: 1,
        ..ApiConfig::default()
    };
    let client = OpenAiChat::new(&config).expect("create client");

    let items = collect(client.stream_chat(vec![ChatMessage::user("count")])).await;

    let tokens: Vec<String> = items
        .into_iter()
        .map(|item| item.expect("token"))
        .collect();
    assert_eq!(tokens, vec!["one ", "two ", "three ", "four"]);
}

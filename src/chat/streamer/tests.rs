use super::*;
use crate::chat::completion::ScriptedCompletion;
use crate::chat::events::{RETRIEVAL_FAILED_PREFIX, RetrievalUpdate};
use crate::chat::messages::Role;
use crate::database::{NewRecord, VectorStore};
use crate::embeddings::MockEmbeddings;

const QUESTION: &str = "Tell me about pets";

async fn retriever() -> Retriever {
    let embedder = Arc::new(MockEmbeddings::new(2).with_vector(QUESTION, vec![1.0, 0.0]));
    let store = Arc::new(VectorStore::in_memory(2));
    store
        .insert_many(vec![
            NewRecord {
                embedding: vec![1.0, 0.0],
                content: "Cats are independent pets.".to_string(),
            },
            NewRecord {
                embedding: vec![0.9, 0.2],
                content: "Dogs are loyal pets.".to_string(),
            },
        ])
        .await
        .expect("seed store");
    Retriever::new(embedder, store, 0.01)
}

async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[test]
fn system_prompt_numbers_references() {
    let results = vec![
        SimilarityResult {
            id: "1".to_string(),
            content: "first".to_string(),
            similarity: 0.9,
        },
        SimilarityResult {
            id: "2".to_string(),
            content: "second".to_string(),
            similarity: 0.8,
        },
    ];

    assert_eq!(
        build_system_prompt(None, &results),
        "[reference 1]\nfirst\n\n[reference 2]\nsecond"
    );
    assert_eq!(
        build_system_prompt(Some("Answer from the references."), &results[..1]),
        "Answer from the references.\n\n[reference 1]\nfirst"
    );
    assert_eq!(build_system_prompt(Some("  "), &[]), "");
    assert_eq!(build_system_prompt(Some("Only this"), &[]), "Only this");
}

#[tokio::test]
async fn streams_tokens_then_done() {
    let completion = Arc::new(ScriptedCompletion::new(["Hel", "lo"]));
    let streamer = ResponseStreamer::new(retriever().await, completion.clone());

    let events = collect(streamer.spawn(vec![ChatMessage::user(QUESTION)])).await;

    assert_eq!(events.len(), 5);
    assert_eq!(events[0], StreamEvent::searching());
    match &events[1] {
        StreamEvent::Retrieval(RetrievalUpdate::Found { results, count }) => {
            assert_eq!(*count, 2);
            assert_eq!(results[0].content, "Cats are independent pets.");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(events[2], StreamEvent::content("Hel", "Hel"));
    assert_eq!(events[3], StreamEvent::content("lo", "Hello"));
    assert_eq!(
        events[4],
        StreamEvent::Done {
            message: crate::chat::events::DONE_MESSAGE.to_string(),
            total_length: 5,
            retrieval_count: 2,
        }
    );
    assert_eq!(
        events.iter().filter(|e| matches!(e, StreamEvent::Done { .. })).count(),
        1
    );
}

#[tokio::test]
async fn prepends_system_message_with_references() {
    let completion = Arc::new(ScriptedCompletion::new(["ok"]));
    let streamer = ResponseStreamer::new(retriever().await, completion.clone())
        .with_preamble(Some("Use the references.".to_string()));

    let history = vec![
        ChatMessage::user("Hi"),
        ChatMessage::assistant("Hello! How can I help?"),
        ChatMessage::user(QUESTION),
    ];
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let phase = streamer.run(history, tx).await;
    assert_eq!(phase, StreamPhase::Done);
    assert_eq!(collect(rx).await.len(), 4);

    let requests = completion.requests();
    assert_eq!(requests.len(), 1);
    let conversation = &requests[0];
    assert_eq!(conversation.len(), 4);
    assert_eq!(conversation[0].role, Role::System);
    assert_eq!(
        conversation[0].text(),
        "Use the references.\n\n[reference 1]\nCats are independent pets.\n\n[reference 2]\nDogs are loyal pets."
    );
    assert_eq!(conversation[3].text(), QUESTION);
}

#[tokio::test]
async fn retrieval_failure_ends_with_error() {
    let embedder = Arc::new(MockEmbeddings::new(2).failing("quota exceeded"));
    let retriever = Retriever::new(embedder, Arc::new(VectorStore::in_memory(2)), 0.01);
    let completion = Arc::new(ScriptedCompletion::new(["never"]));
    let streamer = ResponseStreamer::new(retriever, completion.clone());

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let phase = streamer.run(vec![ChatMessage::user(QUESTION)], tx).await;
    let events = collect(rx).await;

    assert_eq!(phase, StreamPhase::Errored);
    assert_eq!(events.len(), 2);
    match &events[1] {
        StreamEvent::Error { message } => {
            assert!(message.starts_with(RETRIEVAL_FAILED_PREFIX));
            assert!(message.contains("quota exceeded"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(completion.requests().is_empty());
}

#[tokio::test]
async fn generation_failure_ends_without_done() {
    let completion = Arc::new(ScriptedCompletion::new(["partial"]).then_fail("stream reset"));
    let streamer = ResponseStreamer::new(retriever().await, completion);

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let phase = streamer.run(vec![ChatMessage::user(QUESTION)], tx).await;
    let events = collect(rx).await;

    assert_eq!(phase, StreamPhase::Errored);
    assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Done { .. })));
    assert_eq!(events[2], StreamEvent::content("partial", "partial"));
}

#[tokio::test]
async fn empty_retrieval_still_generates() {
    let embedder = Arc::new(MockEmbeddings::new(2));
    let retriever = Retriever::new(embedder, Arc::new(VectorStore::in_memory(2)), 0.01);
    let streamer = ResponseStreamer::new(retriever, Arc::new(ScriptedCompletion::new(["hi"])));

    let events = collect(streamer.spawn(vec![ChatMessage::user(QUESTION)])).await;

    assert_eq!(events[1], StreamEvent::found(Vec::new()));
    assert_eq!(events.last(), Some(&StreamEvent::done("hi", 0)));
}

#[tokio::test]
async fn dropped_receiver_stops_relay() {
    let tokens: Vec<String> = (0..500).map(|i| format!("t{i} ")).collect();
    let streamer = ResponseStreamer::new(
        retriever().await,
        Arc::new(ScriptedCompletion::new(tokens)),
    );

    let (tx, mut rx) = mpsc::channel(1);
    let handle = tokio::spawn({
        let streamer = streamer.clone();
        async move { streamer.run(vec![ChatMessage::user(QUESTION)], tx).await }
    });

    assert_eq!(rx.recv().await, Some(StreamEvent::searching()));
    drop(rx);

    let phase = handle.await.expect("streamer task");
    assert_ne!(phase, StreamPhase::Done);
}

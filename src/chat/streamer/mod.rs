// Response streamer
// Retrieval, prompt assembly and token relay for one chat request

#[cfg(test)]
mod tests;

use itertools::Itertools;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chat::completion::ChatCompletion;
use crate::chat::events::StreamEvent;
use crate::chat::messages::{ChatMessage, query_text};
use crate::database::SimilarityResult;
use crate::retrieval::{DEFAULT_TOP_K, Retriever};

/// Events buffered between the streamer and its consumer
pub const EVENT_BUFFER: usize = 64;

/// Where a streamed response ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Retrieving,
    Generating,
    Done,
    Errored,
}

/// Build the system message content: the optional preamble followed by each
/// passage under a numbered `[reference N]` label.
#[inline]
pub fn build_system_prompt(preamble: Option<&str>, results: &[SimilarityResult]) -> String {
    let references = results
        .iter()
        .enumerate()
        .map(|(i, result)| format!("[reference {}]\n{}", i + 1, result.content))
        .join("\n\n");

    match preamble.map(str::trim).filter(|p| !p.is_empty()) {
        Some(preamble) if references.is_empty() => preamble.to_string(),
        Some(preamble) => format!("{}\n\n{}", preamble, references),
        None => references,
    }
}

/// Drives one chat request from retrieval to the final event
#[derive(Clone)]
pub struct ResponseStreamer {
    retriever: Retriever,
    completion: Arc<dyn ChatCompletion>,
    top_k: usize,
    preamble: Option<String>,
}

impl ResponseStreamer {
    #[inline]
    pub fn new(retriever: Retriever, completion: Arc<dyn ChatCompletion>) -> Self {
        Self {
            retriever,
            completion,
            top_k: DEFAULT_TOP_K,
            preamble: None,
        }
    }

    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[inline]
    pub fn with_preamble(mut self, preamble: Option<String>) -> Self {
        self.preamble = preamble;
        self
    }

    /// Run the request on its own task and return the event stream.
    ///
    /// The channel closes once the final `done` or `error` event has been sent.
    #[inline]
    pub fn spawn(&self, messages: Vec<ChatMessage>) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let streamer = self.clone();

        tokio::spawn(async move {
            let phase = streamer.run(messages, tx).await;
            debug!("Chat stream ended in phase {:?}", phase);
        });

        rx
    }

    /// Stream the response to `messages` into `tx` and report the final phase.
    ///
    /// `tx` is consumed, so the channel closes when this returns.
    #[inline]
    pub async fn run(&self, messages: Vec<ChatMessage>, tx: mpsc::Sender<StreamEvent>) -> StreamPhase {
        let query = query_text(&messages).unwrap_or_default().to_string();

        // Retrieving
        if tx.send(StreamEvent::searching()).await.is_err() {
            return StreamPhase::Retrieving;
        }

        let results = match self.retriever.retrieve(&query, self.top_k).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Retrieval failed: {}", e);
                let _ = tx.send(StreamEvent::retrieval_failed(&e)).await;
                return StreamPhase::Errored;
            }
        };

        let retrieval_count = results.len();
        let system_prompt = build_system_prompt(self.preamble.as_deref(), &results);
        if tx.send(StreamEvent::found(results)).await.is_err() {
            return StreamPhase::Retrieving;
        }

        let mut conversation = Vec::with_capacity(messages.len() + 1);
        conversation.push(ChatMessage::system(system_prompt));
        conversation.extend(messages);

        // Generating
        let mut tokens = self.completion.stream_chat(conversation);
        let mut accumulated = String::new();

        while let Some(item) = tokens.recv().await {
            match item {
                Ok(token) => {
                    accumulated.push_str(&token);
                    let event = StreamEvent::content(token, accumulated.as_str());
                    if tx.send(event).await.is_err() {
                        debug!("Event receiver dropped, stopping token relay");
                        return StreamPhase::Generating;
                    }
                }
                Err(e) => {
                    warn!("Generation failed: {}", e);
                    let _ = tx.send(StreamEvent::error(e.to_string())).await;
                    return StreamPhase::Errored;
                }
            }
        }

        info!(
            "Streamed {} characters using {} retrieved passages",
            accumulated.chars().count(),
            retrieval_count
        );
        let _ = tx
            .send(StreamEvent::done(&accumulated, retrieval_count))
            .await;
        StreamPhase::Done
    }
}

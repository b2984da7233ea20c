//! Completion stand-in that replays a fixed list of tokens.

use std::sync::Mutex;
use tokio::sync::mpsc;

use super::{ChatCompletion, TOKEN_BUFFER};
use crate::chat::messages::ChatMessage;
use crate::{RagError, Result};

#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    tokens: Vec<String>,
    failure: Option<String>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompletion {
    #[inline]
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// After the scripted tokens, fail with a generation error carrying `message`
    #[inline]
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Conversations received so far, in call order
    #[inline]
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl ChatCompletion for ScriptedCompletion {
    fn stream_chat(&self, messages: Vec<ChatMessage>) -> mpsc::Receiver<Result<String>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages);
        }

        let (tx, rx) = mpsc::channel(TOKEN_BUFFER);
        let tokens = self.tokens.clone();
        let failure = self.failure.clone();

        tokio::spawn(async move {
            for token in tokens {
                if tx.send(Ok(token)).await.is_err() {
                    return;
                }
            }
            if let Some(message) = failure {
                let _ = tx.send(Err(RagError::GenerationService(message))).await;
            }
        });

        rx
    }
}

//! Scripted LLM provider — replays queued replies in order and records every
//! request it receives. Drives the pipeline deterministically in tests and
//! offline demos. Not selectable from config.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::llm::{ChatMessage, LlmResponse, ProviderError};

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Result<String, String>>,
    requests: Vec<Vec<ChatMessage>>,
}

/// Clones share the same script, so a test can keep one handle for
/// inspection while the pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let p = Self::new();
        for r in replies {
            p.push_reply(r);
        }
        p
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock().replies.push_back(Ok(reply.into()));
    }

    /// Queue a transport-style failure for the next call.
    pub fn push_error(&self, message: impl Into<String>) {
        self.lock().replies.push_back(Err(message.into()));
    }

    /// Every message list received so far, oldest first.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.lock().requests.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse, ProviderError> {
        let mut script = self.lock();
        script.requests.push(messages.to_vec());
        match script.replies.pop_front() {
            Some(Ok(text)) => Ok(LlmResponse { text, usage: None }),
            Some(Err(e)) => Err(ProviderError::Request(e)),
            None => Err(ProviderError::Request("scripted provider has no reply queued".into())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A panic while holding the lock only happens inside a failing test.
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

//! Chat executor — answers one message inside a persona thread and records
//! the exchange.

use tracing::debug;

use crate::error::AppError;
use crate::llm::{ChatMessage, LlmProvider};
use crate::subsystems::memory::{ConversationTurn, MemorySystem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub reply: String,
    pub persona_name: String,
}

#[derive(Clone)]
pub struct ChatExecutor {
    provider: LlmProvider,
    memory: MemorySystem,
    history_window: usize,
}

impl ChatExecutor {
    pub fn new(provider: LlmProvider, memory: MemorySystem, history_window: usize) -> Self {
        Self { provider, memory, history_window }
    }

    /// Send system prompt + recent thread + `message` to the LLM, then store
    /// the user/assistant pair atomically. Nothing is stored if the LLM call
    /// fails.
    pub async fn execute(
        &self,
        user_id: &str,
        persona_name: &str,
        system_prompt: &str,
        message: &str,
    ) -> Result<ChatReply, AppError> {
        let history = self
            .memory
            .thread(user_id, persona_name, Some(self.history_window))
            .await?;
        let messages = build_messages(system_prompt, &history, message);

        debug!(user_id, persona_name, history = history.len(), "executing chat");
        let response = self.provider.complete(&messages).await?;

        self.memory
            .append_exchange(user_id, persona_name, message, &response.text)
            .await?;

        Ok(ChatReply { reply: response.text, persona_name: persona_name.to_string() })
    }
}

fn build_messages(system_prompt: &str, history: &[ConversationTurn], message: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(history.iter().map(|turn| ChatMessage {
        role: turn.role.into(),
        content: turn.message.clone(),
    }));
    messages.push(ChatMessage::user(message));
    messages
}

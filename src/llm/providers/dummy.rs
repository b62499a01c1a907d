//! Dummy LLM provider — echoes the last message back prefixed with `[echo]`.
//! Lets the whole pipeline run without an API key.

use crate::llm::{ChatMessage, LlmResponse, ProviderError};

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse, ProviderError> {
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        Ok(LlmResponse { text: format!("[echo] {last}"), usage: None })
    }
}

//! Prompt synthesizer — produces the system prompt for a persona once and
//! memoizes it in the persona store.

use std::path::PathBuf;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::llm::{ChatMessage, LlmProvider};
use crate::subsystems::memory::MemorySystem;

use super::prompt::PromptBuilder;

pub const PERSONA_PROMPT_FILE: &str = "persona_prompt.md";

const BUILTIN_INSTRUCTIONS: &str = "\
You write system prompts for an AI assistant.
Given the name of a profession or role, write a single, clear system prompt that tells the assistant how to behave as an expert in that profession.
Focus on communication style, goals, and how they should respond to user questions.";

/// A persona prompt plus whether this call generated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaPrompt {
    pub prompt: String,
    pub generated: bool,
}

#[derive(Clone)]
pub struct PromptSynthesizer {
    provider: LlmProvider,
    memory: MemorySystem,
    prompts_dir: PathBuf,
}

impl PromptSynthesizer {
    pub fn new(provider: LlmProvider, memory: MemorySystem, prompts_dir: impl Into<PathBuf>) -> Self {
        Self { provider, memory, prompts_dir: prompts_dir.into() }
    }

    /// Return the stored prompt for `(user_id, profession)`, generating and
    /// storing it on first use. A stored prompt is never regenerated.
    pub async fn get_or_create(&self, user_id: &str, profession: &str) -> Result<PersonaPrompt, AppError> {
        if let Some(persona) = self.memory.persona(user_id, profession).await? {
            debug!(user_id, profession, "persona prompt cache hit");
            return Ok(PersonaPrompt { prompt: persona.prompt, generated: false });
        }

        let candidate = self.generate(profession).await?;
        let (persona, inserted) = self
            .memory
            .insert_persona_if_absent(user_id, profession, &candidate)
            .await?;

        if inserted {
            info!(user_id, profession, prompt_len = persona.prompt.len(), "persona created");
        } else {
            debug!(user_id, profession, "persona created concurrently — using stored prompt");
        }
        Ok(PersonaPrompt { prompt: persona.prompt, generated: inserted })
    }

    async fn generate(&self, profession: &str) -> Result<String, AppError> {
        let instructions = PromptBuilder::new(&self.prompts_dir)
            .layer_or(PERSONA_PROMPT_FILE, BUILTIN_INSTRUCTIONS)
            .var("profession", profession)
            .build();
        let request = json!({
            "profession_name": profession,
            "instruction": "Write a system prompt for an AI that is acting as this profession.",
        });
        let messages = [ChatMessage::system(instructions), ChatMessage::user(request.to_string())];

        let response = self.provider.complete(&messages).await?;
        let prompt = response.text.trim();
        if prompt.is_empty() {
            warn!(profession, "empty persona prompt from LLM — using generic prompt");
            return Ok(fallback_prompt(profession));
        }
        Ok(prompt.to_string())
    }
}

/// Generic persona prompt used when the LLM returns nothing.
pub fn fallback_prompt(profession: &str) -> String {
    format!(
        "You are an AI assistant acting as a professional {profession}. \
         Answer as a knowledgeable, helpful {profession}, using the tone, priorities, \
         and expertise that such a professional would use."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::scripted::ScriptedProvider;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, MemorySystem, ScriptedProvider, PromptSynthesizer) {
        let tmp = TempDir::new().unwrap();
        let memory = MemorySystem::open(&tmp.path().join("persona.db")).unwrap();
        memory.ensure_user("42").await.unwrap();
        let script = ScriptedProvider::new();
        let synth = PromptSynthesizer::new(
            LlmProvider::Scripted(script.clone()),
            memory.clone(),
            tmp.path().join("prompts"),
        );
        (tmp, memory, script, synth)
    }

    #[tokio::test]
    async fn second_call_hits_the_store() {
        let (_tmp, memory, script, synth) = setup().await;
        script.push_reply("You are a patient teacher.");

        let first = synth.get_or_create("42", "teacher").await.unwrap();
        assert!(first.generated);
        assert_eq!(first.prompt, "You are a patient teacher.");

        let second = synth.get_or_create("42", "teacher").await.unwrap();
        assert!(!second.generated);
        assert_eq!(second.prompt, first.prompt);
        assert_eq!(script.call_count(), 1);

        let stored = memory.persona("42", "teacher").await.unwrap().unwrap();
        assert_eq!(stored.prompt, first.prompt);
    }

    #[tokio::test]
    async fn request_names_the_profession() {
        let (_tmp, _memory, script, synth) = setup().await;
        script.push_reply("prompt");
        synth.get_or_create("42", "investor").await.unwrap();

        let request = &script.requests()[0];
        let body: serde_json::Value = serde_json::from_str(&request[1].content).unwrap();
        assert_eq!(body["profession_name"], "investor");
        assert!(request[0].content.contains("system prompts"));
    }

    #[tokio::test]
    async fn empty_completion_falls_back_to_generic_prompt() {
        let (_tmp, _memory, script, synth) = setup().await;
        script.push_reply("   ");
        let p = synth.get_or_create("42", "lawyer").await.unwrap();
        assert_eq!(p.prompt, fallback_prompt("lawyer"));
        assert!(p.prompt.contains("professional lawyer"));
    }

    #[tokio::test]
    async fn template_file_overrides_builtin_and_sees_profession() {
        let (tmp, _memory, script, synth) = setup().await;
        let dir = tmp.path().join("prompts");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(PERSONA_PROMPT_FILE), "Write a prompt for a {{profession}}.").unwrap();
        script.push_reply("prompt");

        synth.get_or_create("42", "sales coach").await.unwrap();
        assert_eq!(script.requests()[0][0].content, "Write a prompt for a sales coach.");
    }

    #[tokio::test]
    async fn provider_failure_stores_nothing() {
        let (_tmp, memory, script, synth) = setup().await;
        script.push_error("timeout");
        assert!(matches!(synth.get_or_create("42", "teacher").await, Err(AppError::Llm(_))));
        assert!(memory.persona("42", "teacher").await.unwrap().is_none());
    }
}

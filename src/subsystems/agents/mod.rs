//! Agents subsystem — the persona pipeline.
//!
//! One chat request runs four fixed steps:
//!
//! ```text
//! initialize ─▶ validate_user ─▶ handle_persona ─▶ execute_chat
//!                  (users)         (detector)       (synthesizer + executor)
//! ```
//!
//! The only branch is the detector's switch / no-switch decision. An
//! unparsable detector reply keeps the entry persona; any LLM or store
//! failure ends the run with an error and no reply.

pub mod detector;
pub mod executor;
pub mod prompt;
pub mod synthesizer;

use tracing::{debug, info, info_span, Instrument};

use crate::config::AgentsConfig;
use crate::error::AppError;
use crate::llm::LlmProvider;
use crate::subsystems::memory::MemorySystem;

use detector::{ProfessionDetector, normalize_profession};
use executor::ChatExecutor;
use synthesizer::PromptSynthesizer;

/// Inbound chat message.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
    /// Thread the caller is currently in, if it tracks one.
    pub persona_name: Option<String>,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutcome {
    pub user_id: String,
    pub reply: String,
    /// Persona the reply was produced under (differs from the entry persona
    /// after a switch).
    pub persona_name: String,
    pub switched: bool,
    pub user_created: bool,
    pub persona_created: bool,
}

/// Transient per-run state, owned by [`PersonaPipeline::run`].
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub user_id: String,
    pub message: String,
    pub entry_persona: String,
    pub active_persona: String,
    pub should_switch: bool,
    pub user_created: bool,
    pub persona_created: bool,
    pub reply: Option<String>,
}

/// Service context for chat: owns the provider handle, the memory system
/// and the three agents. Built once at startup and shared by reference.
#[derive(Clone)]
pub struct PersonaPipeline {
    memory: MemorySystem,
    default_persona: String,
    detector: ProfessionDetector,
    synthesizer: PromptSynthesizer,
    executor: ChatExecutor,
}

impl PersonaPipeline {
    pub fn new(provider: LlmProvider, memory: MemorySystem, config: &AgentsConfig) -> Self {
        let default_persona = normalize_profession(&config.default_persona)
            .unwrap_or_else(|| config.default_persona.clone());
        Self {
            detector: ProfessionDetector::new(provider.clone(), &config.prompts_dir),
            synthesizer: PromptSynthesizer::new(provider.clone(), memory.clone(), &config.prompts_dir),
            executor: ChatExecutor::new(provider, memory.clone(), config.history_window),
            memory,
            default_persona,
        }
    }

    pub fn memory(&self) -> &MemorySystem {
        &self.memory
    }

    /// Run the full pipeline for one message.
    pub async fn run(&self, request: ChatRequest) -> Result<ChatOutcome, AppError> {
        let span = info_span!("chat", user_id = %request.user_id);
        async move {
            let mut state = self.initialize(request).await?;
            self.validate_user(&mut state).await?;
            self.handle_persona(&mut state).await?;
            self.execute_chat(&mut state).await?;
            state.into_outcome()
        }
        .instrument(span)
        .await
    }

    async fn initialize(&self, request: ChatRequest) -> Result<ConversationState, AppError> {
        let user_id = request.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(AppError::InvalidRequest("user_id must not be empty".into()));
        }
        if request.message.trim().is_empty() {
            return Err(AppError::InvalidRequest("message must not be empty".into()));
        }

        let entry_persona = match request.persona_name.as_deref().and_then(normalize_profession) {
            Some(name) => name,
            None => self
                .memory
                .latest_persona(&user_id)
                .await?
                .unwrap_or_else(|| self.default_persona.clone()),
        };
        debug!(%entry_persona, "initialized");

        Ok(ConversationState {
            user_id,
            message: request.message,
            active_persona: entry_persona.clone(),
            entry_persona,
            ..ConversationState::default()
        })
    }

    async fn validate_user(&self, state: &mut ConversationState) -> Result<(), AppError> {
        state.user_created = self.memory.ensure_user(&state.user_id).await?;
        if state.user_created {
            info!("new user registered");
        }
        Ok(())
    }

    async fn handle_persona(&self, state: &mut ConversationState) -> Result<(), AppError> {
        let detection = self.detector.detect(&state.message, &state.entry_persona).await?;

        if let Some(target) = detection.switch_target(&state.entry_persona) {
            info!(from = %state.entry_persona, to = %target, "switching persona");
            state.active_persona = target.to_string();
            state.should_switch = true;
        }
        Ok(())
    }

    async fn execute_chat(&self, state: &mut ConversationState) -> Result<(), AppError> {
        let persona = self
            .synthesizer
            .get_or_create(&state.user_id, &state.active_persona)
            .await?;
        state.persona_created = persona.generated;

        let reply = self
            .executor
            .execute(&state.user_id, &state.active_persona, &persona.prompt, &state.message)
            .await?;

        state.active_persona = reply.persona_name;
        state.reply = Some(reply.reply);
        Ok(())
    }
}

impl ConversationState {
    fn into_outcome(self) -> Result<ChatOutcome, AppError> {
        let reply = self
            .reply
            .ok_or_else(|| AppError::Comms("pipeline finished without a reply".into()))?;
        Ok(ChatOutcome {
            user_id: self.user_id,
            reply,
            persona_name: self.active_persona,
            switched: self.should_switch,
            user_created: self.user_created,
            persona_created: self.persona_created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::providers::scripted::ScriptedProvider;
    use tempfile::TempDir;

    const NO_SWITCH: &str = r#"{"should_switch": false, "profession_name": ""}"#;

    fn pipeline() -> (TempDir, ScriptedProvider, PersonaPipeline) {
        let tmp = TempDir::new().unwrap();
        let config = Config::test_default(tmp.path());
        let memory = MemorySystem::open(&config.database_path).unwrap();
        let script = ScriptedProvider::new();
        let p = PersonaPipeline::new(LlmProvider::Scripted(script.clone()), memory, &config.agents);
        (tmp, script, p)
    }

    fn request(user_id: &str, message: &str) -> ChatRequest {
        ChatRequest { user_id: user_id.into(), message: message.into(), persona_name: None }
    }

    #[tokio::test]
    async fn no_cue_uses_default_persona() {
        let (_tmp, script, p) = pipeline();
        script.push_reply(NO_SWITCH);
        script.push_reply("You are a general expert.");
        script.push_reply("Hello!");

        let out = p.run(request("7", "hi")).await.unwrap();
        assert_eq!(out.persona_name, "general_expert");
        assert_eq!(out.reply, "Hello!");
        assert!(out.user_created);
        assert!(out.persona_created);
        assert!(!out.switched);
    }

    #[tokio::test]
    async fn caller_persona_is_normalized() {
        let (_tmp, script, p) = pipeline();
        script.push_reply(NO_SWITCH);
        script.push_reply("prompt");
        script.push_reply("ok");

        let mut req = request("7", "hi");
        req.persona_name = Some("  Sales Coach ".into());
        let out = p.run(req).await.unwrap();
        assert_eq!(out.persona_name, "sales coach");
    }

    #[tokio::test]
    async fn detector_garbage_keeps_entry_persona() {
        let (_tmp, script, p) = pipeline();
        script.push_reply("not json at all");
        script.push_reply("prompt");
        script.push_reply("ok");

        let out = p.run(request("7", "be a pirate")).await.unwrap();
        assert_eq!(out.persona_name, "general_expert");
        assert!(!out.switched);
    }

    #[tokio::test]
    async fn detector_outage_fails_the_run() {
        let (_tmp, script, p) = pipeline();
        script.push_error("HTTP 503");
        script.push_reply("prompt");
        script.push_reply("answer");

        let err = p.run(request("7", "Act like a lawyer")).await.unwrap_err();
        assert!(matches!(err, AppError::Llm(_)));
        assert_eq!(script.call_count(), 1);
        assert!(p.memory().threads_by_persona("7").await.unwrap().is_empty());
        assert!(p.memory().persona_names("7").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_failure_is_surfaced() {
        let (_tmp, script, p) = pipeline();
        script.push_reply(NO_SWITCH);
        script.push_reply("prompt");
        script.push_error("HTTP 503");

        let err = p.run(request("7", "hi")).await.unwrap_err();
        assert!(matches!(err, AppError::Llm(_)));
        assert!(p.memory().threads_by_persona("7").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_fields_rejected_before_any_call() {
        let (_tmp, script, p) = pipeline();
        assert!(matches!(p.run(request(" ", "hi")).await, Err(AppError::InvalidRequest(_))));
        assert!(matches!(p.run(request("7", "  ")).await, Err(AppError::InvalidRequest(_))));
        assert_eq!(script.call_count(), 0);
        assert!(!p.memory().user_exists("7").await.unwrap());
    }
}

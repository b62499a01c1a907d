//! Profession detector — one LLM round trip deciding whether the user asked
//! the assistant to adopt a (new) profession.
//!
//! The model gets `{"message", "current_profession"}` and must answer with
//! `{"should_switch": bool, "profession_name": "..."}`. A reply that does not
//! parse fails closed: [`ProfessionDetector::detect`] reports "no switch" and
//! the caller keeps its current persona. Provider failures are returned.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, LlmProvider, ProviderError};

use super::prompt::PromptBuilder;

pub const DETECT_PROMPT_FILE: &str = "detect_profession.md";

const BUILTIN_INSTRUCTIONS: &str = "\
You extract the profession or role a user wants an AI assistant to adopt.
You are given a JSON object with two fields: `message` and `current_profession`.
Respond ONLY with JSON in the form:
{\"should_switch\": true or false, \"profession_name\": \"<profession or empty>\"}.
If the user clearly asks the assistant to act or behave like some profession or role, set should_switch to true and profession_name to a short noun phrase like \"teacher\", \"investor\", \"lawyer\", \"sales coach\".
If they do NOT ask for any profession or role change, set should_switch to false and profession_name to the current_profession (which may be empty).";

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("unparsable detection response: {0}")]
    Unparsable(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Outcome of one detection call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Detection {
    pub should_switch: bool,
    /// Normalized profession name; `None` when the model named nothing.
    pub profession_name: Option<String>,
}

impl Detection {
    /// "No switch" — what an unparsable reply collapses to.
    pub fn keep() -> Self {
        Self::default()
    }

    /// The persona to switch to, if this detection asks for a real change
    /// away from `current`.
    pub fn switch_target(&self, current: &str) -> Option<&str> {
        if !self.should_switch {
            return None;
        }
        self.profession_name
            .as_deref()
            .filter(|name| !name.eq_ignore_ascii_case(current.trim()))
    }
}

#[derive(Debug, Clone)]
pub struct ProfessionDetector {
    provider: LlmProvider,
    prompts_dir: PathBuf,
}

impl ProfessionDetector {
    pub fn new(provider: LlmProvider, prompts_dir: impl Into<PathBuf>) -> Self {
        Self { provider, prompts_dir: prompts_dir.into() }
    }

    /// Detect a profession cue. An unparsable reply means "no switch"; a
    /// failed LLM call is an error.
    pub async fn detect(&self, message: &str, current_persona: &str) -> Result<Detection, ProviderError> {
        match self.try_detect(message, current_persona).await {
            Ok(detection) => Ok(detection),
            Err(DetectionError::Unparsable(raw)) => {
                warn!(reply = %raw, current_persona, "unparsable profession detection — keeping current persona");
                Ok(Detection::keep())
            }
            Err(DetectionError::Provider(e)) => Err(e),
        }
    }

    pub async fn try_detect(
        &self,
        message: &str,
        current_persona: &str,
    ) -> Result<Detection, DetectionError> {
        let payload = json!({
            "message": message,
            "current_profession": current_persona,
        });
        let messages = [
            ChatMessage::system(self.instructions()),
            ChatMessage::user(payload.to_string()),
        ];

        let response = self.provider.complete(&messages).await?;
        let detection = parse_detection(&response.text)?;
        debug!(
            should_switch = detection.should_switch,
            profession = ?detection.profession_name,
            "profession detection result"
        );
        Ok(detection)
    }

    fn instructions(&self) -> String {
        PromptBuilder::new(&self.prompts_dir)
            .layer_or(DETECT_PROMPT_FILE, BUILTIN_INSTRUCTIONS)
            .build()
    }
}

#[derive(Deserialize)]
struct RawDetection {
    #[serde(default)]
    should_switch: Option<Value>,
    #[serde(default)]
    profession_name: Option<String>,
}

/// Parse a detector reply. Tolerates Markdown fences and prose around the
/// first JSON object.
pub fn parse_detection(raw: &str) -> Result<Detection, DetectionError> {
    let object = extract_json_object(raw)
        .ok_or_else(|| DetectionError::Unparsable(format!("no JSON object in: {raw:?}")))?;
    let parsed: RawDetection = serde_json::from_str(object)
        .map_err(|e| DetectionError::Unparsable(format!("{e}: {object:?}")))?;

    let should_switch = match parsed.should_switch {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("true") => true,
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("false") => false,
        Some(other) => {
            return Err(DetectionError::Unparsable(format!("should_switch is not a boolean: {other}")));
        }
    };

    Ok(Detection {
        should_switch,
        profession_name: parsed.profession_name.as_deref().and_then(normalize_profession),
    })
}

/// Trim, collapse internal whitespace and lower-case. Empty names are `None`.
pub fn normalize_profession(name: &str) -> Option<String> {
    let normalized = name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

/// Slice out the first balanced `{...}` object, skipping braces inside
/// string literals.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` (or the path given with `-f`), then applies
//! `PERSONA_BOT_LOG_LEVEL`, `PERSONA_BOT_BIND` and `DATABASE_URL` overrides.
//! The LLM API key comes from `LLM_API_KEY` (or `OPENAI_API_KEY`) only.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// OpenAI / OpenAI-compatible provider configuration (`[llm.openai]`).
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    pub model: String,
    /// Sampling temperature (ignored for models that forbid it).
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// LLM configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Active provider (`"dummy"` or `"openai"`). `default` in the TOML.
    pub provider: String,
    pub openai: OpenAiConfig,
}

/// Persona pipeline configuration (`[agents]`).
#[derive(Debug, Clone)]
pub struct AgentsConfig {
    /// Persona used when neither the request nor the user's history names one.
    pub default_persona: String,
    /// Number of most recent turns sent to the LLM as context.
    pub history_window: usize,
    /// Directory holding the detector / synthesizer prompt templates.
    pub prompts_dir: PathBuf,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    /// Socket address for the HTTP listener.
    pub bind: String,
    pub log_level: String,
    /// SQLite database file (already expanded, no `~`).
    pub database_path: PathBuf,
    pub llm: LlmConfig,
    /// Never sourced from TOML. `None` for keyless local models.
    pub llm_api_key: Option<String>,
    pub agents: AgentsConfig,
}

/// Values taken from the environment. Tests build this directly instead of
/// mutating process env vars.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub bind: Option<String>,
    pub database_url: Option<String>,
    pub llm_api_key: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("PERSONA_BOT_LOG_LEVEL").ok(),
            bind: env::var("PERSONA_BOT_BIND").ok(),
            database_url: env::var("DATABASE_URL").ok(),
            llm_api_key: env::var("LLM_API_KEY")
                .or_else(|_| env::var("OPENAI_API_KEY"))
                .ok()
                .filter(|k| !k.trim().is_empty()),
        }
    }
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    database: RawDatabase,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    agents: RawAgents,
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default = "default_name")]
    name: String,
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

impl Default for RawServer {
    fn default() -> Self {
        Self { name: default_name(), bind: default_bind(), log_level: default_log_level() }
    }
}

#[derive(Deserialize)]
struct RawDatabase {
    #[serde(default = "default_database_path")]
    path: String,
}

impl Default for RawDatabase {
    fn default() -> Self {
        Self { path: default_database_path() }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_temperature")]
    temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawAgents {
    #[serde(default = "default_persona")]
    default_persona: String,
    #[serde(default = "default_history_window")]
    history_window: usize,
    #[serde(default = "default_prompts_dir")]
    prompts_dir: String,
}

impl Default for RawAgents {
    fn default() -> Self {
        Self {
            default_persona: default_persona(),
            history_window: default_history_window(),
            prompts_dir: default_prompts_dir(),
        }
    }
}

fn default_name() -> String { "persona-bot".to_string() }
fn default_bind() -> String { "127.0.0.1:8000".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_database_path() -> String { "~/.persona-bot/persona.db".to_string() }
fn default_llm_provider() -> String { "dummy".to_string() }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-4o".to_string() }
fn default_openai_temperature() -> f32 { 0.7 }
fn default_openai_timeout_seconds() -> u64 { 60 }
fn default_persona() -> String { "general_expert".to_string() }
fn default_history_window() -> usize { 10 }
fn default_prompts_dir() -> String { "config/prompts".to_string() }

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from `path` (or [`DEFAULT_CONFIG_PATH`]), then apply env overrides.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    load_from(
        Path::new(path.unwrap_or(DEFAULT_CONFIG_PATH)),
        &Overrides::from_env(),
    )
}

/// Internal loader — accepts an explicit path and overrides.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse(&raw, overrides)
        .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))
}

fn parse(raw: &str, overrides: &Overrides) -> Result<Config, String> {
    let parsed: RawConfig = toml::from_str(raw).map_err(|e| format!("parse error: {e}"))?;

    let default_persona = parsed.agents.default_persona.trim().to_string();
    if default_persona.is_empty() {
        return Err("agents.default_persona must not be empty".into());
    }

    let database_path = match overrides.database_url.as_deref() {
        Some(url) => database_path_from_url(url)?,
        None => expand_home(&parsed.database.path),
    };

    Ok(Config {
        name: parsed.server.name,
        bind: overrides.bind.clone().unwrap_or(parsed.server.bind),
        log_level: overrides.log_level.clone().unwrap_or(parsed.server.log_level),
        database_path,
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
            },
        },
        llm_api_key: overrides.llm_api_key.clone(),
        agents: AgentsConfig {
            default_persona,
            history_window: parsed.agents.history_window,
            prompts_dir: expand_home(&parsed.agents.prompts_dir),
        },
    })
}

/// Turn a `DATABASE_URL` value into a SQLite file path.
///
/// Accepts a bare path or a `sqlite://` / `sqlite:` URL. Other schemes are
/// rejected since only the embedded SQLite store is supported.
pub fn database_path_from_url(url: &str) -> Result<PathBuf, String> {
    let url = url.trim();
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    if path.contains("://") {
        return Err(format!("unsupported DATABASE_URL scheme: {url}"));
    }
    if path.is_empty() {
        return Err("DATABASE_URL is empty".into());
    }
    Ok(expand_home(path))
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

impl Config {
    /// Safe `Config` for tests — dummy LLM, no API key, database under `dir`.
    pub fn test_default(dir: &Path) -> Self {
        Self {
            name: "test".into(),
            bind: "127.0.0.1:0".into(),
            log_level: "info".into(),
            database_path: dir.join("persona.db"),
            llm: LlmConfig {
                provider: "dummy".into(),
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1/chat/completions".into(),
                    model: "test-model".into(),
                    temperature: 0.0,
                    timeout_seconds: 1,
                },
            },
            llm_api_key: None,
            agents: AgentsConfig {
                default_persona: default_persona(),
                history_window: default_history_window(),
                prompts_dir: dir.join("prompts"),
            },
        }
    }
}

//! Shipped configuration and prompt templates load cleanly.

use std::fs;
use std::path::Path;

use persona_bot::config::{self, Overrides};

#[test]
fn default_config_parses() {
    let cfg = config::load_from(Path::new(config::DEFAULT_CONFIG_PATH), &Overrides::default()).unwrap();
    assert_eq!(cfg.name, "persona-bot");
    assert_eq!(cfg.llm.provider, "openai");
    assert_eq!(cfg.agents.default_persona, "general_expert");
    assert_eq!(cfg.agents.history_window, 10);
    assert!(cfg.llm_api_key.is_none());
}

#[test]
fn database_url_overrides_config_path() {
    let overrides = Overrides {
        database_url: Some("sqlite:///tmp/persona-test.db".into()),
        ..Overrides::default()
    };
    let cfg = config::load_from(Path::new(config::DEFAULT_CONFIG_PATH), &overrides).unwrap();
    assert_eq!(cfg.database_path, Path::new("/tmp/persona-test.db"));
}

#[test]
fn detect_prompt_describes_json_contract() {
    let text = fs::read_to_string("config/prompts/detect_profession.md").unwrap();
    assert!(text.contains("should_switch"), "detect_profession.md must name should_switch");
    assert!(text.contains("profession_name"), "detect_profession.md must name profession_name");
}

#[test]
fn persona_prompt_template_vars() {
    let text = fs::read_to_string("config/prompts/persona_prompt.md").unwrap();
    assert!(text.contains("{{profession}}"), "persona_prompt.md should contain {{profession}} variable");
}

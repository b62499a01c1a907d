//! End-to-end persona pipeline runs against a real SQLite file and a
//! scripted LLM.

use persona_bot::config::Config;
use persona_bot::error::AppError;
use persona_bot::llm::providers::scripted::ScriptedProvider;
use persona_bot::llm::{ChatRole, LlmProvider};
use persona_bot::subsystems::agents::{ChatRequest, PersonaPipeline};
use persona_bot::subsystems::memory::{MemorySystem, TurnRole};
use tempfile::TempDir;

const NO_SWITCH: &str = r#"{"should_switch": false, "profession_name": ""}"#;

fn switch_to(profession: &str) -> String {
    format!(r#"{{"should_switch": true, "profession_name": "{profession}"}}"#)
}

struct Harness {
    _tmp: TempDir,
    config: Config,
    script: ScriptedProvider,
    pipeline: PersonaPipeline,
}

impl Harness {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let config = Config::test_default(tmp.path());
        let memory = MemorySystem::open(&config.database_path).unwrap();
        let script = ScriptedProvider::new();
        let pipeline =
            PersonaPipeline::new(LlmProvider::Scripted(script.clone()), memory, &config.agents);
        Self { _tmp: tmp, config, script, pipeline }
    }

    fn memory(&self) -> &MemorySystem {
        self.pipeline.memory()
    }
}

fn msg(user_id: &str, message: &str) -> ChatRequest {
    ChatRequest { user_id: user_id.into(), message: message.into(), persona_name: None }
}

#[tokio::test]
async fn teacher_thread_survives_follow_up() {
    let h = Harness::new();

    h.script.push_reply(switch_to("teacher"));
    h.script.push_reply("You are a patient teacher who explains with examples.");
    h.script.push_reply("Recursion is when a function calls itself.");
    let first = h.pipeline.run(msg("1", "Act like a teacher and explain recursion")).await.unwrap();
    assert_eq!(first.persona_name, "teacher");
    assert!(first.switched);
    assert!(first.persona_created);
    assert!(first.user_created);

    // Follow-up without a cue: detector says no switch, stored prompt is reused.
    h.script.push_reply(NO_SWITCH);
    h.script.push_reply("Entropy measures disorder.");
    let second = h.pipeline.run(msg("1", "What about entropy?")).await.unwrap();
    assert_eq!(second.persona_name, "teacher");
    assert!(!second.switched);
    assert!(!second.persona_created);
    assert!(!second.user_created);
    assert_eq!(h.script.call_count(), 5);

    let requests = h.script.requests();
    let detect = &requests[3];
    let payload: serde_json::Value = serde_json::from_str(&detect[1].content).unwrap();
    assert_eq!(payload["current_profession"], "teacher");

    let chat = &requests[4];
    assert_eq!(chat[0].role, ChatRole::System);
    assert_eq!(chat[0].content, "You are a patient teacher who explains with examples.");
    assert_eq!(chat[1].content, "Act like a teacher and explain recursion");
    assert_eq!(chat[2].content, "Recursion is when a function calls itself.");
    assert_eq!(chat[3].content, "What about entropy?");

    let thread = h.memory().thread("1", "teacher", None).await.unwrap();
    assert_eq!(thread.len(), 4);
    let roles: Vec<_> = thread.iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![TurnRole::User, TurnRole::Assistant, TurnRole::User, TurnRole::Assistant]);
}

#[tokio::test]
async fn switching_keeps_each_thread_separate() {
    let h = Harness::new();

    h.script.push_reply(switch_to("teacher"));
    h.script.push_reply("teacher prompt");
    h.script.push_reply("t1");
    h.pipeline.run(msg("1", "Be my teacher")).await.unwrap();

    h.script.push_reply(switch_to("Lawyer"));
    h.script.push_reply("lawyer prompt");
    h.script.push_reply("l1");
    let out = h.pipeline.run(msg("1", "Now act like a lawyer")).await.unwrap();
    assert_eq!(out.persona_name, "lawyer");
    // Fresh thread: only the system prompt and the new message.
    assert_eq!(h.script.requests()[5].len(), 2);

    // Back to teacher: stored prompt reused, old history visible again.
    h.script.push_reply(switch_to("teacher"));
    h.script.push_reply("t2");
    let out = h.pipeline.run(msg("1", "Switch back to teacher please")).await.unwrap();
    assert_eq!(out.persona_name, "teacher");
    assert!(!out.persona_created);
    let chat = h.script.requests().pop().unwrap();
    assert_eq!(chat[0].content, "teacher prompt");
    assert_eq!(chat.len(), 4);

    let threads = h.memory().threads_by_persona("1").await.unwrap();
    assert_eq!(threads.len(), 2);
    assert_eq!(threads["teacher"].len(), 4);
    assert_eq!(threads["lawyer"].len(), 2);
    assert_eq!(h.memory().persona_names("1").await.unwrap(), vec!["lawyer", "teacher"]);
}

#[tokio::test]
async fn requested_persona_wins_over_latest() {
    let h = Harness::new();

    h.script.push_reply(switch_to("investor"));
    h.script.push_reply("investor prompt");
    h.script.push_reply("buy low");
    h.pipeline.run(msg("1", "Act like an investor")).await.unwrap();

    h.script.push_reply(NO_SWITCH);
    h.script.push_reply("general prompt");
    h.script.push_reply("hello");
    let mut req = msg("1", "hi");
    req.persona_name = Some(h.config.agents.default_persona.clone());
    let out = h.pipeline.run(req).await.unwrap();
    assert_eq!(out.persona_name, "general_expert");
    assert_eq!(h.memory().thread("1", "investor", None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn personas_are_per_user() {
    let h = Harness::new();

    for user in ["a", "b"] {
        h.script.push_reply(switch_to("teacher"));
        h.script.push_reply(format!("prompt for {user}"));
        h.script.push_reply("ok");
        h.pipeline.run(msg(user, "act like a teacher")).await.unwrap();
    }
    // Each user generated its own prompt.
    assert_eq!(h.script.call_count(), 6);
    let a = h.memory().persona("a", "teacher").await.unwrap().unwrap();
    let b = h.memory().persona("b", "teacher").await.unwrap().unwrap();
    assert_eq!(a.prompt, "prompt for a");
    assert_eq!(b.prompt, "prompt for b");

    assert!(h.memory().delete_user("a").await.unwrap());
    assert!(!h.memory().user_exists("a").await.unwrap());
    assert!(h.memory().persona("b", "teacher").await.unwrap().is_some());
    assert_eq!(h.memory().thread("b", "teacher", None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn detector_outage_fails_without_persisting() {
    let h = Harness::new();

    h.script.push_error("HTTP 503");
    h.script.push_reply("general prompt");
    h.script.push_reply("answer");
    let err = h.pipeline.run(msg("1", "Act like a lawyer")).await.unwrap_err();
    assert!(matches!(err, AppError::Llm(_)));
    assert_eq!(h.script.call_count(), 1);

    assert!(h.memory().threads_by_persona("1").await.unwrap().is_empty());
    assert!(h.memory().persona("1", "general_expert").await.unwrap().is_none());
    assert!(h.memory().persona("1", "lawyer").await.unwrap().is_none());
}

#[tokio::test]
async fn unparsable_detection_keeps_current_persona() {
    let h = Harness::new();

    h.script.push_reply("I think they want a pilot");
    h.script.push_reply("general prompt");
    h.script.push_reply("still here");
    let out = h.pipeline.run(msg("1", "act like a pilot")).await.unwrap();
    assert_eq!(out.persona_name, "general_expert");
    assert_eq!(out.reply, "still here");
    assert!(!out.switched);
}

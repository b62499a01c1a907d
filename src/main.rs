//! Persona bot — HTTP service entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Open the memory system (SQLite, schema applied)
//!   6. Build the LLM provider and the persona pipeline
//!   7. Spawn Ctrl-C → shutdown signal watcher
//!   8. Serve HTTP until shutdown

use tokio_util::sync::CancellationToken;
use tracing::info;

use persona_bot::config::{self, Config};
use persona_bot::error::AppError;
use persona_bot::llm::providers;
use persona_bot::logger;
use persona_bot::subsystems::agents::PersonaPipeline;
use persona_bot::subsystems::comms::{ApiState, HttpChannel};
use persona_bot::subsystems::memory::MemorySystem;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        name = %config.name,
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let memory = MemorySystem::open(&config.database_path)?;
    let provider = providers::build(&config.llm, config.llm_api_key.clone())?;
    print_startup_summary(&config, provider.name());
    let pipeline = PersonaPipeline::new(provider, memory, &config.agents);

    // Shared shutdown token — Ctrl-C cancels it, the HTTP channel watches it.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let state = ApiState::new(config.name.as_str(), pipeline);
    HttpChannel::new(config.bind.clone(), state).run(shutdown).await
}

fn print_startup_summary(config: &Config, provider: &str) {
    let llm_line = if provider == "dummy" {
        "provider=dummy (echo)".to_string()
    } else {
        format!(
            "provider={} model={} temp={} timeout={}s key={}",
            provider,
            config.llm.openai.model,
            config.llm.openai.temperature,
            config.llm.openai.timeout_seconds,
            if config.llm_api_key.is_some() { "set" } else { "none" },
        )
    };

    println!("{} v{} (pid {})", config.name, env!("CARGO_PKG_VERSION"), std::process::id());
    println!("  http:     {}", config.bind);
    println!("  database: {}", config.database_path.display());
    println!("  llm:      {llm_line}");
    println!(
        "  persona:  default={} history_window={}",
        config.agents.default_persona, config.agents.history_window
    );
    println!("  prompts:  {}", config.agents.prompts_dir.display());
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: persona-bot [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: {})", config::DEFAULT_CONFIG_PATH);
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    //   -v → warn, -vv → info, -vvv → debug, -vvvv+ → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path }
}

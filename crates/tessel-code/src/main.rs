//! Terminal coding agent built on tessel.
//!
//! Reads the API key from `TESSEL_API_KEY`. Tool calls that need approval
//! are confirmed on stdin.
//!
//! ```sh
//! # One-shot
//! tessel-code --prompt "Add error handling to src/main.rs"
//!
//! # Interactive
//! tessel-code --workdir /path/to/project --compress
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tessel::agent::{AbortHandle, Agent, CompositeEventHandler, LoggingHandler};
use tessel::api::OpenAiCompatProvider;
use tessel::api::openai::{API_KEY_ENV, BASE_URL_ENV, DEFAULT_BASE_URL};
use tessel::approval::ApprovalGate;
use tessel::{AgentError, ProviderError};
use tessel_code::{CodeConfig, ConsoleHandler, StdinConfirmer, StdinLines};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "TESSEL_LOG";

/// Terminal coding agent.
#[derive(Parser, Debug)]
#[command(name = "tessel-code", version)]
struct Cli {
    /// Run one turn with this prompt and exit. Without it, prompts are read
    /// from stdin, one per line.
    #[arg(long)]
    prompt: Option<String>,

    /// Project directory the tools operate in.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Model identifier. Overrides the config file.
    #[arg(long)]
    model: Option<String>,

    /// OpenAI-compatible endpoint. Overrides the config file and TESSEL_BASE_URL.
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    max_iterations: Option<u32>,

    /// Plain chat without tools.
    #[arg(long)]
    no_tools: bool,

    /// Abbreviate repeated long strings in requests.
    #[arg(long)]
    compress: bool,

    /// Never ask before running this tool. Repeatable.
    #[arg(long = "auto-approve", value_name = "TOOL")]
    auto_approve: Vec<String>,

    /// Never ask before running any tool.
    #[arg(long, short = 'y')]
    yes: bool,

    /// Debug logging (overridden by TESSEL_LOG).
    #[arg(long, short = 'v')]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut CodeConfig) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(url) = &self.base_url {
            config.base_url = Some(url.clone());
        }
        let agent = &mut config.agent;
        if let Some(n) = self.max_iterations {
            agent.max_iterations = n;
        }
        if self.no_tools {
            agent.use_tools = false;
        }
        if self.compress {
            agent.compression.enabled = true;
        }
        if self.yes {
            agent.auto_approve_all = true;
        }
        agent.auto_approve_tools.extend(self.auto_approve.iter().cloned());
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "tessel=debug,tessel_code=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AgentError> {
    let workdir = std::fs::canonicalize(&cli.workdir).unwrap_or_else(|_| cli.workdir.clone());
    let mut config = CodeConfig::load(&workdir)?;
    cli.apply(&mut config);
    debug!(?config, "Resolved configuration");

    let api_key = std::env::var(API_KEY_ENV)
        .map_err(|_| ProviderError::MissingCredentials(format!("{API_KEY_ENV} is not set")))?;
    let base_url = config
        .base_url
        .clone()
        .or_else(|| std::env::var(BASE_URL_ENV).ok())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let provider = OpenAiCompatProvider::new(api_key, base_url, &config.model)?;
    info!("Using model {} in {}", config.model, workdir.display());

    let input = StdinLines::new();
    let gate = ApprovalGate::new()
        .with_store(config.approval_store(&workdir))
        .with_workdir(&workdir)
        .with_handler(Arc::new(StdinConfirmer::new(input.clone())));
    let events = CompositeEventHandler::new()
        .with(ConsoleHandler::default())
        .with(LoggingHandler);

    let mut agent = Agent::new(
        Arc::new(provider),
        Arc::new(config.build_tool_set(&workdir)),
        config.agent.clone(),
    )
    .with_system_prompt(config.system_prompt())
    .with_gate(gate)
    .with_event_handler(Arc::new(events));
    abort_on_ctrl_c(agent.abort_handle());

    match cli.prompt {
        Some(prompt) => {
            agent.chat(&prompt).await?;
            Ok(())
        }
        None => repl(&mut agent, &input, &workdir).await,
    }
}

/// Ctrl-C stops the current turn at the next iteration boundary.
fn abort_on_ctrl_c(handle: AbortHandle) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[aborting after the current step]");
            handle.abort();
        }
    });
}

async fn repl(agent: &mut Agent, input: &StdinLines, workdir: &Path) -> Result<(), AgentError> {
    eprintln!(
        "tessel-code in {}. /clear resets the conversation, /exit quits.",
        workdir.display()
    );
    loop {
        eprint!("> ");
        let _ = std::io::stderr().flush();
        let Some(line) = input.next_line().await else {
            return Ok(());
        };
        match line.trim() {
            "" => continue,
            "/exit" | "/quit" => return Ok(()),
            "/clear" => {
                agent.clear_history();
                eprintln!("[conversation cleared]");
            }
            prompt => match agent.chat(prompt).await {
                Ok(outcome) => debug!(
                    "Turn finished: {:?}, {} iterations, {} tool calls, {} tokens",
                    outcome.stop_reason(),
                    outcome.stats.iterations,
                    outcome.stats.tool_call_count,
                    outcome.stats.total_tokens()
                ),
                // A failed turn leaves the session usable.
                Err(AgentError::Provider(e)) => eprintln!("Error: {e}"),
                Err(e) => return Err(e),
            },
        }
    }
}

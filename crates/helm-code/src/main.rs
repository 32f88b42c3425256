//! Terminal coding collaborator powered by helm-rs.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable. Logs go
//! to `<project>/.helm/helm.log`, never to the terminal.
//!
//! ```sh
//! helm-code --workdir /path/to/project
//! helm-code --resume ses-18f3a2b1c00-0001
//! helm-code --mode auto --prompt "Make cargo test pass"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use helm_code::commands::{HELP, Input, parse_line};
use helm_code::config::{self, CodeConfig, FileConfig, Overrides};
use helm_code::console::{ConsolePrinter, InputQueue, StdinConfirmer, spawn_input_reader};
use helm_rs::PROJECT_DIR;
use helm_rs::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Terminal coding collaborator powered by helm-rs.
#[derive(Parser)]
#[command(name = "helm-code", version)]
struct Cli {
    /// Project directory the tools operate in.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Model to use for completions.
    #[arg(long)]
    model: Option<String>,

    /// Starting mode: ask, plan, code or auto.
    #[arg(long)]
    mode: Option<Mode>,

    /// Resume a saved session by id.
    #[arg(long)]
    resume: Option<String>,

    /// Run one request, save the session and exit.
    #[arg(long)]
    prompt: Option<String>,

    /// Maximum tokens per model response.
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature.
    #[arg(long)]
    temperature: Option<f32>,

    /// Context window size in tokens.
    #[arg(long)]
    context_size: Option<usize>,

    /// Iteration bound for AUTO mode.
    #[arg(long)]
    auto_iterations: Option<u32>,

    /// Chat-completions endpoint.
    #[arg(long)]
    api_url: Option<String>,

    /// Log at DEBUG instead of INFO.
    #[arg(long, short)]
    verbose: bool,
}

fn init_logging(project_root: &Path, verbose: bool) -> std::io::Result<PathBuf> {
    let dir = project_root.join(PROJECT_DIR);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("helm.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;

    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("helm_rs={level},helm_code={level}"))
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(Arc::new(file))
        .with_ansi(false);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
    Ok(path)
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let project_root = std::fs::canonicalize(&cli.workdir).unwrap_or_else(|_| cli.workdir.clone());
    let log_path = init_logging(&project_root, cli.verbose)?;

    let file = FileConfig::load(&project_root)?;
    let overrides = Overrides {
        model: cli.model,
        api_url: cli.api_url,
        mode: cli.mode,
        max_tokens: cli.max_tokens,
        temperature: cli.temperature,
        context_capacity: cli.context_size,
        auto_max_iterations: cli.auto_iterations,
    };
    let code_config = CodeConfig::resolve(project_root.clone(), file, overrides);
    let engine_config = code_config.engine_config();

    let client = HttpChatClient::with_url(config::api_key()?, &code_config.api_url)
        .map_err(EngineError::Setup)?;
    let transport = RetryingTransport::new(client, engine_config.retry.clone());

    let cancel = CancelHandle::new();
    let input = spawn_input_reader(cancel.clone());
    let confirmer = StdinConfirmer::new(input.clone());
    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(ConsolePrinter);

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut controller = ModeController::new(&transport, engine_config)
        .with_event_handler(&handler)
        .with_confirmer(&confirmer)
        .with_cancel_handle(cancel);
    if code_config.index_project {
        controller = controller.with_project_index(FileIndex::new(&project_root));
    }

    let report = controller.start().await;
    info!(
        "Logging to {}; {} external tool(s) registered",
        log_path.display(),
        report.registered.len()
    );

    if let Some(id) = cli.resume {
        let outcome = controller.handle(Command::Resume(id)).await?;
        print_outcome(&outcome);
    }

    if let Some(prompt) = cli.prompt {
        let result = controller.handle(Command::Submit(prompt)).await;
        let exit = controller.handle(Command::ExitAndSave).await?;
        print_outcome(&exit);
        result?;
        return Ok(());
    }

    println!(
        "helm-code in {} (session {}, mode {}). /help for commands.",
        project_root.display(),
        controller.session_id(),
        controller.mode()
    );
    repl(&mut controller, &input).await
}

async fn repl(
    controller: &mut ModeController<'_>,
    input: &InputQueue,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        print_prompt(controller.mode());
        let Some(line) = input.next_line().await else {
            // End of input behaves like /exit.
            let outcome = controller.handle(Command::ExitAndSave).await?;
            print_outcome(&outcome);
            return Ok(());
        };

        let command = match parse_line(&line) {
            Ok(Input::Command(command)) => command,
            Ok(Input::Help) => {
                println!("{HELP}");
                continue;
            }
            Ok(Input::Empty) => continue,
            Err(e) => {
                println!("  {e}");
                continue;
            }
        };

        match controller.handle(command).await {
            Ok(Outcome::MemoryFile(path)) => {
                edit_file(&path).await;
                if controller.reload_memory() {
                    println!("  project memory reloaded");
                }
            }
            Ok(outcome @ Outcome::Exited { .. }) => {
                print_outcome(&outcome);
                return Ok(());
            }
            Ok(outcome) => print_outcome(&outcome),
            // Already shown through the event handler; history is intact.
            Err(EngineError::Turn(_)) => {}
            Err(e) => {
                warn!("Command failed: {e}");
                println!("  error: {e}");
            }
        }
    }
}

fn print_prompt(mode: Mode) {
    use std::io::Write;
    print!("[{mode}] > ");
    let _ = std::io::stdout().flush();
}

fn print_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::SessionStarted { id } => println!("  new session {id}"),
        Outcome::Resumed { id, turns } => println!("  resumed {id} ({turns} turns)"),
        Outcome::Reindexed(report) => {
            println!(
                "  {} external tool(s), {} warning(s)",
                report.registered.len(),
                report.warnings.len()
            );
        }
        Outcome::Sessions(sessions) if sessions.is_empty() => println!("  no saved sessions"),
        Outcome::Sessions(sessions) => {
            for s in sessions {
                println!(
                    "  {}  {}  {:>3} turns  {}",
                    s.id,
                    s.updated_at.format("%Y-%m-%d %H:%M"),
                    s.turns,
                    s.title.as_deref().unwrap_or("(untitled)")
                );
            }
        }
        Outcome::Exited { saved: Some(path) } => println!("  session saved to {}", path.display()),
        Outcome::Exited { saved: None } => println!("  session not saved"),
        Outcome::Turn(report) if report.hit_limit => {
            println!("  (turn ended at the round limit after {} rounds)", report.rounds);
        }
        Outcome::ModeChanged { .. } | Outcome::MemoryFile(_) | Outcome::Turn(_) | Outcome::Idle => {}
    }
}

/// Open `path` in `$EDITOR` (or `vi`) and wait for it to close.
async fn edit_file(path: &Path) {
    let editor = std::env::var("VISUAL")
        .or_else(|_| std::env::var("EDITOR"))
        .unwrap_or_else(|_| "vi".to_string());
    let status = tokio::process::Command::new(&editor)
        .arg(path)
        .status()
        .await;
    match status {
        Ok(s) if s.success() => {}
        Ok(s) => println!("  {editor} exited with {s}"),
        Err(e) => println!("  could not start {editor}: {e}; edit {} by hand", path.display()),
    }
}

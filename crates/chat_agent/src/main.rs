use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chat_agent::commands::{parse_slash_command, SlashCommand, HELP_TEXT};
use chat_agent::render::{format_entry, TranscriptPrinter};
use chat_agent::{
    apply_template_to_agent, backend_from_config, AgentEditor, Backend, SessionController,
    SessionList, TurnOutcome, TurnSettings, TurnState,
};
use chat_contract::ChatError;
use clap::{Parser, Subcommand};
use stockpilot::config::AppConfig;
use stockpilot::logging::init_logging;
use stockpilot::SkillTemplate;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

const RENDER_INTERVAL: Duration = Duration::from_millis(40);

#[derive(Debug, Parser)]
#[command(
    name = "stockpilot",
    version,
    about = "Chat with a stock analysis agent and manage its skills"
)]
struct Cli {
    /// Log filter such as `debug` or `stock_api=trace`. Overrides STOCKPILOT_LOG.
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat. Type /help for commands.
    Chat {
        /// Continue a stored session instead of starting a new one.
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// Ticker that gives the conversation its context.
        #[arg(long)]
        stock: Option<String>,
    },
    /// Print the transcript of a stored session.
    Resume { session: String },
    /// Show the effective prompt and tools of an agent.
    Preview {
        #[arg(long)]
        agent: String,
        /// Preview with exactly these skills instead of the saved ones.
        #[arg(long, value_delimiter = ',')]
        skills: Option<Vec<String>>,
    },
    /// Enable exactly the given skills on an agent.
    ApplyTemplate {
        #[arg(long)]
        agent: String,
        #[arg(long, value_delimiter = ',', required = true)]
        skills: Vec<String>,
        #[arg(long, default_value = "cli")]
        name: String,
    },
    /// List stored sessions.
    Sessions {
        /// Delete this session first.
        #[arg(long)]
        delete: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env().context("invalid configuration")?;
    init_logging(cli.log.as_deref().or(config.log_filter.as_deref()));
    let backend = backend_from_config(&config).context("failed to set up backend")?;

    match cli.command {
        Command::Chat {
            session,
            agent,
            model,
            stock,
        } => {
            let settings = TurnSettings {
                agent_id: agent,
                model_name: model.or(config.default_model.clone()),
                stock_code: stock,
                timeout: config.timeout,
            };
            run_chat(&backend, settings, session).await
        }
        Command::Resume { session } => {
            let controller = SessionController::new(&backend, TurnSettings::default());
            let detail = controller.resume(&session).await?;
            println!("{} ({} messages)", detail.title, detail.message_count);
            print_transcript(&controller);
            Ok(())
        }
        Command::Preview { agent, skills } => run_preview(&backend, &agent, skills).await,
        Command::ApplyTemplate {
            agent,
            skills,
            name,
        } => {
            let template = SkillTemplate::new(name, skills);
            let report = apply_template_to_agent(&backend, &agent, &template).await?;
            println!("{} binding(s) written", report.applied.len());
            for failure in &report.failed {
                eprintln!("failed: {} ({})", failure.op.skill_id(), failure.error);
            }
            if report.is_success() {
                Ok(())
            } else {
                anyhow::bail!("{} binding(s) failed", report.failed.len())
            }
        }
        Command::Sessions { delete } => {
            let mut list = SessionList::load(backend.sessions.as_ref()).await?;
            if let Some(session_id) = delete {
                list.delete(backend.sessions.as_ref(), &session_id, |error| {
                    eprintln!("could not delete {session_id}: {error}");
                })
                .await?;
            }
            for session in list.sessions() {
                println!(
                    "{}  {}  ({} messages, updated {})",
                    session.id, session.title, session.message_count, session.updated_at
                );
            }
            Ok(())
        }
    }
}

async fn run_preview(backend: &Backend, agent_id: &str, skills: Option<Vec<String>>) -> Result<()> {
    let mut editor = AgentEditor::load(backend, agent_id).await?;
    if let Some(skills) = skills {
        editor.apply_template(&SkillTemplate::new("preview", skills))?;
    }
    let check = editor.preview_checked().await?;
    if let Some(mismatch) = &check.mismatch {
        eprintln!("warning: {mismatch}");
    }

    let preview = check.local;
    println!("{}", preview.system_prompt);
    println!();
    for tool in &preview.enabled_tools {
        match preview.tool_to_skills.get(tool) {
            Some(skills) if !skills.is_empty() => {
                println!("tool {tool} (from {})", skills.join(", "))
            }
            _ => println!("tool {tool} (manual)"),
        }
    }
    println!(
        "{} skill(s), ~{} tokens, {} chars",
        preview.skill_count, preview.estimated_tokens, preview.full_prompt_length
    );
    Ok(())
}

async fn run_chat(
    backend: &Backend,
    settings: TurnSettings,
    session: Option<String>,
) -> Result<()> {
    let controller = SessionController::new(backend, settings);
    if let Some(session_id) = session {
        controller.resume(&session_id).await?;
        print_transcript(&controller);
    }

    println!("Type a question, or /help.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let turn_controller = Arc::clone(&controller);
        match parse_slash_command(&line) {
            Some(SlashCommand::Quit) => break,
            Some(SlashCommand::Help) => println!("{HELP_TEXT}"),
            Some(SlashCommand::Cancel) => println!("nothing is streaming"),
            Some(SlashCommand::New) => {
                controller.new_session()?;
                println!("started a new session");
            }
            Some(SlashCommand::Regenerate) => {
                drive_turn(&controller, &mut lines, async move {
                    turn_controller.regenerate().await
                })
                .await?;
            }
            Some(SlashCommand::Edit { index, text }) => {
                drive_turn(&controller, &mut lines, async move {
                    turn_controller.edit_and_regenerate(index, text).await
                })
                .await?;
            }
            Some(SlashCommand::Invalid { command, reason }) => eprintln!("{command}: {reason}"),
            Some(SlashCommand::Unknown(command)) => {
                eprintln!("unknown command {command}, try /help")
            }
            None if line.trim().is_empty() => {}
            None => {
                drive_turn(&controller, &mut lines, async move {
                    turn_controller.send(line).await
                })
                .await?;
            }
        }
    }
    Ok(())
}

/// Runs one turn in the background while printing its progress and
/// listening for `/cancel`.
async fn drive_turn<F>(
    controller: &Arc<SessionController>,
    lines: &mut Lines<BufReader<Stdin>>,
    turn: F,
) -> Result<()>
where
    F: Future<Output = Result<TurnOutcome, ChatError>> + Send + 'static,
{
    let mut printer = TranscriptPrinter::new();
    let mut handle = tokio::spawn(turn);
    let mut ticker = tokio::time::interval(RENDER_INTERVAL);
    let mut stdin_open = true;

    loop {
        tokio::select! {
            joined = &mut handle => {
                print_now(&controller.with_transcript(|transcript| {
                    printer.finish(transcript.entries())
                }));
                match joined.context("turn task panicked")? {
                    Ok(outcome) => report_outcome(&outcome),
                    Err(error) => eprintln!("{error}"),
                }
                return Ok(());
            }
            _ = ticker.tick() => {
                print_now(&controller.with_transcript(|transcript| {
                    printer.observe(transcript.entries())
                }));
            }
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if parse_slash_command(&line) == Some(SlashCommand::Cancel) => {
                    controller.abort();
                }
                Some(_) => eprintln!("a reply is streaming; type /cancel to stop it"),
                None => {
                    stdin_open = false;
                    controller.abort();
                }
            },
        }
    }
}

fn report_outcome(outcome: &TurnOutcome) {
    match outcome.state {
        TurnState::Completed => {
            let elapsed = outcome
                .usage
                .as_ref()
                .and_then(|usage| usage.response_time_ms)
                .map(|ms| format!(" in {ms} ms"))
                .unwrap_or_default();
            let session = outcome.session_id.as_deref().unwrap_or("-");
            println!("[done{elapsed}, session {session}]");
        }
        TurnState::Aborted => println!("[cancelled]"),
        TurnState::Errored | TurnState::Idle | TurnState::Streaming => {}
    }
}

fn print_transcript(controller: &SessionController) {
    controller.with_transcript(|transcript| {
        for (index, entry) in transcript.entries().iter().enumerate() {
            println!("{}", format_entry(index, entry));
        }
    });
}

fn print_now(text: &str) {
    if text.is_empty() {
        return;
    }
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

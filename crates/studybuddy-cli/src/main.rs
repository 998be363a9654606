//! StudyBuddy terminal chat.
//!
//! Reads messages from stdin, streams answers to stdout and writes logs to
//! stderr. The session history is saved when the session ends.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use studybuddy_core::{Attachment, InboundMessage, Roster, SessionKey};
use studybuddy_runtime::{OpenAiCompatProvider, RuntimeConfig, TurnOrchestrator};

mod command;
mod console;

use command::{Command, HELP};
use console::ConsoleSink;

#[derive(Parser, Debug)]
#[command(name = "studybuddy", version, about = "Chat with the StudyBuddy study assistant")]
struct Cli {
    /// Agent roster YAML replacing the built-in roster
    #[arg(long, env = "STUDYBUDDY_ROSTER")]
    roster: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Session id; a random one is generated when omitted
    #[arg(long)]
    session: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = RuntimeConfig::from_env().context("Configuration error")?;
    let roster = match &cli.roster {
        Some(path) => Roster::from_yaml_file(path).with_context(|| format!("Invalid roster {}", path.display()))?,
        None => Roster::default(),
    };

    let provider = Arc::new(OpenAiCompatProvider::new(config.api_key.clone(), &config.base_url)?);
    let orchestrator = TurnOrchestrator::from_config(provider, &config, roster);
    let session = SessionKey::new(cli.session.unwrap_or_else(|| Uuid::new_v4().to_string()));

    tracing::info!(session = %session, model = %config.pipeline.model, policy = %config.pipeline.failure_policy, "Session starting");
    println!("📚 StudyBuddy is ready. Type /help for commands.");

    run(&orchestrator, &session).await?;

    if let Some(path) = orchestrator.end_session(&session).await? {
        eprintln!("History saved to {}", path.display());
    }
    Ok(())
}

async fn run(orchestrator: &TurnOrchestrator, session: &SessionKey) -> Result<()> {
    let sink = ConsoleSink::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = read_line(&mut lines, tokio::signal::ctrl_c()).await? else {
            println!();
            return Ok(());
        };

        let (text, attachment) = match Command::parse(&line) {
            Command::Empty => continue,
            Command::Quit => return Ok(()),
            Command::Help => {
                println!("{}", HELP);
                continue;
            }
            Command::Invalid(reason) => {
                println!("{}", reason);
                continue;
            }
            Command::Message { text, attachment } => (text, attachment),
        };

        let mut message = InboundMessage::text(session.clone(), text);
        if let Some(path) = attachment {
            match read_attachment(&path) {
                Ok(file) => message = message.with_attachment(file),
                Err(e) => {
                    println!("❌ {:#}", e);
                    continue;
                }
            }
        }

        let cancel = CancellationToken::new();
        let turn = orchestrator.handle_message(message, &sink, cancel.clone());
        tokio::pin!(turn);

        let finished = tokio::select! {
            result = &mut turn => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };
        let result = match finished {
            Some(result) => result,
            None => {
                cancel.cancel();
                turn.await
            }
        };

        if let Err(e) = result {
            tracing::debug!(error = %e, "Turn ended without an answer");
        }
    }
}

/// Next input line, or `None` on EOF or once `interrupt` completes.
async fn read_line<R, F>(lines: &mut Lines<R>, interrupt: F) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future,
{
    tokio::select! {
        line = lines.next_line() => line,
        _ = interrupt => Ok(None),
    }
}

fn read_attachment(path: &Path) -> Result<Attachment> {
    let bytes = std::fs::read(path).with_context(|| format!("Could not open {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Attachment::new(name, bytes))
}

/// Logs go to stderr so they never interleave with streamed answers.
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["studybuddy"]);
        assert_eq!(cli.log_level, "warn");
        assert!(cli.session.is_none());
    }

    #[test]
    fn test_cli_options() {
        let cli = Cli::parse_from([
            "studybuddy",
            "--roster",
            "agents.yaml",
            "--log-level",
            "debug",
            "--session",
            "exam-prep",
        ]);
        assert_eq!(cli.roster, Some(PathBuf::from("agents.yaml")));
        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.session.as_deref(), Some("exam-prep"));
    }

    #[tokio::test]
    async fn test_read_line_returns_input() {
        let mut lines = BufReader::new(&b"What is osmosis?\n"[..]).lines();
        let line = read_line(&mut lines, std::future::pending::<()>()).await.unwrap();
        assert_eq!(line.as_deref(), Some("What is osmosis?"));
    }

    #[tokio::test]
    async fn test_read_line_interrupt_ends_input() {
        let (_writer, reader) = tokio::io::duplex(64);
        let mut lines = BufReader::new(reader).lines();
        let line = read_line(&mut lines, std::future::ready(())).await.unwrap();
        assert!(line.is_none());
    }

    #[test]
    fn test_read_attachment_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "Mitochondria make ATP.").unwrap();

        let attachment = read_attachment(&path).unwrap();
        assert_eq!(attachment.name, "notes.txt");
        assert_eq!(attachment.bytes, b"Mitochondria make ATP.");
    }

    #[test]
    fn test_read_attachment_missing_file() {
        let err = read_attachment(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(err.to_string().contains("Could not open"));
    }
}

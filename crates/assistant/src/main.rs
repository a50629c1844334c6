use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use hsb_assistant::chat::{ChatSession, ConversationSnapshot, SessionError};
use hsb_assistant::settings::{AssistantSettings, SettingsError};
use hsb_assistant::terminal::TranscriptRenderer;
use hsb_llm::{ProviderError, create_provider};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const QUIT_COMMAND: &str = "/quit";

#[derive(Parser, Debug)]
#[command(name = "hsb-assistant")]
#[command(about = "Chat with the HSB accounting assistant from a terminal")]
struct Args {
    /// Settings file; defaults to the per-user config directory
    config: Option<PathBuf>,

    /// Write a settings template to the config path and exit
    #[arg(long)]
    init_config: bool,
}

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("failed to load settings on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to create provider on `{stage}`: {source}"))]
    Provider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("chat session failed on `{stage}`: {source}"))]
    Session {
        stage: &'static str,
        source: SessionError,
    },
    #[snafu(display("terminal io failed on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("snapshot feed closed on `{stage}`"))]
    SnapshotsClosed { stage: &'static str },
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.init_config {
        let path = args
            .config
            .unwrap_or_else(AssistantSettings::default_config_path);
        return AssistantSettings::default()
            .write_template(&path)
            .context(SettingsSnafu {
                stage: "write-settings-template",
            });
    }

    let settings = AssistantSettings::load(args.config.as_deref()).context(SettingsSnafu {
        stage: "load-settings",
    })?;
    let persona = Arc::new(settings.to_persona());
    let provider = create_provider(settings.to_provider_config(&persona)).context(ProviderSnafu {
        stage: "create-provider",
    })?;
    if !provider.is_configured() {
        tracing::warn!(
            provider_id = %provider.id(),
            "no API credential configured, replies will use the offline fallback"
        );
    }

    let session = ChatSession::spawn(provider, persona.clone());
    let result = run_terminal(&session, &persona.assistant_name).await;
    session.close().await.context(SessionSnafu {
        stage: "close-session",
    })?;
    result
}

async fn run_terminal(session: &ChatSession, assistant_name: &str) -> Result<(), AppError> {
    let mut renderer = TranscriptRenderer::new(assistant_name);
    let mut snapshots = session.subscribe();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let initial = snapshots.borrow_and_update().clone();
    write_out(&mut stdout, &renderer.render(&initial)).await?;

    loop {
        write_out(&mut stdout, "> ").await?;
        let Some(line) = lines.next_line().await.context(TerminalSnafu {
            stage: "read-input",
        })?
        else {
            break;
        };
        let input = line.trim();
        if input == QUIT_COMMAND {
            break;
        }
        if input.is_empty() {
            continue;
        }

        let before = session.snapshot().messages.len();
        session.submit(input).await.context(SessionSnafu {
            stage: "submit-input",
        })?;
        follow_turn(&mut snapshots, &mut renderer, &mut stdout, before).await?;
    }

    Ok(())
}

/// Renders every published snapshot until the submitted turn settles. Input stays
/// blocked meanwhile.
async fn follow_turn(
    snapshots: &mut watch::Receiver<ConversationSnapshot>,
    renderer: &mut TranscriptRenderer,
    stdout: &mut tokio::io::Stdout,
    messages_before: usize,
) -> Result<(), AppError> {
    loop {
        snapshots.changed().await.map_err(|_| AppError::SnapshotsClosed {
            stage: "follow-turn",
        })?;
        let snapshot = snapshots.borrow_and_update().clone();
        write_out(stdout, &renderer.render(&snapshot)).await?;

        if !snapshot.is_loading && snapshot.messages.len() > messages_before {
            tracing::debug!(outcome = ?snapshot.last_outcome, "turn settled");
            return Ok(());
        }
    }
}

async fn write_out(stdout: &mut tokio::io::Stdout, text: &str) -> Result<(), AppError> {
    if text.is_empty() {
        return Ok(());
    }
    stdout.write_all(text.as_bytes()).await.context(TerminalSnafu {
        stage: "write-output",
    })?;
    stdout.flush().await.context(TerminalSnafu {
        stage: "flush-output",
    })
}

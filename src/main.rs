//! CLI entry point.
//!
//! `join` runs one interview session until Ctrl-C, then tears it down
//! (recording upload included). `download` fetches a past session's
//! recording from the backend.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use interview_room::config::Config;
use interview_room::recording::RecordingStore;
use interview_room::session::InterviewRoom;

#[derive(Parser)]
#[command(name = "interview-room", version, about = "Real-time audio interview session client")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Join an interview session and stream until Ctrl-C.
    Join {
        /// Session identifier; generated when omitted.
        #[arg(short, long)]
        session_id: Option<String>,
    },
    /// Download a past session's recording from the backend.
    Download {
        session_id: String,
        /// Output file; defaults to the session recording filename.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_room=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Join { session_id } => {
            let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            join(config, session_id).await
        }
        Command::Download { session_id, output } => download(config, session_id, output).await,
    }
}

async fn join(config: Config, session_id: String) -> anyhow::Result<()> {
    tracing::info!(%session_id, "joining interview session");
    let mut room = InterviewRoom::new(config, session_id);
    room.start().await.context("session startup failed")?;

    // Report state transitions until the user leaves or the transport
    // drops.
    let mut state_rx = room.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, leaving session");
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow();
                println!("state: {state}");
                if state == interview_room::session::SessionState::Error {
                    tracing::error!("session entered error state");
                    break;
                }
            }
        }
    }

    room.leave().await;
    if let Some(artifact) = room.recording_artifact() {
        tracing::info!(
            file_name = %artifact.file_name,
            size = artifact.bytes.len(),
            "local recording available"
        );
    }
    Ok(())
}

async fn download(
    config: Config,
    session_id: String,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let store = RecordingStore::new(config.endpoints.http_base_url.clone());
    let bytes = store
        .download(&session_id)
        .await
        .context("recording download failed")?;
    let path =
        output.unwrap_or_else(|| PathBuf::from(format!("session_recording_{session_id}.wav")));
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    println!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

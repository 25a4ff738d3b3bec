//! CLI binary for voxa.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use voxa::speech::{HttpAudioBackend, NullRecognizer};
use voxa::transcript::ConsoleTranscript;
use voxa::{ClientConfig, ConversationCoordinator, HttpChatClient, RuntimeEvent};

/// Voxa: voice-capable chat client.
#[derive(Parser)]
#[command(name = "voxa", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the chat API base URL.
    #[arg(long)]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Suppress noisy dependency logs by default; override with RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voxa=info,reqwest=warn,cpal=warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = if let Some(ref path) = cli.config {
        ClientConfig::from_file(path)?
    } else {
        ClientConfig::default()
    };
    if let Some(base_url) = cli.base_url {
        config.api.base_url = base_url;
    }

    let transport = Arc::new(HttpChatClient::new(
        &config.api.base_url,
        Duration::from_secs(config.api.request_timeout_secs),
    )?);
    let audio = Arc::new(HttpAudioBackend::new(config.audio.output_device.clone()));
    // No local speech engine is bundled; the voice trigger surfaces a
    // one-time "not available" notice unless a recognizer is wired in.
    let recognition = Arc::new(NullRecognizer);

    let (coordinator, handle) = ConversationCoordinator::new(
        &config,
        transport,
        audio,
        recognition,
        Box::new(ConsoleTranscript),
    );

    println!("voxa v{} — {}", env!("CARGO_PKG_VERSION"), config.api.base_url);
    println!("type a message, /voice to talk, /quit to exit");

    let mut status_rx = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = status_rx.recv().await {
            match event {
                RuntimeEvent::AwaitingReply { active: true } => println!("… awaiting reply"),
                RuntimeEvent::Listening { active: true } => println!("… listening"),
                RuntimeEvent::Notice(text) => println!("! {text}"),
                _ => {}
            }
        }
    });

    let coordinator_task = tokio::spawn(coordinator.run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" | "/exit" => break,
            "/voice" => handle.listen().await,
            text => handle.submit(text).await,
        }
    }

    handle.shutdown();
    let _ = coordinator_task.await;
    Ok(())
}

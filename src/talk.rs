//! `voice-relay talk` - converse with the upstream endpoint from the terminal
//!
//! Captures the default microphone, plays responses on the default speaker,
//! and prints the assistant's text as it streams in. With `--text`, lines read
//! from stdin are sent as typed turns. With `--push-to-talk`, the endpoint's
//! voice activity detection is off and pressing Enter ends the spoken turn.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
#[cfg(not(feature = "cpal-audio"))]
use anyhow::anyhow;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::core::audio::{AudioDevice, AudioSpec};
use crate::core::client::{ClientState, ConversationListener, StreamingVoiceClient};
use crate::core::credential::CredentialProvider;
use crate::core::realtime::{
    DEFAULT_INSTRUCTIONS, SessionNegotiator, TurnDetectionMode, compose_instructions,
};
use crate::core::transport::WebSocketConnector;

/// Options of the `talk` subcommand.
#[derive(Debug, Clone, Default)]
pub struct TalkOptions {
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub goals: Vec<String>,
    pub text: bool,
    pub push_to_talk: bool,
}

/// Prints the conversation to stdout.
struct TerminalListener;

impl ConversationListener for TerminalListener {
    fn on_state(&self, state: ClientState) {
        if state == ClientState::Conversing {
            println!("Connected. Start talking (Ctrl+C to quit).");
        }
    }

    fn on_text_delta(&self, delta: &str) {
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }

    fn on_user_transcript(&self, text: &str) {
        println!("\nYou: {text}");
    }

    fn on_turn_done(&self, _text: &str) {
        println!();
    }

    fn on_error(&self, message: &str) {
        eprintln!("\nError from upstream: {message}");
    }
}

pub async fn run(config: &ServerConfig, options: TalkOptions) -> Result<()> {
    let device = audio_device()?;

    let mut negotiator = SessionNegotiator::new(AudioSpec::pcm16_mono(config.sample_rate));
    if options.push_to_talk {
        negotiator = negotiator.with_turn_detection(TurnDetectionMode::Manual);
    }
    let voice = options
        .voice
        .unwrap_or_else(|| config.default_voice.clone());
    let persona = options.instructions.as_deref().unwrap_or(DEFAULT_INSTRUCTIONS);
    let instructions = compose_instructions(persona, &options.goals);
    let session = negotiator.build_config(&voice, &instructions, &[])?;

    let mut client = StreamingVoiceClient::new(
        Arc::new(CredentialProvider::for_client(config)),
        Arc::new(WebSocketConnector::new(config.upstream_url.clone())),
        device,
        negotiator,
        session,
    )
    .with_chunk_frames(config.chunk_frames)
    .with_listener(Arc::new(TerminalListener));

    if options.text {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(forward_stdin(move |line| {
            let tx = tx.clone();
            async move {
                if line.trim().is_empty() {
                    return true;
                }
                tx.send(line).await.is_ok()
            }
        }));
        client = client.with_text_input(rx);
    } else if options.push_to_talk {
        println!("Push-to-talk: speak, then press Enter to end your turn.");
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(forward_stdin(move |_line| {
            let tx = tx.clone();
            async move { tx.send(()).await.is_ok() }
        }));
        client = client.with_turn_signals(rx);
    }

    let shutdown = client.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down conversation");
            shutdown.cancel();
        }
    });

    let summary = client.run().await?;
    println!(
        "\nSession ended: {} turns, {} audio chunks sent, {} bytes played",
        summary.turns_completed, summary.frames_sent, summary.audio_bytes_played
    );
    if summary.malformed_events > 0 {
        println!("Skipped {} malformed events", summary.malformed_events);
    }
    Ok(())
}

/// Feed stdin lines to `handle` until it returns false or stdin ends.
async fn forward_stdin<F, Fut>(mut handle: F)
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !handle(line).await {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
}

#[cfg(feature = "cpal-audio")]
fn audio_device() -> Result<Arc<dyn AudioDevice>> {
    Ok(Arc::new(crate::core::audio::CpalAudioDevice::new()))
}

#[cfg(not(feature = "cpal-audio"))]
fn audio_device() -> Result<Arc<dyn AudioDevice>> {
    Err(anyhow!(
        "`voice-relay talk` requires the `cpal-audio` feature. \
         Rebuild with `--features cpal-audio` to use the microphone and speaker."
    ))
}

//! Main Entrypoint for the Realtime Assistant
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command line.
//! 2. Starting the Lights plugin and registering its functions.
//! 3. Connecting the realtime session and spawning the update dispatcher.
//! 4. Recording microphone input on demand until the session ends.

use anyhow::Context;
use clap::Parser;
use realtime_assistant::{
    config::{Cli, Config},
    console::{self, RECORD_PROMPT, RECORDING_PROMPT},
    output::WavFileSink,
    provider::openai::{self, OpenAIConnectOptions},
    recorder::{Recorder, Recording},
};
use realtime_core::{
    dispatcher::{DispatchError, Dispatcher},
    generic_types::{ConversationItem, SessionOptions},
    lights::{self, LightsService},
    realtime_api::RealtimeSession,
    tools::{PluginRegistry, mcp},
    wav::{REALTIME_PCM16_SAMPLE_RATE, WavSpec},
};
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
    task::{JoinError, JoinHandle},
};
use tracing::{Instrument, error, info, info_span, warn};

/// Why the interactive loop stopped.
enum Exit {
    Dispatcher(Result<Result<(), DispatchError>, JoinError>),
    Interrupted,
    InputClosed,
}

/// Listens for the `Ctrl+C` signal.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Builds the plugin registry with the in-process Lights plugin.
async fn build_registry() -> anyhow::Result<PluginRegistry> {
    let client = LightsService::new()
        .connect()
        .await
        .context("Failed to start the Lights plugin")?;
    let functions = mcp::import_tools(client)
        .await
        .context("Failed to import the Lights plugin tools")?;

    let mut registry = PluginRegistry::new();
    registry.import_plugin(lights::PLUGIN_NAME, functions);
    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    config.apply(&cli);

    // --- 2. Initialize Logging ---
    // Logs go to stderr; stdout carries the conversation transcript.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!("Configuration loaded. Starting plugins...");

    // --- 3. Register Functions ---
    let registry = Arc::new(build_registry().await?);
    let options = SessionOptions {
        instructions: config.instructions.clone(),
        voice: config.voice,
        input_transcription_model: config.transcription_model.clone(),
        tools: registry.definitions(),
    };

    // --- 4. Connect the Session ---
    let (session, updates) = openai::connect(
        OpenAIConnectOptions {
            url: &config.realtime_url,
            model: &config.model,
            api_key: &config.openai_api_key,
        },
        &options,
    )
    .await?;
    let session: Arc<dyn RealtimeSession> = session;

    // --- 5. Spawn the Dispatcher and Console ---
    let (display_tx, display_rx) = mpsc::unbounded_channel();
    let console_task = tokio::spawn(console::run(display_rx, tokio::io::stdout()));

    let sink = Arc::new(WavFileSink::new(
        config.output_dir.clone(),
        config.audio_player.clone(),
    ));
    let dispatcher = Dispatcher::new(
        session.clone(),
        registry.clone(),
        sink,
        config.dispatcher_config(&cli),
    )
    .with_display(display_tx);
    let span = info_span!("dispatcher", model = %config.model);
    let mut dispatcher_task: JoinHandle<Result<(), DispatchError>> =
        tokio::spawn(dispatcher.run(updates).instrument(span));

    session
        .add_item(ConversationItem::SystemMessage(options.instructions.clone()))
        .await
        .context("Failed to send the system instructions")?;
    info!(
        model = %config.model,
        functions = registry.len(),
        output_dir = %config.output_dir.display(),
        "Session configured."
    );

    // --- 6. Record on Demand ---
    let recorder = Recorder::new(
        config.record_command.clone(),
        WavSpec::pcm16_mono(REALTIME_PCM16_SAMPLE_RATE),
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut recording: Option<Recording> = None;

    let exit = loop {
        println!(
            "{}",
            if recording.is_some() {
                RECORDING_PROMPT
            } else {
                RECORD_PROMPT
            }
        );

        tokio::select! {
            result = &mut dispatcher_task => break Exit::Dispatcher(result),
            _ = shutdown_signal() => break Exit::Interrupted,
            line = lines.next_line() => {
                match line.context("Failed to read from stdin")? {
                    Some(_) => {}
                    None => break Exit::InputClosed,
                }
            }
        }

        recording = match recording.take() {
            Some(active) => {
                if let Err(e) = active.stop().await {
                    warn!(error = %e, "Recording ended with an error");
                }
                None
            }
            None => match recorder.start(session.clone()) {
                Ok(started) => Some(started),
                Err(e) => {
                    error!(error = %e, "Failed to start recording");
                    None
                }
            },
        };
    };

    // --- 7. Shut Down ---
    if let Some(active) = recording {
        if let Err(e) = active.stop().await {
            warn!(error = %e, "Recording ended with an error");
        }
    }

    let outcome = match exit {
        Exit::Dispatcher(result) => result.context("Dispatcher task panicked")?,
        Exit::Interrupted | Exit::InputClosed => {
            dispatcher_task.abort();
            if let Err(e) = dispatcher_task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Dispatcher task failed during shutdown");
                }
            }
            Ok(())
        }
    };

    if let Err(e) = console_task.await.context("Console task panicked")? {
        warn!(error = %e, "Console output failed");
    }

    match outcome {
        Ok(()) => {
            info!("Session ended.");
            Ok(())
        }
        Err(e) => Err(e).context("Session ended with an error"),
    }
}

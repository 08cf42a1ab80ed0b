//! Console transcript of a session.

use realtime_core::dispatcher::DisplayEvent;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

pub const RECORD_PROMPT: &str = "Press enter to start recording... Press Enter to stop.";
pub const RECORDING_PROMPT: &str = "Recording... Press Enter to stop.";

/// Formats one event exactly as it is written to the console. Streamed
/// fragments carry no line break of their own.
pub fn render(event: &DisplayEvent) -> String {
    match event {
        DisplayEvent::SessionStarted { session_id } => {
            format!("<<< Session started. ID: {}\n\n", session_id)
        }
        DisplayEvent::SpeechStarted { audio_start_ms } => format!(
            "  -- Voice activity detection started at {:?}\n",
            Duration::from_millis(*audio_start_ms)
        ),
        DisplayEvent::SpeechFinished { audio_end_ms } => format!(
            "  -- Voice activity detection ended at {:?}\n",
            Duration::from_millis(*audio_end_ms)
        ),
        DisplayEvent::ItemStarted { function_name } => match function_name {
            Some(name) => format!("  -- Begin streaming of new item\n    {}: ", name),
            None => "  -- Begin streaming of new item\n".to_string(),
        },
        DisplayEvent::Fragment(fragment) => fragment.clone(),
        DisplayEvent::ItemFinished { item_id } => {
            format!("\n  -- Item streaming finished, item_id={}\n", item_id)
        }
        DisplayEvent::FunctionInvoked { name } => {
            format!("    + Responding to tool invoked by item: {}\n", name)
        }
        DisplayEvent::Message { role, transcript } => {
            let role = role.map(|role| role.to_string()).unwrap_or_default();
            format!("    + [{}]: {}\n", role, transcript)
        }
        DisplayEvent::UserTranscript(transcript) => {
            format!("\n  -- User audio transcript: {}\n\n", transcript)
        }
        DisplayEvent::TurnFinished { status, continuing } => {
            let mut line = format!("  -- Model turn generation finished. Status: {}\n", status);
            if *continuing {
                line.push_str("  -- Ending client turn for pending tool responses\n");
            }
            line
        }
        DisplayEvent::AudioSaved { item_id, bytes } => {
            format!("Raw audio output for {}: {} bytes\n", item_id, bytes)
        }
        DisplayEvent::Error(message) => format!("\nERROR: {}\n", message),
    }
}

/// Writes every event to `out` until all senders are dropped.
pub async fn run<W>(mut events: mpsc::UnboundedReceiver<DisplayEvent>, mut out: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events.recv().await {
        out.write_all(render(&event).as_bytes()).await?;
        out.flush().await?;
    }
    Ok(())
}

//! Microphone capture through an external recorder process.
//!
//! The recorder writes raw little-endian PCM16 to its stdout; a pump task
//! forwards it to the session's input buffer in whole-sample chunks while the
//! dispatcher keeps consuming updates.

use crate::audio_utils;
use anyhow::{Context, Result};
use bytes::Bytes;
use realtime_core::{realtime_api::RealtimeSession, wav::WavSpec};
use std::process::Stdio;
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// 100 ms of 24 kHz mono PCM16.
const READ_CHUNK_BYTES: usize = 4800;

/// Launches the capture command.
pub struct Recorder {
    program: String,
    format: WavSpec,
}

impl Recorder {
    pub fn new(program: impl Into<String>, format: WavSpec) -> Self {
        Self {
            program: program.into(),
            format,
        }
    }

    /// Arguments asking `sox` to record from the default device and write raw
    /// samples in `format` to stdout.
    pub fn args(&self) -> Vec<String> {
        vec![
            "-q".to_string(),
            "-d".to_string(),
            "-t".to_string(),
            "raw".to_string(),
            "-b".to_string(),
            self.format.bits_per_sample.to_string(),
            "-e".to_string(),
            "signed-integer".to_string(),
            "-r".to_string(),
            self.format.sample_rate.to_string(),
            "-c".to_string(),
            self.format.channels.to_string(),
            "-".to_string(),
        ]
    }

    /// Starts recording and streaming into `session`.
    pub fn start(&self, session: Arc<dyn RealtimeSession>) -> Result<Recording> {
        let mut child = Command::new(&self.program)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start recorder '{}'", self.program))?;
        let stdout = child
            .stdout
            .take()
            .context("Recorder stdout was not captured")?;
        info!(program = %self.program, "Recording started.");

        let pump = tokio::spawn(async move { pump_audio(stdout, session.as_ref()).await });
        Ok(Recording { child, pump })
    }
}

/// A running capture.
pub struct Recording {
    child: Child,
    pump: JoinHandle<Result<usize>>,
}

impl Recording {
    /// Stops the recorder and waits for the remaining audio to be sent.
    /// Returns the number of bytes appended to the session.
    pub async fn stop(mut self) -> Result<usize> {
        if let Err(e) = self.child.kill().await {
            // Already exited on its own.
            debug!(error = %e, "Recorder kill failed");
        }
        let sent = self.pump.await.context("Audio pump task panicked")??;
        info!(bytes = sent, "Recording stopped.");
        Ok(sent)
    }
}

/// Forwards PCM16 from `reader` to the session until EOF. A trailing odd byte
/// is held back until its sample completes, and dropped at EOF.
pub async fn pump_audio<R>(mut reader: R, session: &dyn RealtimeSession) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut pending = Vec::with_capacity(READ_CHUNK_BYTES + 1);
    let mut sent = 0;

    loop {
        let read = reader
            .read(&mut chunk)
            .await
            .context("Failed to read recorder output")?;
        if read == 0 {
            break;
        }
        pending.extend_from_slice(&chunk[..read]);

        let samples = audio_utils::take_whole_samples(&mut pending);
        if samples.is_empty() {
            continue;
        }
        sent += samples.len();
        session.append_input_audio(Bytes::from(samples)).await?;
    }

    if !pending.is_empty() {
        warn!(bytes = pending.len(), "Dropping incomplete trailing sample");
    }
    Ok(sent)
}

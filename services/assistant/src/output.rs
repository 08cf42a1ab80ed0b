use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use realtime_core::realtime_api::AudioSink;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};

/// Writes each finished answer to a WAV file and optionally plays it.
pub struct WavFileSink {
    directory: PathBuf,
    player: Option<String>,
}

impl WavFileSink {
    pub fn new(directory: impl Into<PathBuf>, player: Option<String>) -> Self {
        Self {
            directory: directory.into(),
            player,
        }
    }

    /// `outputaudio_<yyyyMMddHHmmss>_<item_id>.wav` inside the output directory.
    pub fn file_path(&self, item_id: &str) -> PathBuf {
        let timestamp = Local::now().format("%Y%m%d%H%M%S");
        self.directory
            .join(format!("outputaudio_{}_{}.wav", timestamp, item_id))
    }

    fn play(&self, path: &Path) {
        let Some(player) = &self.player else {
            return;
        };
        match Command::new(player).arg(path).spawn() {
            Ok(mut child) => {
                let path = path.to_path_buf();
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) if !status.success() => {
                            warn!(?status, path = %path.display(), "Audio player exited with failure")
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Audio player failed"),
                    }
                });
            }
            Err(e) => warn!(%player, error = %e, "Failed to start audio player"),
        }
    }
}

#[async_trait]
impl AudioSink for WavFileSink {
    async fn persist(&self, item_id: &str, wav: Vec<u8>) -> Result<()> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .with_context(|| format!("Failed to create {}", self.directory.display()))?;

        let path = self.file_path(item_id);
        tokio::fs::write(&path, &wav)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), bytes = wav.len(), "Output audio saved");

        self.play(&path);
        Ok(())
    }
}

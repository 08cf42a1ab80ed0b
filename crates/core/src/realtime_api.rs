use crate::generic_types::ConversationItem;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// The outbound half of a realtime session with any provider.
///
/// All methods take `&self` so the update dispatcher and the audio capture
/// path can share one handle while updates keep arriving.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RealtimeSession: Send + Sync {
    /// Adds an item (system message, function call output) to the conversation.
    async fn add_item(&self, item: ConversationItem) -> Result<()>;

    /// Asks the model to start a new response turn.
    async fn start_response(&self) -> Result<()>;

    /// Appends raw 16-bit mono PCM audio to the session's input buffer.
    async fn append_input_audio(&self, pcm: Bytes) -> Result<()>;
}

/// Destination for the finished audio of a model turn.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Stores one complete, playable WAV container produced for `item_id`.
    async fn persist(&self, item_id: &str, wav: Vec<u8>) -> Result<()>;
}

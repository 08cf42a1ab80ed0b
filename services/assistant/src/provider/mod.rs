//! Provider-specific realtime sessions.

pub mod openai;

use realtime_core::generic_types::SessionUpdate;
use tokio_stream::wrappers::ReceiverStream;

/// Capacity of the channel between a provider's reader task and the dispatcher.
pub const SESSION_UPDATE_BUFFER: usize = 128;

/// Ordered updates of one session. An `Err` item is the last one.
pub type SessionUpdateStream = ReceiverStream<anyhow::Result<SessionUpdate>>;

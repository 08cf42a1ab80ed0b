use crate::tools::FunctionDefinition;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generic configuration for starting a realtime session with any provider.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// System instructions added to the conversation once the session starts.
    pub instructions: String,
    pub voice: Voice,
    /// Model used to transcribe the user's speech, if any.
    pub input_transcription_model: Option<String>,
    pub tools: Vec<FunctionDefinition>,
}

/// Output voice of the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Voice {
    Alloy,
    #[default]
    Echo,
    Shimmer,
}

impl std::str::FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "alloy" => Ok(Voice::Alloy),
            "echo" => Ok(Voice::Echo),
            "shimmer" => Ok(Voice::Shimmer),
            other => Err(format!("unknown voice '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// An item the client adds to the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationItem {
    SystemMessage(String),
    /// The result of a function call, echoing the call's identifier.
    FunctionCallOutput { call_id: String, output: String },
}

/// An update emitted by the realtime session, in provider order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    SessionStarted {
        session_id: String,
    },
    InputSpeechStarted {
        audio_start_ms: u64,
    },
    InputSpeechFinished {
        audio_end_ms: u64,
    },
    /// The model began streaming an item (a message or a function call).
    ItemStreamingStarted {
        item_id: String,
        function_name: Option<String>,
    },
    ItemStreamingPartDelta(ItemDelta),
    ItemStreamingFinished(ItemFinished),
    /// The transcript of the user's spoken input is complete.
    InputTranscriptionFinished {
        transcript: String,
    },
    /// The model finished a response turn.
    ResponseFinished {
        status: String,
        created_items: Vec<CreatedItem>,
    },
    Error {
        message: String,
    },
}

/// An incremental fragment of a streaming item. Any combination of fields
/// may be present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemDelta {
    pub item_id: String,
    pub text: Option<String>,
    pub audio_transcript: Option<String>,
    /// Raw PCM16 audio.
    pub audio_bytes: Option<Bytes>,
    pub function_arguments: Option<String>,
}

impl ItemDelta {
    pub fn text(item_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn audio_transcript(item_id: impl Into<String>, transcript: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            audio_transcript: Some(transcript.into()),
            ..Default::default()
        }
    }

    pub fn audio(item_id: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            item_id: item_id.into(),
            audio_bytes: Some(bytes.into()),
            ..Default::default()
        }
    }

    pub fn function_arguments(item_id: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            function_arguments: Some(arguments.into()),
            ..Default::default()
        }
    }
}

/// The terminal event of a streaming item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemFinished {
    pub item_id: String,
    /// Present when the item is a function call.
    pub function_call_id: Option<String>,
    pub function_name: Option<String>,
    pub message_role: Option<MessageRole>,
    pub content_parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentPart {
    pub text: Option<String>,
    pub audio_transcript: Option<String>,
}

/// An item the model created during a response turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreatedItem {
    pub item_id: String,
    pub function_name: Option<String>,
}

impl CreatedItem {
    pub fn is_function_call(&self) -> bool {
        self.function_name.as_deref().is_some_and(|name| !name.is_empty())
    }
}

//! Handles the real-time WebSocket connection to OpenAI.
//!
//! Outbound requests are built from the `async-openai` realtime types; inbound
//! events are decoded with the local wire types below and translated into
//! provider-agnostic [`SessionUpdate`]s.

use super::{SESSION_UPDATE_BUFFER, SessionUpdateStream};
use crate::audio_utils;
use anyhow::{Context, Result};
use async_openai::types::realtime::{self as oai_realtime, ClientEvent as OAIClientEvent};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use realtime_core::{
    generic_types::{
        ContentPart, ConversationItem, CreatedItem, ItemDelta, ItemFinished, SessionOptions,
        SessionUpdate, Voice,
    },
    realtime_api::RealtimeSession,
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::{
    net::TcpStream,
    sync::{Mutex, mpsc},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, info, warn};

// --- Local OpenAI Realtime server events (for encapsulation) ---
mod openai_realtime_types {
    use realtime_core::generic_types::MessageRole;
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    #[serde(tag = "type")]
    pub(super) enum ServerEvent {
        #[serde(rename = "session.created")]
        SessionCreated { session: Session },
        #[serde(rename = "input_audio_buffer.speech_started")]
        SpeechStarted { audio_start_ms: u64 },
        #[serde(rename = "input_audio_buffer.speech_stopped")]
        SpeechStopped { audio_end_ms: u64 },
        #[serde(rename = "response.output_item.added")]
        OutputItemAdded { item: Item },
        #[serde(rename = "response.output_item.done")]
        OutputItemDone { item: Item },
        #[serde(rename = "response.text.delta")]
        TextDelta { item_id: String, delta: String },
        #[serde(rename = "response.audio_transcript.delta")]
        AudioTranscriptDelta { item_id: String, delta: String },
        #[serde(rename = "response.audio.delta")]
        AudioDelta { item_id: String, delta: String },
        #[serde(rename = "response.function_call_arguments.delta")]
        FunctionCallArgumentsDelta { item_id: String, delta: String },
        #[serde(rename = "conversation.item.input_audio_transcription.completed")]
        InputTranscriptionCompleted { transcript: String },
        #[serde(rename = "response.done")]
        ResponseDone { response: Response },
        #[serde(rename = "error")]
        Error { error: ErrorDetail },
        #[serde(other)]
        Other,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct Session {
        pub id: String,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct Item {
        pub id: String,
        pub r#type: String,
        pub role: Option<MessageRole>,
        pub name: Option<String>,
        pub call_id: Option<String>,
        #[serde(default)]
        pub content: Vec<ItemContent>,
    }

    impl Item {
        pub fn is_function_call(&self) -> bool {
            self.r#type == "function_call"
        }
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct ItemContent {
        pub text: Option<String>,
        pub transcript: Option<String>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct Response {
        #[serde(default)]
        pub status: String,
        #[serde(default)]
        pub output: Vec<Item>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct ErrorDetail {
        pub message: String,
    }
}

use openai_realtime_types::ServerEvent;

type OpenAISocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection parameters for the OpenAI Realtime API.
pub struct OpenAIConnectOptions<'a> {
    pub url: &'a str,
    pub model: &'a str,
    pub api_key: &'a SecretString,
}

/// The outbound half of an OpenAI realtime session.
pub struct OpenAIRealtimeSession {
    writer: Arc<Mutex<SplitSink<OpenAISocket, WsMessage>>>,
}

impl OpenAIRealtimeSession {
    async fn send(&self, event: OAIClientEvent) -> Result<()> {
        let text = serde_json::to_string(&event)?;
        self.writer
            .lock()
            .await
            .send(WsMessage::Text(text.into()))
            .await
            .context("Failed to send event to OpenAI Realtime WebSocket")
    }
}

#[async_trait]
impl RealtimeSession for OpenAIRealtimeSession {
    async fn add_item(&self, item: ConversationItem) -> Result<()> {
        self.send(conversation_item_event(item)).await
    }

    async fn start_response(&self) -> Result<()> {
        let response_event = oai_realtime::ResponseCreateEvent {
            response: None,
            event_id: None,
        };
        self.send(OAIClientEvent::ResponseCreate(response_event))
            .await
    }

    async fn append_input_audio(&self, pcm: Bytes) -> Result<()> {
        let append_event = oai_realtime::InputAudioBufferAppendEvent {
            audio: audio_utils::encode_pcm16(&pcm),
            event_id: None,
        };
        self.send(OAIClientEvent::InputAudioBufferAppend(append_event))
            .await
    }
}

/// Opens the WebSocket, configures the session and starts the reader task.
///
/// # Returns
/// A tuple containing:
/// 1. The session handle used to send items, responses and input audio.
/// 2. The ordered stream of updates, which ends when the socket closes.
pub async fn connect(
    connection: OpenAIConnectOptions<'_>,
    options: &SessionOptions,
) -> Result<(Arc<OpenAIRealtimeSession>, SessionUpdateStream)> {
    let url = format!("{}?model={}", connection.url, connection.model);
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", connection.api_key.expose_secret()).parse()?,
    );
    request
        .headers_mut()
        .insert("OpenAI-Beta", "realtime=v1".parse()?);

    let (ws_stream, _) = connect_async(request)
        .await
        .context("Failed to connect to OpenAI Realtime WebSocket")?;
    let (openai_tx, mut openai_rx) = ws_stream.split();
    info!(model = connection.model, "Connected to OpenAI Realtime API.");

    let session = Arc::new(OpenAIRealtimeSession {
        writer: Arc::new(Mutex::new(openai_tx)),
    });
    session
        .send(session_update_event(connection.model, options))
        .await?;

    let (tx, rx) = mpsc::channel(SESSION_UPDATE_BUFFER);
    tokio::spawn(async move {
        while let Some(msg_result) = openai_rx.next().await {
            let text = match msg_result {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(frame)) => {
                    info!(?frame, "OpenAI Realtime WebSocket closed.");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    let _ = tx
                        .send(Err(anyhow::Error::new(e).context("OpenAI Realtime WebSocket failed")))
                        .await;
                    break;
                }
            };

            let update = match decode_server_event(&text) {
                Ok(Some(update)) => Ok(update),
                Ok(None) => continue,
                Err(e) => Err(e),
            };
            let failed = update.is_err();
            if tx.send(update).await.is_err() {
                debug!("Session update receiver dropped; stopping reader.");
                break;
            }
            if failed {
                break;
            }
        }
    });

    Ok((session, ReceiverStream::new(rx)))
}

/// Builds the initial `session.update` request.
fn session_update_event(model: &str, options: &SessionOptions) -> OAIClientEvent {
    let tools: Vec<oai_realtime::ToolDefinition> = options
        .tools
        .iter()
        .map(|tool| oai_realtime::ToolDefinition::Function {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        })
        .collect();
    let tool_choice = (!tools.is_empty()).then_some(oai_realtime::ToolChoice::Auto);

    let session_config = oai_realtime::SessionResource {
        model: Some(model.to_string()),
        modalities: Some(vec!["text".to_string(), "audio".to_string()]),
        voice: Some(realtime_voice(options.voice)),
        input_audio_format: Some(oai_realtime::AudioFormat::PCM16),
        output_audio_format: Some(oai_realtime::AudioFormat::PCM16),
        input_audio_transcription: options.input_transcription_model.as_ref().map(|model| {
            oai_realtime::AudioTranscription {
                model: Some(model.clone()),
                ..Default::default()
            }
        }),
        turn_detection: Some(oai_realtime::TurnDetection::ServerVAD {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            interrupt_response: Some(true),
            create_response: Some(true),
        }),
        tools: Some(tools),
        tool_choice,
        ..Default::default()
    };
    OAIClientEvent::SessionUpdate(oai_realtime::SessionUpdateEvent {
        session: session_config,
        event_id: None,
    })
}

fn realtime_voice(voice: Voice) -> oai_realtime::RealtimeVoice {
    match voice {
        Voice::Alloy => oai_realtime::RealtimeVoice::Alloy,
        Voice::Echo => oai_realtime::RealtimeVoice::Echo,
        Voice::Shimmer => oai_realtime::RealtimeVoice::Shimmer,
    }
}

fn conversation_item_event(item: ConversationItem) -> OAIClientEvent {
    let item = match item {
        ConversationItem::SystemMessage(text) => oai_realtime::Item {
            r#type: Some(oai_realtime::ItemType::Message),
            role: Some(oai_realtime::ItemRole::System),
            content: Some(vec![oai_realtime::ItemContent {
                r#type: oai_realtime::ItemContentType::InputText,
                text: Some(text),
                audio: None,
                transcript: None,
            }]),
            id: None,
            status: None,
            call_id: None,
            name: None,
            arguments: None,
            output: None,
        },
        ConversationItem::FunctionCallOutput { call_id, output } => oai_realtime::Item {
            r#type: Some(oai_realtime::ItemType::FunctionCallOutput),
            call_id: Some(call_id),
            output: Some(output),
            id: None,
            status: None,
            role: None,
            content: None,
            name: None,
            arguments: None,
        },
    };
    OAIClientEvent::ConversationItemCreate(oai_realtime::ConversationItemCreateEvent {
        item,
        event_id: None,
        previous_item_id: None,
    })
}

/// Decodes one text frame. Event kinds the dispatcher has no use for yield
/// `Ok(None)`.
fn decode_server_event(text: &str) -> Result<Option<SessionUpdate>> {
    let event: ServerEvent =
        serde_json::from_str(text).context("Malformed OpenAI Realtime server event")?;
    translate(event)
}

fn translate(event: ServerEvent) -> Result<Option<SessionUpdate>> {
    let update = match event {
        ServerEvent::SessionCreated { session } => SessionUpdate::SessionStarted {
            session_id: session.id,
        },
        ServerEvent::SpeechStarted { audio_start_ms } => {
            SessionUpdate::InputSpeechStarted { audio_start_ms }
        }
        ServerEvent::SpeechStopped { audio_end_ms } => {
            SessionUpdate::InputSpeechFinished { audio_end_ms }
        }
        ServerEvent::OutputItemAdded { item } => SessionUpdate::ItemStreamingStarted {
            function_name: if item.is_function_call() {
                item.name
            } else {
                None
            },
            item_id: item.id,
        },
        ServerEvent::OutputItemDone { item } => {
            let (function_call_id, function_name) = if item.is_function_call() {
                (item.call_id, item.name)
            } else {
                (None, None)
            };
            SessionUpdate::ItemStreamingFinished(ItemFinished {
                item_id: item.id,
                function_call_id,
                function_name,
                message_role: item.role,
                content_parts: item
                    .content
                    .into_iter()
                    .map(|part| ContentPart {
                        text: part.text,
                        audio_transcript: part.transcript,
                    })
                    .collect(),
            })
        }
        ServerEvent::TextDelta { item_id, delta } => {
            SessionUpdate::ItemStreamingPartDelta(ItemDelta::text(item_id, delta))
        }
        ServerEvent::AudioTranscriptDelta { item_id, delta } => {
            SessionUpdate::ItemStreamingPartDelta(ItemDelta::audio_transcript(item_id, delta))
        }
        ServerEvent::AudioDelta { item_id, delta } => {
            let bytes = audio_utils::decode_pcm16(&delta)
                .with_context(|| format!("Invalid audio payload for item {}", item_id))?;
            SessionUpdate::ItemStreamingPartDelta(ItemDelta::audio(item_id, bytes))
        }
        ServerEvent::FunctionCallArgumentsDelta { item_id, delta } => {
            SessionUpdate::ItemStreamingPartDelta(ItemDelta::function_arguments(item_id, delta))
        }
        ServerEvent::InputTranscriptionCompleted { transcript } => {
            SessionUpdate::InputTranscriptionFinished { transcript }
        }
        ServerEvent::ResponseDone { response } => SessionUpdate::ResponseFinished {
            status: response.status,
            created_items: response
                .output
                .into_iter()
                .map(|item| CreatedItem {
                    function_name: if item.is_function_call() {
                        item.name
                    } else {
                        None
                    },
                    item_id: item.id,
                })
                .collect(),
        },
        ServerEvent::Error { error } => {
            warn!(message = %error.message, "OpenAI Realtime API error event");
            SessionUpdate::Error {
                message: error.message,
            }
        }
        ServerEvent::Other => return Ok(None),
    };
    Ok(Some(update))
}

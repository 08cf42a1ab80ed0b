//! Session Update Dispatcher
//!
//! This module consumes the ordered update stream of a single realtime
//! session. It accumulates streamed audio and function-call arguments per item,
//! invokes registered functions once a call has finished streaming, and decides
//! at the end of every model turn whether the client must drive another turn
//! (tool outputs are pending) or whether the turn's audio is final and can be
//! written out.

use crate::{
    generic_types::{
        ConversationItem, CreatedItem, ItemDelta, ItemFinished, MessageRole, SessionUpdate,
    },
    realtime_api::{AudioSink, RealtimeSession},
    tools::{FunctionCall, PluginRegistry, decode_arguments, encode_result, parse_function_name},
    wav::{WavSpec, encode_wav},
};
use bytes::BytesMut;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What to do when the provider reports an error event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Log the error and keep listening; the provider may recover.
    #[default]
    Continue,
    /// End the dispatcher with [`DispatchError::Protocol`].
    Terminate,
}

/// What to do after a model turn that produced no function calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FinalTurnPolicy {
    /// Keep listening for the next user turn.
    #[default]
    KeepListening,
    /// Stop the dispatcher once the turn's audio has been flushed.
    EndSession,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherConfig {
    /// Layout of the PCM audio streamed by the model.
    pub output_format: WavSpec,
    pub on_error: ErrorPolicy,
    pub on_final_turn: FinalTurnPolicy,
}

/// Turn-taking state between client and model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnState {
    /// The model owns the next move.
    #[default]
    AwaitingModel,
    /// The last turn produced function calls; the client has supplied their
    /// outputs and requested the continuation.
    ExpectingContinuation,
}

/// Errors that end the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Session reported an error: {0}")]
    Protocol(String),
    #[error("Session update stream failed: {0:#}")]
    Stream(anyhow::Error),
    #[error("Session request failed: {0:#}")]
    Session(anyhow::Error),
    #[error("Failed to persist output audio for item {item_id}: {reason:#}")]
    Audio {
        item_id: String,
        reason: anyhow::Error,
    },
}

/// Console-facing notifications, emitted fire-and-forget.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    SessionStarted { session_id: String },
    SpeechStarted { audio_start_ms: u64 },
    SpeechFinished { audio_end_ms: u64 },
    ItemStarted { function_name: Option<String> },
    /// A streamed piece of text, transcript or function arguments.
    Fragment(String),
    ItemFinished { item_id: String },
    FunctionInvoked { name: String },
    Message { role: Option<MessageRole>, transcript: String },
    UserTranscript(String),
    TurnFinished { status: String, continuing: bool },
    AudioSaved { item_id: String, bytes: usize },
    Error(String),
}

/// Audio streamed for one item, tagged with the order it first arrived in.
struct AudioBuffer {
    sequence: u64,
    bytes: BytesMut,
}

/// Consumes session updates and drives the conversation.
pub struct Dispatcher {
    session: Arc<dyn RealtimeSession>,
    registry: Arc<PluginRegistry>,
    audio_sink: Arc<dyn AudioSink>,
    display: Option<mpsc::UnboundedSender<DisplayEvent>>,
    config: DispatcherConfig,
    audio_by_item: HashMap<String, AudioBuffer>,
    arguments_by_item: HashMap<String, String>,
    next_sequence: u64,
    turn: TurnState,
}

impl Dispatcher {
    pub fn new(
        session: Arc<dyn RealtimeSession>,
        registry: Arc<PluginRegistry>,
        audio_sink: Arc<dyn AudioSink>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            session,
            registry,
            audio_sink,
            display: None,
            config,
            audio_by_item: HashMap::new(),
            arguments_by_item: HashMap::new(),
            next_sequence: 0,
            turn: TurnState::default(),
        }
    }

    /// Forwards console notifications to `display`.
    pub fn with_display(mut self, display: mpsc::UnboundedSender<DisplayEvent>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn
    }

    /// Audio accumulated so far for an item that is still pending.
    pub fn pending_audio(&self, item_id: &str) -> Option<&[u8]> {
        self.audio_by_item.get(item_id).map(|buffer| &buffer.bytes[..])
    }

    /// Argument text accumulated so far for a function call still streaming.
    pub fn pending_arguments(&self, item_id: &str) -> Option<&str> {
        self.arguments_by_item.get(item_id).map(String::as_str)
    }

    /// Consumes the update stream until it ends or an unrecoverable error
    /// occurs. All accumulated state is released on return.
    pub async fn run<S>(mut self, mut updates: S) -> Result<(), DispatchError>
    where
        S: Stream<Item = anyhow::Result<SessionUpdate>> + Unpin,
    {
        let result = loop {
            let update = match updates.next().await {
                Some(Ok(update)) => update,
                Some(Err(e)) => break Err(DispatchError::Stream(e)),
                None => {
                    info!("Session update stream ended.");
                    break Ok(());
                }
            };
            match self.handle(update).await {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => {
                    info!("Final turn completed. Ending session.");
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = &result {
            error!(error = %e, "Dispatcher terminated.");
        }
        self.release();
        result
    }

    /// Applies a single update.
    pub async fn handle(&mut self, update: SessionUpdate) -> Result<ControlFlow<()>, DispatchError> {
        match update {
            SessionUpdate::SessionStarted { session_id } => {
                info!(%session_id, "Session started");
                self.show(DisplayEvent::SessionStarted { session_id });
            }
            SessionUpdate::InputSpeechStarted { audio_start_ms } => {
                debug!(audio_start_ms, "Voice activity detection started");
                self.show(DisplayEvent::SpeechStarted { audio_start_ms });
            }
            SessionUpdate::InputSpeechFinished { audio_end_ms } => {
                debug!(audio_end_ms, "Voice activity detection ended");
                self.show(DisplayEvent::SpeechFinished { audio_end_ms });
            }
            SessionUpdate::ItemStreamingStarted {
                item_id,
                function_name,
            } => {
                debug!(%item_id, ?function_name, "Begin streaming of new item");
                let function_name = function_name.filter(|name| !name.is_empty());
                self.show(DisplayEvent::ItemStarted { function_name });
            }
            SessionUpdate::ItemStreamingPartDelta(delta) => self.accumulate(delta),
            SessionUpdate::ItemStreamingFinished(finished) => self.finish_item(finished).await?,
            SessionUpdate::InputTranscriptionFinished { transcript } => {
                info!(%transcript, "User audio transcript");
                self.show(DisplayEvent::UserTranscript(transcript));
            }
            SessionUpdate::ResponseFinished {
                status,
                created_items,
            } => return self.finish_turn(status, &created_items).await,
            SessionUpdate::Error { message } => {
                error!(%message, "Session reported an error");
                self.show(DisplayEvent::Error(message.clone()));
                if self.config.on_error == ErrorPolicy::Terminate {
                    return Err(DispatchError::Protocol(message));
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn accumulate(&mut self, delta: ItemDelta) {
        let ItemDelta {
            item_id,
            text,
            audio_transcript,
            audio_bytes,
            function_arguments,
        } = delta;

        for fragment in [&audio_transcript, &text, &function_arguments]
            .into_iter()
            .flatten()
            .filter(|fragment| !fragment.is_empty())
        {
            self.show(DisplayEvent::Fragment(fragment.clone()));
        }

        if let Some(bytes) = audio_bytes {
            let sequence = self.next_sequence;
            let buffer = self
                .audio_by_item
                .entry(item_id.clone())
                .or_insert_with(|| AudioBuffer {
                    sequence,
                    bytes: BytesMut::new(),
                });
            if buffer.sequence == sequence {
                self.next_sequence += 1;
            }
            buffer.bytes.extend_from_slice(&bytes);
        }

        if let Some(arguments) = function_arguments {
            self.arguments_by_item
                .entry(item_id)
                .or_default()
                .push_str(&arguments);
        }
    }

    async fn finish_item(&mut self, finished: ItemFinished) -> Result<(), DispatchError> {
        let ItemFinished {
            item_id,
            function_call_id,
            function_name,
            message_role,
            content_parts,
        } = finished;
        debug!(%item_id, "Item streaming finished");
        self.show(DisplayEvent::ItemFinished {
            item_id: item_id.clone(),
        });

        if let Some(call_id) = function_call_id {
            let name = function_name.unwrap_or_default();
            self.show(DisplayEvent::FunctionInvoked { name: name.clone() });
            let output = self.call_function(&item_id, &call_id, &name).await;
            self.session
                .add_item(ConversationItem::FunctionCallOutput { call_id, output })
                .await
                .map_err(DispatchError::Session)?;
        } else if !content_parts.is_empty() {
            let transcript: String = content_parts
                .iter()
                .filter_map(|part| part.audio_transcript.as_deref().or(part.text.as_deref()))
                .collect();
            self.show(DisplayEvent::Message {
                role: message_role,
                transcript,
            });
        }
        Ok(())
    }

    /// Runs a finished function call and returns the payload of its output
    /// item. Failures are reported to the model rather than ending the loop.
    async fn call_function(&mut self, item_id: &str, call_id: &str, name: &str) -> String {
        let qualified = parse_function_name(name);
        let arguments_text = self.arguments_by_item.remove(item_id).unwrap_or_default();

        let arguments = match decode_arguments(&arguments_text) {
            Ok(arguments) => arguments,
            Err(e) => {
                warn!(%call_id, function = %name, error = %e, "Rejecting function call");
                return error_output(&e);
            }
        };

        let call = FunctionCall {
            plugin_name: qualified.plugin,
            function_name: qualified.function,
            id: call_id.to_string(),
            arguments,
        };
        match self.registry.invoke(&call).await {
            Ok(result) => encode_result(&result),
            Err(e) => {
                warn!(%call_id, error = %e, "Function call failed");
                error_output(&e)
            }
        }
    }

    async fn finish_turn(
        &mut self,
        status: String,
        created_items: &[CreatedItem],
    ) -> Result<ControlFlow<()>, DispatchError> {
        let continuing = created_items.iter().any(CreatedItem::is_function_call);
        info!(%status, continuing, "Model turn generation finished");
        self.show(DisplayEvent::TurnFinished { status, continuing });

        if continuing {
            self.turn = TurnState::ExpectingContinuation;
            info!("Ending client turn for pending tool responses");
            self.session
                .start_response()
                .await
                .map_err(DispatchError::Session)?;
            return Ok(ControlFlow::Continue(()));
        }

        self.flush_audio().await?;
        self.turn = TurnState::AwaitingModel;
        Ok(match self.config.on_final_turn {
            FinalTurnPolicy::KeepListening => ControlFlow::Continue(()),
            FinalTurnPolicy::EndSession => ControlFlow::Break(()),
        })
    }

    /// Writes every pending audio buffer out, in arrival order, exactly once.
    async fn flush_audio(&mut self) -> Result<(), DispatchError> {
        let mut pending: Vec<(String, AudioBuffer)> = self.audio_by_item.drain().collect();
        pending.sort_by_key(|(_, buffer)| buffer.sequence);

        for (item_id, buffer) in pending {
            let bytes = buffer.bytes.len();
            info!(%item_id, bytes, "Raw audio output received");
            let wav = encode_wav(&buffer.bytes, self.config.output_format);
            self.audio_sink
                .persist(&item_id, wav)
                .await
                .map_err(|reason| DispatchError::Audio {
                    item_id: item_id.clone(),
                    reason,
                })?;
            self.show(DisplayEvent::AudioSaved { item_id, bytes });
        }
        Ok(())
    }

    fn release(&mut self) {
        if !self.audio_by_item.is_empty() || !self.arguments_by_item.is_empty() {
            debug!(
                audio = self.audio_by_item.len(),
                arguments = self.arguments_by_item.len(),
                "Discarding unfinished items"
            );
        }
        self.audio_by_item.clear();
        self.arguments_by_item.clear();
    }

    fn show(&self, event: DisplayEvent) {
        if let Some(display) = &self.display {
            // The console may already be gone during shutdown.
            let _ = display.send(event);
        }
    }
}

fn error_output(error: &dyn std::error::Error) -> String {
    serde_json::json!({ "error": error.to_string() }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        generic_types::ContentPart,
        realtime_api::MockRealtimeSession,
        tools::{FunctionArguments, FunctionMetadata, KernelFunction, ToolResult},
    };
    use anyhow::anyhow;
    use async_trait::async_trait;
    use futures::stream;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        written: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn persist(&self, item_id: &str, wav: Vec<u8>) -> anyhow::Result<()> {
            if self.fail {
                return Err(anyhow!("disk full"));
            }
            self.written.lock().unwrap().push((item_id.to_string(), wav));
            Ok(())
        }
    }

    /// Stands in for `Lights-ChangeState`, recording the arguments it was given.
    struct ChangeState {
        metadata: FunctionMetadata,
        calls: Mutex<Vec<FunctionArguments>>,
    }

    #[async_trait]
    impl KernelFunction for ChangeState {
        fn metadata(&self) -> &FunctionMetadata {
            &self.metadata
        }

        async fn invoke(&self, arguments: FunctionArguments) -> anyhow::Result<ToolResult> {
            self.calls.lock().unwrap().push(arguments);
            Ok(json!("ok"))
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        sink: Arc<RecordingSink>,
        change_state: Arc<ChangeState>,
        display: mpsc::UnboundedReceiver<DisplayEvent>,
    }

    fn harness_with(
        session: MockRealtimeSession,
        sink: RecordingSink,
        config: DispatcherConfig,
    ) -> Harness {
        let change_state = Arc::new(ChangeState {
            metadata: FunctionMetadata {
                name: "ChangeState".to_string(),
                description: "Changes the state of the light".to_string(),
                parameters: json!({"type": "object"}),
            },
            calls: Mutex::new(Vec::new()),
        });
        let mut registry = PluginRegistry::new();
        registry.import_plugin("Lights", [change_state.clone() as Arc<dyn KernelFunction>]);

        let sink = Arc::new(sink);
        let (display_tx, display) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            Arc::new(session),
            Arc::new(registry),
            sink.clone(),
            config,
        )
        .with_display(display_tx);

        Harness {
            dispatcher,
            sink,
            change_state,
            display,
        }
    }

    fn harness(session: MockRealtimeSession) -> Harness {
        harness_with(session, RecordingSink::default(), DispatcherConfig::default())
    }

    fn started(item_id: &str, function_name: Option<&str>) -> SessionUpdate {
        SessionUpdate::ItemStreamingStarted {
            item_id: item_id.to_string(),
            function_name: function_name.map(str::to_string),
        }
    }

    fn arguments(item_id: &str, text: &str) -> SessionUpdate {
        SessionUpdate::ItemStreamingPartDelta(ItemDelta::function_arguments(item_id, text))
    }

    fn audio(item_id: &str, bytes: &'static [u8]) -> SessionUpdate {
        SessionUpdate::ItemStreamingPartDelta(ItemDelta::audio(item_id, bytes))
    }

    fn call_finished(item_id: &str, call_id: &str, name: &str) -> SessionUpdate {
        SessionUpdate::ItemStreamingFinished(ItemFinished {
            item_id: item_id.to_string(),
            function_call_id: Some(call_id.to_string()),
            function_name: Some(name.to_string()),
            ..Default::default()
        })
    }

    fn turn_finished(function_names: &[Option<&str>]) -> SessionUpdate {
        SessionUpdate::ResponseFinished {
            status: "completed".to_string(),
            created_items: function_names
                .iter()
                .enumerate()
                .map(|(i, name)| CreatedItem {
                    item_id: format!("item-{}", i),
                    function_name: name.map(str::to_string),
                })
                .collect(),
        }
    }

    fn output_with(call_id: &'static str, output: &'static str) -> impl Fn(&ConversationItem) -> bool {
        move |item| {
            *item
                == ConversationItem::FunctionCallOutput {
                    call_id: call_id.to_string(),
                    output: output.to_string(),
                }
        }
    }

    fn drain(display: &mut mpsc::UnboundedReceiver<DisplayEvent>) -> Vec<DisplayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = display.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_deltas_accumulate_per_item_in_arrival_order() {
        let mut h = harness(MockRealtimeSession::new());
        let updates = [
            audio("a", b"\x01\x02"),
            arguments("call", "{\"id\":"),
            audio("b", b"\xff"),
            audio("a", b"\x03"),
            arguments("other", "[]"),
            arguments("call", " \"1\"}"),
            audio("b", b"\xfe\xfd"),
            audio("a", b""),
        ];
        for update in updates {
            h.dispatcher.handle(update).await.unwrap();
        }

        assert_eq!(h.dispatcher.pending_audio("a"), Some(&b"\x01\x02\x03"[..]));
        assert_eq!(h.dispatcher.pending_audio("b"), Some(&b"\xff\xfe\xfd"[..]));
        assert_eq!(h.dispatcher.pending_arguments("call"), Some("{\"id\": \"1\"}"));
        assert_eq!(h.dispatcher.pending_arguments("other"), Some("[]"));
        assert_eq!(h.dispatcher.pending_arguments("a"), None);
        assert_eq!(h.dispatcher.pending_audio("call"), None);
    }

    #[tokio::test]
    async fn test_empty_argument_fragment_still_creates_buffer() {
        let mut h = harness(MockRealtimeSession::new());
        h.dispatcher.handle(arguments("call", "")).await.unwrap();
        assert_eq!(h.dispatcher.pending_arguments("call"), Some(""));
    }

    #[tokio::test]
    async fn test_fragments_are_displayed_immediately() {
        let mut h = harness(MockRealtimeSession::new());
        h.dispatcher
            .handle(SessionUpdate::ItemStreamingPartDelta(
                ItemDelta::audio_transcript("m", "Hello"),
            ))
            .await
            .unwrap();
        h.dispatcher
            .handle(SessionUpdate::ItemStreamingPartDelta(ItemDelta::text("m", "")))
            .await
            .unwrap();
        h.dispatcher.handle(arguments("c", "{}")).await.unwrap();

        assert_eq!(
            drain(&mut h.display),
            vec![
                DisplayEvent::Fragment("Hello".to_string()),
                DisplayEvent::Fragment("{}".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_finished_function_call_sends_output() {
        let mut session = MockRealtimeSession::new();
        session
            .expect_add_item()
            .withf(output_with("c1", "ok"))
            .times(1)
            .returning(|_| Ok(()));
        session.expect_start_response().never();
        let mut h = harness(session);

        for update in [
            started("fc", Some("Lights-ChangeState")),
            arguments("fc", "{\"isOn\":"),
            arguments("fc", "true}"),
            call_finished("fc", "c1", "Lights-ChangeState"),
        ] {
            h.dispatcher.handle(update).await.unwrap();
        }

        let calls = h.change_state.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["isOn"], "true");
        assert_eq!(h.dispatcher.pending_arguments("fc"), None);

        let events = drain(&mut h.display);
        assert!(events.contains(&DisplayEvent::ItemStarted {
            function_name: Some("Lights-ChangeState".to_string())
        }));
        assert!(events.contains(&DisplayEvent::FunctionInvoked {
            name: "Lights-ChangeState".to_string()
        }));
    }

    #[tokio::test]
    async fn test_function_call_without_argument_deltas_gets_no_arguments() {
        let mut session = MockRealtimeSession::new();
        session
            .expect_add_item()
            .withf(output_with("c2", "ok"))
            .times(1)
            .returning(|_| Ok(()));
        let mut h = harness(session);

        h.dispatcher
            .handle(call_finished("fc", "c2", "Lights-ChangeState"))
            .await
            .unwrap();

        let calls = h.change_state.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].is_empty());
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_reported_to_model() {
        let mut session = MockRealtimeSession::new();
        session
            .expect_add_item()
            .withf(|item| match item {
                ConversationItem::FunctionCallOutput { call_id, output } => {
                    let output: serde_json::Value = serde_json::from_str(output).unwrap();
                    call_id == "c3"
                        && output["error"]
                            .as_str()
                            .is_some_and(|e| e.starts_with("Malformed function arguments"))
                }
                _ => false,
            })
            .times(1)
            .returning(|_| Ok(()));
        let mut h = harness(session);

        h.dispatcher.handle(arguments("fc", "{not json")).await.unwrap();
        let flow = h
            .dispatcher
            .handle(call_finished("fc", "c3", "Lights-ChangeState"))
            .await
            .unwrap();

        assert_eq!(flow, ControlFlow::Continue(()));
        assert!(h.change_state.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_function_is_reported_to_model() {
        let mut session = MockRealtimeSession::new();
        session
            .expect_add_item()
            .withf(output_with(
                "c4",
                r#"{"error":"Function 'Doors-Open' is not registered"}"#,
            ))
            .times(1)
            .returning(|_| Ok(()));
        let mut h = harness(session);

        h.dispatcher
            .handle(call_finished("fc", "c4", "Doors-Open"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_message_item_displays_transcript() {
        let mut h = harness(MockRealtimeSession::new());
        h.dispatcher
            .handle(SessionUpdate::ItemStreamingFinished(ItemFinished {
                item_id: "m".to_string(),
                message_role: Some(MessageRole::Assistant),
                content_parts: vec![
                    ContentPart {
                        audio_transcript: Some("The porch light ".to_string()),
                        text: None,
                    },
                    ContentPart {
                        audio_transcript: Some("is on.".to_string()),
                        text: None,
                    },
                ],
                ..Default::default()
            }))
            .await
            .unwrap();

        assert_eq!(
            drain(&mut h.display).last(),
            Some(&DisplayEvent::Message {
                role: Some(MessageRole::Assistant),
                transcript: "The porch light is on.".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_turn_with_function_calls_requests_continuation() {
        let mut session = MockRealtimeSession::new();
        session.expect_start_response().times(1).returning(|| Ok(()));
        let mut h = harness(session);

        h.dispatcher.handle(audio("m", b"\x01\x00")).await.unwrap();
        let flow = h
            .dispatcher
            .handle(turn_finished(&[None, Some("Lights-GetLights")]))
            .await
            .unwrap();

        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(h.dispatcher.turn_state(), TurnState::ExpectingContinuation);
        assert!(h.sink.written.lock().unwrap().is_empty());
        assert_eq!(h.dispatcher.pending_audio("m"), Some(&b"\x01\x00"[..]));
    }

    #[tokio::test]
    async fn test_final_turn_flushes_each_buffer_once() {
        let mut session = MockRealtimeSession::new();
        session.expect_start_response().never();
        let mut h = harness(session);

        h.dispatcher.handle(audio("second", b"\x05\x06")).await.unwrap();
        h.dispatcher.handle(audio("first", b"\x01\x02")).await.unwrap();
        h.dispatcher.handle(audio("second", b"\x07\x08")).await.unwrap();
        h.dispatcher.handle(turn_finished(&[None, Some("")])).await.unwrap();
        h.dispatcher.handle(turn_finished(&[None])).await.unwrap();

        assert_eq!(h.dispatcher.turn_state(), TurnState::AwaitingModel);
        assert_eq!(h.dispatcher.pending_audio("first"), None);
        assert_eq!(h.dispatcher.pending_audio("second"), None);

        let written = h.sink.written.lock().unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].0, "second");
        assert_eq!(written[0].1.len(), 44 + 4);
        assert_eq!(&written[0].1[44..], b"\x05\x06\x07\x08");
        assert_eq!(written[1].0, "first");
        assert_eq!(
            written[1].1,
            encode_wav(b"\x01\x02", DispatcherConfig::default().output_format)
        );
    }

    #[tokio::test]
    async fn test_continuation_then_final_turn() {
        let mut session = MockRealtimeSession::new();
        session.expect_add_item().times(1).returning(|_| Ok(()));
        session.expect_start_response().times(1).returning(|| Ok(()));
        let mut h = harness(session);

        let updates = vec![
            started("fc", Some("Lights-ChangeState")),
            arguments("fc", r#"{"id":"1","isOn":"true"}"#),
            call_finished("fc", "c1", "Lights-ChangeState"),
            turn_finished(&[Some("Lights-ChangeState")]),
            audio("answer", b"\x00\x01"),
            turn_finished(&[None]),
        ];
        h.dispatcher_run(updates).await.unwrap();

        let written = h.sink.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, "answer");
    }

    #[tokio::test]
    async fn test_error_event_is_not_fatal_by_default() {
        let mut h = harness(MockRealtimeSession::new());
        let result = h
            .dispatcher_run(vec![
                SessionUpdate::Error {
                    message: "rate limited".to_string(),
                },
                SessionUpdate::SessionStarted {
                    session_id: "sess_1".to_string(),
                },
            ])
            .await;

        assert!(result.is_ok());
        assert_eq!(
            drain(&mut h.display),
            vec![
                DisplayEvent::Error("rate limited".to_string()),
                DisplayEvent::SessionStarted {
                    session_id: "sess_1".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_error_event_terminates_when_configured() {
        let config = DispatcherConfig {
            on_error: ErrorPolicy::Terminate,
            ..Default::default()
        };
        let mut h = harness_with(MockRealtimeSession::new(), RecordingSink::default(), config);
        let result = h
            .dispatcher_run(vec![
                SessionUpdate::Error {
                    message: "invalid session".to_string(),
                },
                SessionUpdate::SessionStarted {
                    session_id: "never seen".to_string(),
                },
            ])
            .await;

        assert!(matches!(result, Err(DispatchError::Protocol(ref m)) if m == "invalid session"));
        assert_eq!(
            drain(&mut h.display),
            vec![DisplayEvent::Error("invalid session".to_string())]
        );
    }

    #[tokio::test]
    async fn test_final_turn_can_end_session() {
        let config = DispatcherConfig {
            on_final_turn: FinalTurnPolicy::EndSession,
            ..Default::default()
        };
        let mut h = harness_with(MockRealtimeSession::new(), RecordingSink::default(), config);
        let result = h
            .dispatcher_run(vec![
                audio("answer", b"\x00\x00"),
                turn_finished(&[None]),
                SessionUpdate::InputTranscriptionFinished {
                    transcript: "never seen".to_string(),
                },
            ])
            .await;

        assert!(result.is_ok());
        assert_eq!(h.sink.written.lock().unwrap().len(), 1);
        assert!(
            !drain(&mut h.display).contains(&DisplayEvent::UserTranscript("never seen".to_string()))
        );
    }

    #[tokio::test]
    async fn test_stream_failure_is_fatal() {
        let h = harness(MockRealtimeSession::new());
        let updates = stream::iter(vec![
            Ok(SessionUpdate::InputSpeechStarted { audio_start_ms: 10 }),
            Err(anyhow!("malformed server event")),
        ]);

        let result = h.dispatcher.run(updates).await;
        assert!(matches!(result, Err(DispatchError::Stream(_))));
    }

    #[tokio::test]
    async fn test_session_failure_is_fatal() {
        let mut session = MockRealtimeSession::new();
        session
            .expect_add_item()
            .times(1)
            .returning(|_| Err(anyhow!("socket closed")));
        let mut h = harness(session);

        let result = h
            .dispatcher_run(vec![
                call_finished("fc", "c1", "Lights-ChangeState"),
                SessionUpdate::SessionStarted {
                    session_id: "never seen".to_string(),
                },
            ])
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, DispatchError::Session(_)));
        assert_eq!(err.to_string(), "Session request failed: socket closed");
    }

    #[tokio::test]
    async fn test_audio_sink_failure_is_fatal() {
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let mut h = harness_with(MockRealtimeSession::new(), sink, DispatcherConfig::default());

        let result = h
            .dispatcher_run(vec![audio("answer", b"\x00\x00"), turn_finished(&[])])
            .await;

        assert!(
            matches!(result, Err(DispatchError::Audio { ref item_id, .. }) if item_id == "answer")
        );
    }

    impl Harness {
        /// Runs a fresh copy of the dispatcher over `updates`, keeping the
        /// harness (sink, display, registry) for assertions.
        async fn dispatcher_run(&mut self, updates: Vec<SessionUpdate>) -> Result<(), DispatchError> {
            let dispatcher = std::mem::replace(
                &mut self.dispatcher,
                Dispatcher::new(
                    Arc::new(MockRealtimeSession::new()),
                    Arc::new(PluginRegistry::new()),
                    self.sink.clone(),
                    DispatcherConfig::default(),
                ),
            );
            dispatcher
                .run(stream::iter(updates.into_iter().map(Ok)))
                .await
        }
    }
}

//! Core of the realtime voice assistant.
//!
//! Provider-agnostic pieces of a realtime conversation: the session update
//! model, the dispatcher that drives turn-taking and function calls, the
//! plugin registry, WAV encoding of streamed audio, and the demo `Lights`
//! plugin.

pub mod dispatcher;
pub mod generic_types;
pub mod lights;
pub mod realtime_api;
pub mod tools;
pub mod wav;

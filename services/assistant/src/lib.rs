//! Realtime Assistant Library Crate
//!
//! Everything around the provider-agnostic core that a terminal assistant
//! needs: configuration, the OpenAI realtime connection, microphone capture,
//! WAV output and the console transcript. The `assistant` binary wires these
//! together.

pub mod audio_utils;
pub mod config;
pub mod console;
pub mod output;
pub mod provider;
pub mod recorder;

//! Receiver side of the positional audio streaming engine.
//!
//! Chunks arrive per stream and are appended to a growing accumulator; each tick the
//! [`registry::StreamRegistry`] reopens that stream's [`decoder::IncrementalDecoder`] as needed,
//! feeds a voice from the shared [`pool::VoicePool`] and positions it from its anchor.

pub mod backend;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod device;
pub mod error;
pub mod mixer;
pub mod net;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod position;
pub mod registry;
pub mod resample;
pub mod runtime;
pub mod stream;

#[cfg(test)]
mod test_support;

//! Reasons a receiver stream is torn down before it drains.
//!
//! None of these reach the listener; the registry logs them and releases the stream's resources.
//! Transient conditions (decoder not yet openable, pool exhausted) are states, not errors.

use std::time::Duration;

use audio_stream_proto::EntityId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamFault {
    /// The decoder still cannot open or parse the stream after input finished.
    #[error("decode failed: {0}")]
    DecodeFatal(String),

    /// The payload is a container that cannot be decoded while it is still arriving.
    #[error("non-streamable container ({0})")]
    NonStreamableContainer(&'static str),

    /// The followed entity is no longer in the world snapshot.
    #[error("followed entity {0} is gone")]
    AnchorLost(EntityId),

    /// No voice became free within the configured wait.
    #[error("no free voice after {0:?}")]
    ResourceExhausted(Duration),
}

impl StreamFault {
    /// Whether the teardown is an ordinary end of playback rather than a failure.
    pub fn is_normal(&self) -> bool {
        matches!(self, StreamFault::AnchorLost(_))
    }
}

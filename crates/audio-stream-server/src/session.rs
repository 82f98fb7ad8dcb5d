//! Stream Session: one asset delivered to one recipient set.
//!
//! States: `Created → Streaming → Draining → Closed`.
//! - `Created`: registered, `StartStream` already sent, reader untouched.
//! - `Streaming`: each tick prunes recipients and forwards a bounded number of chunks.
//! - `Draining`: reader exhausted (or failed) and `EndStream` sent.
//! - `Closed`: reader released; the manager drops the session.
//!
//! A session whose recipients all disappear goes straight to `Closed` without further data.

use audio_stream_proto::{Anchor, Message, PlaybackLimits, StreamId};

use crate::config::{ChunkPolicy, DeliveryMode};
use crate::recipient::{ClientId, Outbox};
use crate::source::AudioSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Streaming,
    Draining,
    Closed,
}

impl SessionState {
    /// Whether the manager should stop scheduling this session.
    pub fn is_finished(self) -> bool {
        matches!(self, SessionState::Draining | SessionState::Closed)
    }
}

/// Why a session stopped streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Exhausted,
    SourceFailed,
    NoRecipients,
}

#[derive(Debug)]
pub struct StreamSession {
    id: StreamId,
    name: String,
    source: AudioSource,
    recipients: Vec<ClientId>,
    anchor: Anchor,
    limits: PlaybackLimits,
    state: SessionState,
    end: Option<SessionEnd>,
    chunks_sent: u64,
    /// Outstanding pull requests (pull delivery only).
    credits: u32,
}

impl StreamSession {
    /// Create a session whose `StartStream` has already been delivered to `recipients`.
    pub fn new(
        id: StreamId,
        name: impl Into<String>,
        source: AudioSource,
        recipients: Vec<ClientId>,
        anchor: Anchor,
        limits: PlaybackLimits,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            source,
            recipients,
            anchor,
            limits,
            state: SessionState::Created,
            end: None,
            chunks_sent: 0,
            credits: 0,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn end_reason(&self) -> Option<SessionEnd> {
        self.end
    }

    pub fn recipients(&self) -> &[ClientId] {
        &self.recipients
    }

    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.source.bytes_read()
    }

    /// Record a pull request from `from`; ignored unless it is a current recipient.
    pub fn grant_credit(&mut self, from: ClientId) {
        if self.recipients.contains(&from) {
            self.credits = self.credits.saturating_add(1);
        }
    }

    /// Drop `clients` from the recipient list (takes effect on the next tick).
    pub fn remove_recipients(&mut self, clients: &[ClientId]) {
        self.recipients.retain(|c| !clients.contains(c));
    }

    /// Run one scheduling pass and return the resulting state.
    pub fn tick(&mut self, outbox: &dyn Outbox, policy: &ChunkPolicy) -> SessionState {
        if self.state.is_finished() {
            return self.state;
        }
        self.state = SessionState::Streaming;

        self.recipients.retain(|c| outbox.is_still_valid(*c));
        if self.recipients.is_empty() {
            self.end = Some(SessionEnd::NoRecipients);
            self.close();
            return self.state;
        }

        let budget = match policy.delivery {
            DeliveryMode::Push => policy.chunks_per_tick,
            DeliveryMode::Pull => policy.chunks_per_tick.min(self.credits as usize),
        };

        for _ in 0..budget {
            let chunk = match self.source.read_chunk() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    self.finish(outbox, SessionEnd::Exhausted);
                    break;
                }
                Err(e) => {
                    tracing::warn!(stream = %self.id, name = %self.name, "source read failed: {e}");
                    self.finish(outbox, SessionEnd::SourceFailed);
                    break;
                }
            };

            let last = chunk.len() < self.source.chunk_size();
            outbox.broadcast(
                &self.recipients,
                &Message::StreamData { id: self.id, chunk },
            );
            self.chunks_sent += 1;
            self.credits = self.credits.saturating_sub(1);

            if last {
                self.finish(outbox, SessionEnd::Exhausted);
                break;
            }
        }

        self.state
    }

    /// Broadcast `EndStream` once and move to `Draining`.
    fn finish(&mut self, outbox: &dyn Outbox, reason: SessionEnd) {
        outbox.broadcast(&self.recipients, &Message::EndStream { id: self.id });
        self.end = Some(reason);
        self.state = SessionState::Draining;
        self.source.close();
    }

    /// Release the reader. Idempotent.
    pub fn close(&mut self) {
        self.source.close();
        self.state = SessionState::Closed;
    }
}

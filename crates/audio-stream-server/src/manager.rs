//! Tick-scheduled set of active stream sessions.
//!
//! Owned by the tick thread; the transport is passed in on every call.

use std::collections::HashMap;

use audio_stream_proto::{Anchor, Message, PlaybackLimits, StreamId};

use crate::config::ChunkPolicy;
use crate::error::PlayError;
use crate::library::SoundLibrary;
use crate::recipient::{ClientId, Outbox};
use crate::session::{SessionState, StreamSession};
use crate::source::AudioSource;

/// A validated-by-caller request to stream `name` to `recipients`.
#[derive(Debug, Clone)]
pub struct PlayRequest {
    pub name: String,
    pub recipients: Vec<ClientId>,
    pub anchor: Anchor,
    pub limits: PlaybackLimits,
}

/// Row for operator listings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: StreamId,
    pub name: String,
    pub recipients: usize,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub anchor: Anchor,
}

pub struct SessionManager {
    library: SoundLibrary,
    policy: ChunkPolicy,
    sessions: HashMap<StreamId, StreamSession>,
    log_stream_events: bool,
}

impl SessionManager {
    pub fn new(library: SoundLibrary, policy: ChunkPolicy, log_stream_events: bool) -> Self {
        Self {
            library,
            policy,
            sessions: HashMap::new(),
            log_stream_events,
        }
    }

    pub fn policy(&self) -> &ChunkPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Start streaming `req.name`.
    ///
    /// Rejections happen before any file is opened and before anything is sent. On success
    /// `StartStream` has been queued for every recipient and the session is scheduled.
    pub fn play(&mut self, req: PlayRequest, outbox: &dyn Outbox) -> Result<StreamId, PlayError> {
        validate_limits(&req.limits)?;
        if let Anchor::StaticPoint(p) = req.anchor {
            if !p.is_finite() {
                return Err(PlayError::InvalidParameter {
                    name: "position",
                    value: f32::NAN,
                    expected: "finite coordinates",
                });
            }
        }

        let path = self.library.resolve(&req.name)?;

        let recipients: Vec<ClientId> = req
            .recipients
            .iter()
            .copied()
            .filter(|c| outbox.is_still_valid(*c))
            .collect();
        if recipients.is_empty() {
            return Err(PlayError::NoRecipients);
        }

        let source = AudioSource::open(&path, self.policy.chunk_size)
            .map_err(|source| PlayError::SourceUnavailable {
                path: path.clone(),
                source,
            })?;

        let id = StreamId::new();
        outbox.broadcast(
            &recipients,
            &Message::StartStream {
                id,
                anchor: req.anchor,
                limits: req.limits,
            },
        );

        if self.log_stream_events {
            tracing::info!(
                stream = %id,
                name = %req.name,
                recipients = recipients.len(),
                anchor = %req.anchor,
                "started audio stream"
            );
        }

        let session = StreamSession::new(id, req.name, source, recipients, req.anchor, req.limits);
        self.sessions.insert(id, session);
        Ok(id)
    }

    /// One scheduling pass over every session; finished sessions are closed and dropped.
    pub fn tick(&mut self, outbox: &dyn Outbox) {
        if self.sessions.is_empty() {
            return;
        }
        let policy = self.policy;
        self.sessions.retain(|id, session| {
            let state = session.tick(outbox, &policy);
            if state.is_finished() {
                session.close();
                tracing::debug!(
                    stream = %id,
                    reason = ?session.end_reason(),
                    chunks = session.chunks_sent(),
                    bytes = session.bytes_sent(),
                    "stream session finished"
                );
                false
            } else {
                true
            }
        });
    }

    /// A receiver asked for the next chunk of `id` (pull delivery).
    pub fn on_chunk_requested(&mut self, id: StreamId, from: ClientId) {
        match self.sessions.get_mut(&id) {
            Some(session) => session.grant_credit(from),
            None => tracing::debug!(stream = %id, client = %from, "chunk request for unknown stream"),
        }
    }

    /// Tell `targets` to drop every stream, and stop feeding them.
    ///
    /// Sessions left without recipients close on their next tick without sending more data.
    pub fn stop_all(&mut self, targets: &[ClientId], outbox: &dyn Outbox) {
        outbox.broadcast(targets, &Message::StopAllStreams);
        for session in self.sessions.values_mut() {
            session.remove_recipients(targets);
        }
        tracing::info!(targets = targets.len(), "sent stop-all");
    }

    /// Close every session immediately (shutdown).
    pub fn close_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.close();
        }
        self.sessions.clear();
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self
            .sessions
            .values()
            .filter(|s| s.state() != SessionState::Closed)
            .map(|s| SessionSummary {
                id: s.id(),
                name: s.name().to_string(),
                recipients: s.recipients().len(),
                chunks_sent: s.chunks_sent(),
                bytes_sent: s.bytes_sent(),
                anchor: s.anchor(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }
}

/// Accepted ranges: volume >= 0, 0.1 <= pitch <= 2.0, range >= 0, all finite.
pub fn validate_limits(limits: &PlaybackLimits) -> Result<(), PlayError> {
    let check = |name: &'static str, value: f32, ok: bool, expected: &'static str| {
        if value.is_finite() && ok {
            Ok(())
        } else {
            Err(PlayError::InvalidParameter {
                name,
                value,
                expected,
            })
        }
    };
    check("volume", limits.gain, limits.gain >= 0.0, ">= 0")?;
    check(
        "pitch",
        limits.pitch,
        (0.1..=2.0).contains(&limits.pitch),
        "0.1..=2.0",
    )?;
    check("range", limits.max_distance, limits.max_distance >= 0.0, ">= 0")?;
    Ok(())
}

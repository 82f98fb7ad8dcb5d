//! Per-stream receiver state: accumulator, decoder, voice pipeline and anchor.

use std::collections::VecDeque;
use std::time::Instant;

use audio_stream_proto::{Anchor, PlaybackLimits, StreamId};

use crate::backend::{AudioBackend, VoiceId};
use crate::config::EngineConfig;
use crate::decoder::{Accumulator, Container, IncrementalDecoder};
use crate::error::StreamFault;
use crate::pipeline::VoicePipeline;
use crate::pool::VoicePool;
use crate::position::{EntityLookup, resolve};

/// Outcome of one tick for a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamStatus {
    Active,
    /// Input and decode finished and the voice has nothing queued.
    Drained,
    TornDown(StreamFault),
}

#[derive(Debug)]
pub struct ClientStreamState {
    id: StreamId,
    anchor: Anchor,
    limits: PlaybackLimits,
    /// Chunks received since the last tick.
    incoming: VecDeque<Vec<u8>>,
    accumulator: Accumulator,
    container_checked: bool,
    decoder: IncrementalDecoder,
    pipeline: Option<VoicePipeline>,
    input_finished: bool,
    decode_finished: bool,
    waiting_since: Option<Instant>,
    disposed: bool,
}

impl ClientStreamState {
    pub fn new(id: StreamId, anchor: Anchor, limits: PlaybackLimits, engine: &EngineConfig) -> Self {
        Self {
            id,
            anchor,
            limits,
            incoming: VecDeque::new(),
            accumulator: Accumulator::with_capacity(engine.initial_buffer_bytes),
            container_checked: false,
            decoder: IncrementalDecoder::new(engine.frames_per_buffer),
            pipeline: None,
            input_finished: false,
            decode_finished: false,
            waiting_since: None,
            disposed: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn anchor(&self) -> &Anchor {
        &self.anchor
    }

    pub fn voice(&self) -> Option<VoiceId> {
        self.pipeline.as_ref().map(VoicePipeline::voice)
    }

    pub fn has_voice(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn is_input_finished(&self) -> bool {
        self.input_finished
    }

    pub fn is_decode_finished(&self) -> bool {
        self.decode_finished
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Compressed bytes held, including chunks not yet ingested.
    pub fn buffered_bytes(&self) -> usize {
        self.accumulator.len() + self.incoming.iter().map(Vec::len).sum::<usize>()
    }

    pub fn decoded_frames(&self) -> u64 {
        self.decoder.decoded_frames()
    }

    /// Queue a chunk for the next tick. Ignored once input has finished.
    pub fn push_chunk(&mut self, chunk: Vec<u8>) -> bool {
        if self.input_finished || self.disposed {
            return false;
        }
        if !chunk.is_empty() {
            self.incoming.push_back(chunk);
        }
        true
    }

    pub fn finish_input(&mut self) {
        self.input_finished = true;
    }

    /// Run one tick: resolve the anchor, ingest chunks, reopen the decoder if needed, acquire a
    /// voice, then reclaim, refill and keep the voice playing.
    pub fn advance<B, W>(
        &mut self,
        backend: &mut B,
        pool: &mut VoicePool,
        world: &W,
        engine: &EngineConfig,
        now: Instant,
    ) -> StreamStatus
    where
        B: AudioBackend + ?Sized,
        W: EntityLookup + ?Sized,
    {
        if self.disposed {
            return StreamStatus::Drained;
        }
        let position = match resolve(&self.anchor, world) {
            Ok(p) => p,
            Err(fault) => return StreamStatus::TornDown(fault),
        };
        if let Err(fault) = self.ingest() {
            return StreamStatus::TornDown(fault);
        }
        if self.input_finished && self.accumulator.is_empty() {
            return StreamStatus::Drained;
        }

        if !self.decode_finished
            && let Err(fault) = self.decoder.prepare(&self.accumulator, self.input_finished)
        {
            return StreamStatus::TornDown(fault);
        }

        if self.pipeline.is_none() {
            if !self.decoder.has_context() {
                return StreamStatus::Active;
            }
            match pool.acquire() {
                Some(voice) => {
                    tracing::debug!(stream = %self.id, voice = voice.0, "voice assigned");
                    self.pipeline = Some(VoicePipeline::attach(
                        backend,
                        voice,
                        &self.limits,
                        engine,
                        position,
                    ));
                    self.waiting_since = None;
                }
                None => {
                    let since = *self.waiting_since.get_or_insert(now);
                    if let Some(limit) = engine.voice_wait_timeout
                        && now.saturating_duration_since(since) >= limit
                    {
                        return StreamStatus::TornDown(StreamFault::ResourceExhausted(limit));
                    }
                    return StreamStatus::Active;
                }
            }
        }

        let Some(pipeline) = self.pipeline.as_mut() else {
            return StreamStatus::Active;
        };
        pipeline.set_position(backend, position);
        pipeline.reclaim(backend);
        pipeline.fill(backend, &mut self.decoder);

        if !self.decode_finished
            && self.input_finished
            && !self.decoder.needs_reopen(&self.accumulator)
            && self.decoder.is_caught_up()
        {
            self.decode_finished = true;
            tracing::debug!(
                stream = %self.id,
                frames = self.decoder.decoded_frames(),
                reopens = self.decoder.reopen_count(),
                "decode finished"
            );
            self.decoder.close();
        }

        pipeline.ensure_playing(backend);
        if self.decode_finished && pipeline.queued(backend) == 0 {
            return StreamStatus::Drained;
        }
        StreamStatus::Active
    }

    fn ingest(&mut self) -> Result<(), StreamFault> {
        if !self.incoming.is_empty() {
            // The open context holds a snapshot of the accumulator; drop it before growing.
            self.decoder.release_context();
            while let Some(chunk) = self.incoming.pop_front() {
                if self.accumulator.append(&chunk) {
                    tracing::trace!(
                        stream = %self.id,
                        capacity = self.accumulator.capacity(),
                        "accumulator moved"
                    );
                }
            }
        }

        let enough = self.accumulator.len() >= Container::SIGNATURE_LEN
            || (self.input_finished && !self.accumulator.is_empty());
        if !self.container_checked && enough {
            let container = Container::sniff(self.accumulator.head(Container::SIGNATURE_LEN))?;
            self.decoder.set_container(container);
            self.container_checked = true;
        }
        Ok(())
    }

    /// Release the voice, buffers, decoder and accumulator. Safe to call more than once.
    pub fn dispose<B: AudioBackend + ?Sized>(&mut self, backend: &mut B, pool: &mut VoicePool) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.release(backend, pool);
        }
        self.decoder.close();
        self.accumulator.clear();
        self.incoming.clear();
    }
}

//! Stream Registry: every live receiver stream, advanced once per tick.
//!
//! The registry is the single owner of the backend, the voice pool and the world snapshot;
//! streams borrow them only while being advanced or disposed.

use std::collections::HashMap;
use std::time::Instant;

use audio_stream_proto::{Anchor, EntityId, Message, PlaybackLimits, StreamId, Vec3};

use crate::backend::AudioBackend;
use crate::config::EngineConfig;
use crate::pool::VoicePool;
use crate::position::WorldSnapshot;
use crate::stream::{ClientStreamState, StreamStatus};

pub struct StreamRegistry<B: AudioBackend> {
    backend: B,
    pool: VoicePool,
    world: WorldSnapshot,
    streams: HashMap<StreamId, ClientStreamState>,
    engine: EngineConfig,
}

impl<B: AudioBackend> StreamRegistry<B> {
    pub fn new(mut backend: B, engine: EngineConfig) -> Self {
        backend.set_listener(engine.listener);
        let pool = VoicePool::new(&mut backend, engine.pool_capacity);
        Self {
            backend,
            pool,
            world: WorldSnapshot::new(engine.listener),
            streams: HashMap::new(),
            engine,
        }
    }

    pub fn pool(&self) -> &VoicePool {
        &self.pool
    }

    pub fn world(&self) -> &WorldSnapshot {
        &self.world
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.streams.contains_key(&id)
    }

    pub fn stream(&self, id: StreamId) -> Option<&ClientStreamState> {
        self.streams.get(&id)
    }

    pub fn set_listener(&mut self, position: Vec3) {
        self.world.set_listener(position);
        self.backend.set_listener(position);
    }

    /// Route one sender message.
    pub fn apply(&mut self, msg: Message) {
        match msg {
            Message::StartStream { id, anchor, limits } => self.on_start(id, anchor, limits),
            Message::StreamData { id, chunk } => {
                self.on_data(id, chunk);
            }
            Message::EndStream { id } => {
                self.on_end(id);
            }
            Message::StopAllStreams => {
                self.on_stop_all();
            }
            Message::EntityMoved { entity, position } => self.on_entity_moved(entity, position),
            Message::EntityRemoved { entity } => self.on_entity_removed(entity),
            Message::RequestNextChunk { id } => {
                tracing::debug!(stream = %id, "ignoring sender-bound chunk request");
            }
            Message::Error { message } => tracing::warn!("server error: {message}"),
        }
    }

    /// Create the stream; an id that is already live is restarted from scratch.
    pub fn on_start(&mut self, id: StreamId, anchor: Anchor, limits: PlaybackLimits) {
        if let Some(mut old) = self.streams.remove(&id) {
            tracing::debug!(stream = %id, "duplicate start; restarting stream");
            old.dispose(&mut self.backend, &mut self.pool);
        }
        tracing::info!(stream = %id, %anchor, gain = limits.gain, pitch = limits.pitch, "stream started");
        self.streams
            .insert(id, ClientStreamState::new(id, anchor, limits, &self.engine));
    }

    /// Returns `false` if the id is unknown or its input already ended.
    pub fn on_data(&mut self, id: StreamId, chunk: Vec<u8>) -> bool {
        match self.streams.get_mut(&id) {
            Some(stream) => {
                let accepted = stream.push_chunk(chunk);
                if !accepted {
                    tracing::debug!(stream = %id, "data after end of stream ignored");
                }
                accepted
            }
            None => {
                tracing::debug!(stream = %id, bytes = chunk.len(), "data for unknown stream ignored");
                false
            }
        }
    }

    pub fn on_end(&mut self, id: StreamId) -> bool {
        match self.streams.get_mut(&id) {
            Some(stream) => {
                stream.finish_input();
                true
            }
            None => {
                tracing::debug!(stream = %id, "end for unknown stream ignored");
                false
            }
        }
    }

    /// Tear down every stream now. Returns how many were live.
    pub fn on_stop_all(&mut self) -> usize {
        let n = self.streams.len();
        for (_, mut stream) in self.streams.drain() {
            stream.dispose(&mut self.backend, &mut self.pool);
        }
        if n > 0 {
            tracing::info!(streams = n, "stopped all streams");
        }
        n
    }

    pub fn on_entity_moved(&mut self, entity: EntityId, position: Vec3) {
        self.world.move_entity(entity, position);
    }

    pub fn on_entity_removed(&mut self, entity: EntityId) {
        if !self.world.remove_entity(entity) {
            tracing::debug!(%entity, "removal of unknown entity");
        }
    }

    /// Advance every stream, then dispose the ones that finished. Returns how many were removed.
    pub fn tick(&mut self, now: Instant) -> usize {
        let Self {
            backend,
            pool,
            world,
            streams,
            engine,
        } = self;

        let mut finished = Vec::new();
        for (id, stream) in streams.iter_mut() {
            match stream.advance(backend, pool, &*world, engine, now) {
                StreamStatus::Active => {}
                StreamStatus::Drained => {
                    tracing::debug!(stream = %id, frames = stream.decoded_frames(), "stream drained");
                    finished.push(*id);
                }
                StreamStatus::TornDown(fault) if fault.is_normal() => {
                    tracing::debug!(stream = %id, "stream ended: {fault}");
                    finished.push(*id);
                }
                StreamStatus::TornDown(fault) => {
                    tracing::warn!(stream = %id, "stream torn down: {fault}");
                    finished.push(*id);
                }
            }
        }

        for id in &finished {
            if let Some(mut stream) = streams.remove(id) {
                stream.dispose(backend, pool);
            }
        }
        finished.len()
    }

    /// Dispose every stream and delete all voices.
    pub fn shutdown(mut self) {
        self.on_stop_all();
        let Self {
            mut backend, pool, ..
        } = self;
        pool.destroy(&mut backend);
    }
}

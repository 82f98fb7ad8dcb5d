//! Receiver runtime: one tick thread owning the registry.
//!
//! Network frames and Ctrl-C arrive on one event channel; the tick thread `select!`s between it
//! and the heartbeat. The CPAL stream lives on the same thread and only shares the mixer.

use std::time::Instant;

use anyhow::{Context, Result};
use audio_stream_proto::Message;
use crossbeam_channel::{select, tick, unbounded};

use crate::backend::AudioBackend;
use crate::config::ClientSettings;
use crate::net::{self, ClientEvent, ServerLink};
use crate::output::AudioOutput;
use crate::registry::StreamRegistry;

/// Registry plus the delivery mode the sender expects.
pub struct ClientState<B: AudioBackend> {
    registry: StreamRegistry<B>,
    request_chunks: bool,
    last_report: Option<(usize, usize, usize)>,
}

impl<B: AudioBackend> ClientState<B> {
    pub fn new(registry: StreamRegistry<B>, request_chunks: bool) -> Self {
        Self {
            registry,
            request_chunks,
            last_report: None,
        }
    }

    pub fn registry(&self) -> &StreamRegistry<B> {
        &self.registry
    }

    /// Apply a sender message; returns the chunk request to send back in pull mode.
    pub fn on_message(&mut self, msg: Message) -> Option<Message> {
        let wants_more = match &msg {
            Message::StartStream { id, .. } | Message::StreamData { id, .. } => Some(*id),
            _ => None,
        };
        self.registry.apply(msg);
        let id = wants_more.filter(|_| self.request_chunks)?;
        let live = self
            .registry
            .stream(id)
            .is_some_and(|s| !s.is_input_finished());
        live.then_some(Message::RequestNextChunk { id })
    }

    pub fn tick(&mut self, now: Instant) {
        self.registry.tick(now);
        let report = (
            self.registry.active_streams(),
            self.registry.pool().in_use_count(),
            self.registry.world().entity_count(),
        );
        if self.last_report != Some(report) {
            tracing::debug!(
                streams = report.0,
                voices_in_use = report.1,
                voices_free = self.registry.pool().free_count(),
                entities = report.2,
                "registry changed"
            );
            self.last_report = Some(report);
        }
    }

    pub fn shutdown(self) {
        self.registry.shutdown();
    }
}

pub fn run(settings: ClientSettings) -> Result<()> {
    let output = AudioOutput::open(settings.device.as_deref(), settings.sample_rate)?;
    let registry = StreamRegistry::new(output.mixer(), settings.engine.clone());
    let mut state = ClientState::new(registry, settings.request_chunks);

    let (events_tx, events_rx) = unbounded();
    let (mut link, reader) = net::connect(settings.server, events_tx.clone())?;

    let ctrlc_tx = events_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(ClientEvent::Shutdown);
    })
    .context("install Ctrl-C handler")?;
    drop(events_tx);

    tracing::info!(
        server = %link.peer(),
        device = output.device_name(),
        listener = %state.registry().world().listener(),
        pull = settings.request_chunks,
        "receiver running"
    );

    let ticker = tick(settings.tick_interval);
    loop {
        select! {
            recv(events_rx) -> event => match event {
                Ok(ClientEvent::Message(msg)) => forward(&mut state, &mut link, msg),
                Ok(ClientEvent::Disconnected) => {
                    tracing::info!("sender closed the connection");
                    break;
                }
                Ok(ClientEvent::Shutdown) | Err(_) => break,
            },
            recv(ticker) -> _ => state.tick(Instant::now()),
        }
    }

    state.shutdown();
    link.close();
    let _ = reader.join();
    tracing::info!("receiver stopped");
    Ok(())
}

fn forward<B: AudioBackend>(state: &mut ClientState<B>, link: &mut ServerLink, msg: Message) {
    if let Some(reply) = state.on_message(msg)
        && let Err(e) = link.send(&reply)
    {
        tracing::warn!("chunk request failed: {e:#}");
    }
}

#[cfg(test)]
mod tests {
    use audio_stream_proto::{Anchor, EntityId, PlaybackLimits, StreamId, Vec3};

    use super::*;
    use crate::config::EngineConfig;
    use crate::mixer::{Mixer, OutputFormat};

    fn state(request_chunks: bool) -> ClientState<Mixer> {
        let mixer = Mixer::new(OutputFormat {
            channels: 2,
            sample_rate: 48_000,
        });
        ClientState::new(StreamRegistry::new(mixer, EngineConfig::default()), request_chunks)
    }

    fn start(id: StreamId) -> Message {
        Message::StartStream {
            id,
            anchor: Anchor::StaticPoint(Vec3::ORIGIN),
            limits: PlaybackLimits::default(),
        }
    }

    #[test]
    fn pull_mode_requests_after_start_and_each_chunk() {
        let mut st = state(true);
        let id = StreamId::new();
        assert_eq!(st.on_message(start(id)), Some(Message::RequestNextChunk { id }));
        assert_eq!(
            st.on_message(Message::StreamData {
                id,
                chunk: b"fLaC".to_vec()
            }),
            Some(Message::RequestNextChunk { id })
        );
        assert_eq!(st.on_message(Message::EndStream { id }), None);
    }

    #[test]
    fn pull_mode_skips_unknown_streams() {
        let mut st = state(true);
        let id = StreamId::new();
        let data = Message::StreamData {
            id,
            chunk: vec![0; 8],
        };
        assert_eq!(st.on_message(data), None);
    }

    #[test]
    fn world_updates_reach_the_registry() {
        let mut st = state(false);
        let entity: EntityId = "6f9619ff-8b86-d011-b42d-00cf4fc964ff".parse().unwrap();
        st.on_message(Message::EntityMoved {
            entity,
            position: Vec3::new(1.0, 2.0, 3.0),
        });
        assert_eq!(st.registry().world().entity_count(), 1);
        assert_eq!(st.registry().world().listener(), Vec3::ORIGIN);
        st.on_message(Message::EntityRemoved { entity });
        assert_eq!(st.registry().world().entity_count(), 0);
    }

    #[test]
    fn push_mode_never_requests() {
        let mut st = state(false);
        let id = StreamId::new();
        assert_eq!(st.on_message(start(id)), None);
        assert_eq!(st.registry().active_streams(), 1);
        st.on_message(Message::StopAllStreams);
        st.tick(Instant::now());
        assert_eq!(st.registry().active_streams(), 0);
        assert_eq!(st.registry().pool().free_count(), 32);
    }
}

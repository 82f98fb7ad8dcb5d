//! Sender runtime: one tick thread owning every session and client handle.
//!
//! Network, console and Ctrl-C all feed a single event channel; the tick thread `select!`s
//! between it and the heartbeat so no session state is ever touched from another thread.

use std::collections::HashMap;
use std::net::TcpListener;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use audio_stream_proto::{Anchor, EntityId, Message, Vec3};
use crossbeam_channel::{select, tick, unbounded};

use crate::config::ServerSettings;
use crate::console::{self, ConsoleCommand};
use crate::library::SoundLibrary;
use crate::manager::{PlayRequest, SessionManager};
use crate::net::{self, ServerEvent};
use crate::recipient::{ClientId, ClientTable, Outbox};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// State owned by the tick thread.
pub struct ServerState {
    settings: ServerSettings,
    clients: ClientTable,
    manager: SessionManager,
    /// Last known position of every live entity, replayed to late joiners.
    entities: HashMap<EntityId, Vec3>,
    writers: Vec<JoinHandle<()>>,
}

impl ServerState {
    pub fn new(settings: ServerSettings) -> Self {
        let manager = SessionManager::new(
            SoundLibrary::new(&settings.sounds_dir),
            settings.policy,
            settings.log_stream_events,
        );
        Self {
            settings,
            clients: ClientTable::new(),
            manager,
            entities: HashMap::new(),
            writers: Vec::new(),
        }
    }

    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn tick(&mut self) {
        self.manager.tick(&self.clients);
    }

    fn handle_event(&mut self, event: ServerEvent) -> Flow {
        match event {
            ServerEvent::Connected { handle, writer } => {
                let id = handle.id;
                self.clients.insert(handle);
                self.writers.push(writer);
                for (entity, position) in &self.entities {
                    let msg = Message::EntityMoved {
                        entity: *entity,
                        position: *position,
                    };
                    self.clients.send(id, &msg);
                }
            }
            ServerEvent::Disconnected(id) => {
                if let Some(handle) = self.clients.remove(id) {
                    tracing::info!(client = %id, peer = %handle.peer, "receiver disconnected");
                }
            }
            ServerEvent::ChunkRequested { client, id } => {
                self.manager.on_chunk_requested(id, client);
            }
            ServerEvent::Console(cmd) => return self.handle_command(cmd),
            ServerEvent::Shutdown => return Flow::Quit,
        }
        Flow::Continue
    }

    fn targets(&self, requested: &[u64]) -> Vec<ClientId> {
        if requested.is_empty() {
            self.clients.connected_ids()
        } else {
            requested.iter().map(|n| ClientId(*n)).collect()
        }
    }

    fn handle_command(&mut self, cmd: ConsoleCommand) -> Flow {
        match cmd {
            ConsoleCommand::Play {
                file,
                at,
                entity,
                volume,
                pitch,
                range,
                to,
            } => {
                let anchor = match (entity, at) {
                    (Some(e), _) => Anchor::FollowedEntity(e),
                    (None, Some(p)) => Anchor::StaticPoint(p),
                    (None, None) => Anchor::StaticPoint(Vec3::ORIGIN),
                };
                let mut limits = self.settings.defaults;
                limits.gain = volume.unwrap_or(limits.gain);
                limits.pitch = pitch.unwrap_or(limits.pitch);
                limits.max_distance = range.unwrap_or(limits.max_distance);

                let recipients = self.targets(&to);
                if let Anchor::FollowedEntity(e) = anchor {
                    match self.entities.get(&e) {
                        Some(position) => {
                            let msg = Message::EntityMoved {
                                entity: e,
                                position: *position,
                            };
                            self.clients.broadcast(&recipients, &msg);
                        }
                        None => tracing::warn!(entity = %e, "playing on an entity with no known position"),
                    }
                }

                let req = PlayRequest {
                    name: file.clone(),
                    recipients,
                    anchor,
                    limits,
                };
                match self.manager.play(req, &self.clients) {
                    Ok(id) => println!("playing {file} as {id}"),
                    Err(e) => {
                        tracing::warn!(name = %file, "play rejected: {e}");
                        eprintln!("play failed: {e}");
                    }
                }
            }
            ConsoleCommand::Stopall { to } => {
                let targets = self.targets(&to);
                self.manager.stop_all(&targets, &self.clients);
            }
            ConsoleCommand::Entity { id, x, y, z } => {
                let position = Vec3::new(x, y, z);
                self.entities.insert(id, position);
                let msg = Message::EntityMoved {
                    entity: id,
                    position,
                };
                self.clients.broadcast(&self.clients.connected_ids(), &msg);
            }
            ConsoleCommand::Despawn { id } => {
                self.entities.remove(&id);
                let msg = Message::EntityRemoved { entity: id };
                self.clients.broadcast(&self.clients.connected_ids(), &msg);
            }
            ConsoleCommand::Clients => {
                if self.clients.is_empty() {
                    println!("no clients connected");
                }
                for c in self.clients.handles() {
                    let state = if c.is_connected() { "connected" } else { "closing" };
                    println!("{}  {}  {}", c.id, c.peer, state);
                }
            }
            ConsoleCommand::Sessions => {
                let rows = self.manager.summaries();
                if rows.is_empty() {
                    println!("no active sessions");
                }
                for s in rows {
                    println!(
                        "{}  {}  recipients={} chunks={} bytes={} {}",
                        s.id, s.name, s.recipients, s.chunks_sent, s.bytes_sent, s.anchor
                    );
                }
            }
            ConsoleCommand::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    /// Tell every receiver to stop, close the sessions and let writers flush.
    fn shutdown(mut self) {
        let targets = self.clients.connected_ids();
        if !targets.is_empty() {
            self.manager.stop_all(&targets, &self.clients);
        }
        self.manager.close_all();
        drop(self.clients);
        for writer in self.writers.drain(..) {
            let _ = writer.join();
        }
    }
}

/// Bind, spawn the transport and console, and run the tick loop until shutdown.
pub fn run(settings: ServerSettings) -> Result<()> {
    let listener =
        TcpListener::bind(settings.bind).with_context(|| format!("bind {}", settings.bind))?;
    let (events_tx, events_rx) = unbounded::<ServerEvent>();

    net::spawn_acceptor(listener, events_tx.clone())?;
    console::spawn_stdin(events_tx.clone())?;

    let ctrlc_tx = events_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(ServerEvent::Shutdown);
    })
    .context("install ctrl-c handler")?;
    drop(events_tx);

    tracing::info!(
        sounds_dir = ?settings.sounds_dir,
        chunk_size = settings.policy.chunk_size,
        chunks_per_tick = settings.policy.chunks_per_tick,
        delivery = ?settings.policy.delivery,
        tick_ms = settings.tick_interval.as_millis() as u64,
        "sender ready"
    );

    let heartbeat = tick(settings.tick_interval);
    let mut state = ServerState::new(settings);
    loop {
        select! {
            recv(events_rx) -> event => {
                let Ok(event) = event else { break };
                if state.handle_event(event) == Flow::Quit {
                    break;
                }
            }
            recv(heartbeat) -> _ => state.tick(),
        }
    }

    tracing::info!("shutting down");
    state.shutdown();
    Ok(())
}

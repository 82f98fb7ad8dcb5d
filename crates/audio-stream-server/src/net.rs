//! TCP transport for receivers.
//!
//! Each accepted connection exchanges the prelude on its own thread (bounded by a read timeout),
//! then gets two threads:
//! - a writer draining its frame channel onto the socket
//! - a reader forwarding receiver → sender messages to the tick thread
//!
//! Either side failing flips the shared `connected` flag, which is what
//! [`crate::recipient::Outbox::is_still_valid`] reports.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use audio_stream_proto::{Message, StreamId};
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::console::ConsoleCommand;
use crate::recipient::{ClientHandle, ClientId, SEND_QUEUE_FRAMES};

const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the tick thread reacts to besides the heartbeat.
#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        handle: ClientHandle,
        writer: JoinHandle<()>,
    },
    Disconnected(ClientId),
    ChunkRequested { client: ClientId, id: StreamId },
    Console(ConsoleCommand),
    Shutdown,
}

/// Accept receivers forever on a background thread.
pub fn spawn_acceptor(listener: TcpListener, events: Sender<ServerEvent>) -> Result<JoinHandle<()>> {
    let local = listener.local_addr().context("listener local addr")?;
    tracing::info!(bind = %local, "listening for receivers");
    let next_id = Arc::new(AtomicU64::new(1));
    let handle = thread::Builder::new()
        .name("accept".into())
        .spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!("accept error: {e}");
                        continue;
                    }
                };
                let id = ClientId(next_id.fetch_add(1, Ordering::Relaxed));
                let events = events.clone();
                let spawned = thread::Builder::new()
                    .name(format!("client-{}-hs", id.0))
                    .spawn(move || match start_client(id, stream, events.clone()) {
                        Ok(event) => {
                            let _ = events.send(event);
                        }
                        Err(e) => tracing::warn!(client = %id, "handshake failed: {e:#}"),
                    });
                if let Err(e) = spawned {
                    tracing::warn!(client = %id, "spawn handshake thread: {e}");
                }
            }
        })
        .context("spawn accept thread")?;
    Ok(handle)
}

fn start_client(id: ClientId, mut stream: TcpStream, events: Sender<ServerEvent>) -> Result<ServerEvent> {
    let peer = stream.peer_addr().context("peer addr")?;
    stream.set_nodelay(true).ok();
    stream.set_write_timeout(Some(WRITE_TIMEOUT)).ok();

    stream
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .context("set handshake timeout")?;
    audio_stream_proto::write_prelude(&mut stream).context("write prelude")?;
    audio_stream_proto::read_prelude(&mut stream).context("read prelude")?;
    stream.set_read_timeout(None).context("clear handshake timeout")?;

    let connected = Arc::new(AtomicBool::new(true));
    let (tx, rx) = bounded::<Arc<Vec<u8>>>(SEND_QUEUE_FRAMES);

    let read_half = stream.try_clone().context("try_clone stream for reader")?;
    let writer = spawn_writer(id, peer, stream, rx, connected.clone())?;
    spawn_reader(id, read_half, events, connected.clone())?;

    tracing::info!(client = %id, peer = %peer, "receiver connected");
    Ok(ServerEvent::Connected {
        handle: ClientHandle::new(id, peer, tx, connected),
        writer,
    })
}

fn spawn_writer(
    id: ClientId,
    peer: SocketAddr,
    mut stream: TcpStream,
    frames: Receiver<Arc<Vec<u8>>>,
    connected: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("client-{}-tx", id.0))
        .spawn(move || {
            for frame in frames.iter() {
                if !connected.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = stream.write_all(&frame) {
                    tracing::info!(client = %id, peer = %peer, "write failed: {e}");
                    break;
                }
            }
            connected.store(false, Ordering::Relaxed);
            let _ = stream.flush();
            let _ = stream.shutdown(Shutdown::Both);
        })
        .context("spawn writer thread")
}

fn spawn_reader(
    id: ClientId,
    mut stream: TcpStream,
    events: Sender<ServerEvent>,
    connected: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("client-{}-rx", id.0))
        .spawn(move || {
            loop {
                match audio_stream_proto::read_message(&mut stream) {
                    Ok(Message::RequestNextChunk { id: stream_id }) => {
                        let ev = ServerEvent::ChunkRequested {
                            client: id,
                            id: stream_id,
                        };
                        if events.send(ev).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Error { message }) => {
                        tracing::warn!(client = %id, "receiver reported error: {message}");
                    }
                    Ok(other) => {
                        tracing::debug!(client = %id, kind = ?other.kind(), "ignoring unexpected frame");
                    }
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                    Err(e) => {
                        tracing::warn!(client = %id, "read failed: {e}");
                        break;
                    }
                }
            }
            connected.store(false, Ordering::Relaxed);
            let _ = events.send(ServerEvent::Disconnected(id));
        })
        .context("spawn reader thread")
}

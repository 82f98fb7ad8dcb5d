//! Recipients of stream messages and the outbox sessions send through.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use audio_stream_proto::Message;
use crossbeam_channel::{Sender, TrySendError};

/// Frames a receiver may have queued before it is treated as stalled and dropped.
pub const SEND_QUEUE_FRAMES: usize = 1024;

/// Connected receiver, numbered in accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transport seam used by sessions.
///
/// Implementations must preserve per-recipient send order.
pub trait Outbox {
    /// Whether `client` can still receive messages (connected, not expired).
    fn is_still_valid(&self, client: ClientId) -> bool;

    /// Queue `msg` for `client`. Returns `false` if it could not be queued.
    fn send(&self, client: ClientId, msg: &Message) -> bool;

    /// Queue `msg` for every client in `to`.
    fn broadcast(&self, to: &[ClientId], msg: &Message) {
        for client in to {
            self.send(*client, msg);
        }
    }
}

/// Sending half of one receiver connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: ClientId,
    pub peer: SocketAddr,
    tx: Sender<Arc<Vec<u8>>>,
    connected: Arc<AtomicBool>,
}

impl ClientHandle {
    pub fn new(
        id: ClientId,
        peer: SocketAddr,
        tx: Sender<Arc<Vec<u8>>>,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            peer,
            tx,
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Never blocks; a full queue marks the client disconnected.
    fn push_frame(&self, frame: Arc<Vec<u8>>) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(client = %self.id, peer = %self.peer, "send queue full, dropping receiver");
                self.connected.store(false, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// All receivers currently known to the tick thread.
#[derive(Debug, Default)]
pub struct ClientTable {
    clients: BTreeMap<ClientId, ClientHandle>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ClientHandle) {
        self.clients.insert(handle.id, handle);
    }

    pub fn remove(&mut self, id: ClientId) -> Option<ClientHandle> {
        self.clients.remove(&id)
    }

    /// Ids of connected clients in accept order.
    pub fn connected_ids(&self) -> Vec<ClientId> {
        self.clients
            .values()
            .filter(|c| c.is_connected())
            .map(|c| c.id)
            .collect()
    }

    pub fn handles(&self) -> impl Iterator<Item = &ClientHandle> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Outbox for ClientTable {
    fn is_still_valid(&self, client: ClientId) -> bool {
        self.clients
            .get(&client)
            .map(ClientHandle::is_connected)
            .unwrap_or(false)
    }

    fn send(&self, client: ClientId, msg: &Message) -> bool {
        let Some(handle) = self.clients.get(&client) else {
            return false;
        };
        match msg.to_frame() {
            Ok(frame) => handle.push_frame(Arc::new(frame)),
            Err(e) => {
                tracing::warn!(client = %client, "encode frame failed: {e}");
                false
            }
        }
    }

    /// Encodes once and shares the frame across recipients.
    fn broadcast(&self, to: &[ClientId], msg: &Message) {
        let frame = match msg.to_frame() {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                tracing::warn!("encode frame failed: {e}");
                return;
            }
        };
        for client in to {
            if let Some(handle) = self.clients.get(client) {
                handle.push_frame(frame.clone());
            }
        }
    }
}

/// Outbox that records every message, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryOutbox {
    pub(crate) sent: std::cell::RefCell<Vec<(ClientId, Message)>>,
    pub(crate) gone: std::cell::RefCell<std::collections::HashSet<ClientId>>,
}

#[cfg(test)]
impl MemoryOutbox {
    pub(crate) fn disconnect(&self, client: ClientId) {
        self.gone.borrow_mut().insert(client);
    }

    pub(crate) fn take(&self) -> Vec<(ClientId, Message)> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }

    pub(crate) fn to(&self, client: ClientId) -> Vec<Message> {
        self.sent
            .borrow()
            .iter()
            .filter(|(c, _)| *c == client)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[cfg(test)]
impl Outbox for MemoryOutbox {
    fn is_still_valid(&self, client: ClientId) -> bool {
        !self.gone.borrow().contains(&client)
    }

    fn send(&self, client: ClientId, msg: &Message) -> bool {
        if !self.is_still_valid(client) {
            return false;
        }
        self.sent.borrow_mut().push((client, msg.clone()));
        true
    }
}

//! TCP link to the sender.
//!
//! A reader thread decodes frames and forwards them to the tick thread; the tick thread writes
//! its few outgoing messages (chunk requests) directly on a cloned socket.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use audio_stream_proto::Message;
use crossbeam_channel::Sender;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum ClientEvent {
    Message(Message),
    /// The sender closed the connection or a read failed.
    Disconnected,
    Shutdown,
}

/// Write half of the connection.
#[derive(Debug)]
pub struct ServerLink {
    stream: TcpStream,
    peer: SocketAddr,
}

impl ServerLink {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn send(&mut self, msg: &Message) -> Result<()> {
        audio_stream_proto::write_message(&mut self.stream, msg)
            .with_context(|| format!("send {:?} to {}", msg.kind(), self.peer))?;
        self.stream.flush().context("flush")?;
        Ok(())
    }

    /// Shut the socket down; the reader thread then exits.
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Connect, exchange the prelude and start the reader thread.
pub fn connect(addr: SocketAddr, events: Sender<ClientEvent>) -> Result<(ServerLink, JoinHandle<()>)> {
    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .with_context(|| format!("connect to {addr}"))?;
    stream.set_nodelay(true).ok();
    stream.set_write_timeout(Some(WRITE_TIMEOUT)).ok();

    audio_stream_proto::write_prelude(&mut stream).context("write prelude")?;
    audio_stream_proto::read_prelude(&mut stream).context("read prelude")?;

    let read_half = stream.try_clone().context("try_clone stream for reader")?;
    let reader = spawn_reader(read_half, events)?;
    tracing::info!(server = %addr, "connected to sender");
    Ok((ServerLink { stream, peer: addr }, reader))
}

fn spawn_reader(mut stream: TcpStream, events: Sender<ClientEvent>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("server-rx".into())
        .spawn(move || {
            loop {
                match audio_stream_proto::read_message(&mut stream) {
                    Ok(msg) => {
                        if events.send(ClientEvent::Message(msg)).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                    Err(e) => {
                        tracing::warn!("read from sender failed: {e}");
                        break;
                    }
                }
            }
            let _ = events.send(ClientEvent::Disconnected);
        })
        .context("spawn reader thread")
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use audio_stream_proto::{Anchor, PlaybackLimits, StreamId, Vec3};
    use crossbeam_channel::unbounded;

    use super::*;

    fn fake_sender() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn accept(listener: &TcpListener) -> TcpStream {
        let (mut s, _) = listener.accept().unwrap();
        audio_stream_proto::write_prelude(&mut s).unwrap();
        audio_stream_proto::read_prelude(&mut s).unwrap();
        s
    }

    #[test]
    fn forwards_messages_then_disconnect() {
        let (listener, addr) = fake_sender();
        let server = thread::spawn(move || {
            let mut s = accept(&listener);
            let id = StreamId::new();
            let start = Message::StartStream {
                id,
                anchor: Anchor::StaticPoint(Vec3::new(1.0, 2.0, 3.0)),
                limits: PlaybackLimits::default(),
            };
            audio_stream_proto::write_message(&mut s, &start).unwrap();
            start
        });

        let (tx, rx) = unbounded();
        let (_link, reader) = connect(addr, tx).unwrap();
        let sent = server.join().unwrap();

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            ClientEvent::Message(m) => assert_eq!(m, sent),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            ClientEvent::Disconnected
        ));
        reader.join().unwrap();
    }

    #[test]
    fn link_sends_chunk_requests() {
        let (listener, addr) = fake_sender();
        let id = StreamId::new();
        let server = thread::spawn(move || {
            let mut s = accept(&listener);
            audio_stream_proto::read_message(&mut s).unwrap()
        });

        let (tx, _rx) = unbounded();
        let (mut link, _reader) = connect(addr, tx).unwrap();
        assert_eq!(link.peer(), addr);
        link.send(&Message::RequestNextChunk { id }).unwrap();
        assert_eq!(server.join().unwrap(), Message::RequestNextChunk { id });
        link.close();
    }
}

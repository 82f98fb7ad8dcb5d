//! Message set carried over the frame codec.

use std::io;

use crate::types::{Anchor, EntityId, PlaybackLimits, StreamId, Vec3};
use crate::{FrameKind, encode_frame};

/// Every message exchanged between sender and receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Sender → receiver: a new stream begins.
    StartStream {
        id: StreamId,
        anchor: Anchor,
        limits: PlaybackLimits,
    },
    /// Sender → receiver: next chunk of compressed bytes, in order.
    StreamData { id: StreamId, chunk: Vec<u8> },
    /// Sender → receiver: no more data will follow for `id`.
    EndStream { id: StreamId },
    /// Sender → receiver: hard-cancel every active stream.
    StopAllStreams,
    /// Receiver → sender: pull one more chunk (pull delivery only).
    RequestNextChunk { id: StreamId },
    /// Sender → receiver: tracked entity position update.
    EntityMoved { entity: EntityId, position: Vec3 },
    /// Sender → receiver: tracked entity is gone.
    EntityRemoved { entity: EntityId },
    /// Either direction: fatal protocol error text.
    Error { message: String },
}

impl Message {
    pub fn kind(&self) -> FrameKind {
        match self {
            Message::StartStream { .. } => FrameKind::StartStream,
            Message::StreamData { .. } => FrameKind::StreamData,
            Message::EndStream { .. } => FrameKind::EndStream,
            Message::StopAllStreams => FrameKind::StopAllStreams,
            Message::RequestNextChunk { .. } => FrameKind::RequestNextChunk,
            Message::EntityMoved { .. } => FrameKind::EntityMoved,
            Message::EntityRemoved { .. } => FrameKind::EntityRemoved,
            Message::Error { .. } => FrameKind::Error,
        }
    }

    /// Encode the payload only (no frame header).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Message::StartStream { id, anchor, limits } => {
                out.reserve(16 + 1 + 24 + 12);
                out.extend_from_slice(id.as_bytes());
                match anchor {
                    Anchor::FollowedEntity(entity) => {
                        out.push(1);
                        out.extend_from_slice(entity.as_bytes());
                    }
                    Anchor::StaticPoint(p) => {
                        out.push(0);
                        put_vec3(&mut out, p);
                    }
                }
                out.extend_from_slice(&limits.max_distance.to_le_bytes());
                out.extend_from_slice(&limits.gain.to_le_bytes());
                out.extend_from_slice(&limits.pitch.to_le_bytes());
            }
            Message::StreamData { id, chunk } => {
                out.reserve(16 + chunk.len());
                out.extend_from_slice(id.as_bytes());
                out.extend_from_slice(chunk);
            }
            Message::EndStream { id } | Message::RequestNextChunk { id } => {
                out.extend_from_slice(id.as_bytes());
            }
            Message::StopAllStreams => {}
            Message::EntityMoved { entity, position } => {
                out.extend_from_slice(entity.as_bytes());
                put_vec3(&mut out, position);
            }
            Message::EntityRemoved { entity } => {
                out.extend_from_slice(entity.as_bytes());
            }
            Message::Error { message } => {
                out.extend_from_slice(message.as_bytes());
            }
        }
        out
    }

    /// Encode into a complete frame (header + payload).
    pub fn to_frame(&self) -> io::Result<Vec<u8>> {
        encode_frame(self.kind(), &self.encode_payload())
    }

    /// Decode a payload previously announced by a frame header of `kind`.
    pub fn decode(kind: FrameKind, payload: &[u8]) -> io::Result<Message> {
        let mut r = PayloadReader::new(payload);
        let msg = match kind {
            FrameKind::StartStream => {
                let id = StreamId::from_bytes(r.array::<16>("stream id")?);
                let following = r.u8("following flag")?;
                let anchor = match following {
                    0 => Anchor::StaticPoint(r.vec3()?),
                    1 => Anchor::FollowedEntity(EntityId::from_bytes(r.array::<16>("entity id")?)),
                    other => return Err(invalid(format!("bad following flag {other}"))),
                };
                let limits = PlaybackLimits {
                    max_distance: r.f32("max distance")?,
                    gain: r.f32("gain")?,
                    pitch: r.f32("pitch")?,
                };
                r.finish("StartStream")?;
                Message::StartStream { id, anchor, limits }
            }
            FrameKind::StreamData => {
                let id = StreamId::from_bytes(r.array::<16>("stream id")?);
                Message::StreamData {
                    id,
                    chunk: r.rest().to_vec(),
                }
            }
            FrameKind::EndStream => {
                let id = StreamId::from_bytes(r.array::<16>("stream id")?);
                r.finish("EndStream")?;
                Message::EndStream { id }
            }
            FrameKind::StopAllStreams => {
                r.finish("StopAllStreams")?;
                Message::StopAllStreams
            }
            FrameKind::RequestNextChunk => {
                let id = StreamId::from_bytes(r.array::<16>("stream id")?);
                r.finish("RequestNextChunk")?;
                Message::RequestNextChunk { id }
            }
            FrameKind::EntityMoved => {
                let entity = EntityId::from_bytes(r.array::<16>("entity id")?);
                let position = r.vec3()?;
                r.finish("EntityMoved")?;
                Message::EntityMoved { entity, position }
            }
            FrameKind::EntityRemoved => {
                let entity = EntityId::from_bytes(r.array::<16>("entity id")?);
                r.finish("EntityRemoved")?;
                Message::EntityRemoved { entity }
            }
            FrameKind::Error => Message::Error {
                message: String::from_utf8_lossy(r.rest()).into_owned(),
            },
        };
        Ok(msg)
    }
}

fn put_vec3(out: &mut Vec<u8>, p: &Vec3) {
    out.extend_from_slice(&p.x.to_le_bytes());
    out.extend_from_slice(&p.y.to_le_bytes());
    out.extend_from_slice(&p.z.to_le_bytes());
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

struct PayloadReader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> io::Result<&'a [u8]> {
        if self.off + n > self.buf.len() {
            return Err(invalid(format!("truncated {what}")));
        }
        let out = &self.buf[self.off..self.off + n];
        self.off += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, what: &str) -> io::Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> io::Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn f32(&mut self, what: &str) -> io::Result<f32> {
        Ok(f32::from_le_bytes(self.array::<4>(what)?))
    }

    fn f64(&mut self, what: &str) -> io::Result<f64> {
        Ok(f64::from_le_bytes(self.array::<8>(what)?))
    }

    fn vec3(&mut self) -> io::Result<Vec3> {
        Ok(Vec3::new(self.f64("x")?, self.f64("y")?, self.f64("z")?))
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.off..];
        self.off = self.buf.len();
        out
    }

    fn finish(&self, what: &str) -> io::Result<()> {
        if self.off != self.buf.len() {
            return Err(invalid(format!(
                "{what} has {} trailing bytes",
                self.buf.len() - self.off
            )));
        }
        Ok(())
    }
}

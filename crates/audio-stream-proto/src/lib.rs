//! Shared protocol primitives for `audio-stream-server` and `audio-stream-client`.
//!
//! Framed stream over a single reliable, ordered connection.
//!
//! Frame format:
//! - magic: 4 bytes "ASTR" (once, at connection start)
//! - version: u16 LE (once, at connection start)
//! - then repeated frames:
//!   - kind: u8
//!   - len: u32 LE
//!   - payload: [u8; len]
//!
//! Payloads are decoded once at this boundary into the closed [`Message`] enum.

mod message;
mod types;

use std::io::{self, Read, Write};

pub use message::Message;
pub use types::{Anchor, EntityId, PlaybackLimits, StreamId, Vec3};

pub const MAGIC: [u8; 4] = *b"ASTR";
pub const VERSION: u16 = 2;

/// Upper bound for a single frame payload; anything larger is treated as a corrupt stream.
pub const MAX_PAYLOAD_LEN: u32 = 4 * 1024 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    StartStream = 0x10,
    StreamData = 0x11,
    EndStream = 0x12,
    StopAllStreams = 0x13,

    /// Receiver → sender: pull one more chunk of a stream.
    RequestNextChunk = 0x20,

    /// Sender → receiver: world snapshot update for a tracked entity.
    EntityMoved = 0x30,
    /// Sender → receiver: tracked entity left the world.
    EntityRemoved = 0x31,

    Error = 0x7F,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> io::Result<Self> {
        let k = match b {
            0x10 => FrameKind::StartStream,
            0x11 => FrameKind::StreamData,
            0x12 => FrameKind::EndStream,
            0x13 => FrameKind::StopAllStreams,
            0x20 => FrameKind::RequestNextChunk,
            0x30 => FrameKind::EntityMoved,
            0x31 => FrameKind::EntityRemoved,
            0x7F => FrameKind::Error,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown frame kind {b:#x}"),
                ));
            }
        };
        Ok(k)
    }
}

/// Connection prelude: magic + version.
pub fn write_prelude(mut w: impl Write) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    Ok(())
}

/// Read and validate the connection prelude.
pub fn read_prelude(mut r: impl Read) -> io::Result<()> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad magic"));
    }

    let mut ver = [0u8; 2];
    r.read_exact(&mut ver)?;
    let version = u16::from_le_bytes(ver);
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported version {version}"),
        ));
    }

    Ok(())
}

/// Encode a frame into a single buffer (header + payload).
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> io::Result<Vec<u8>> {
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;

    let mut out = Vec::with_capacity(1 + 4 + payload.len());
    out.push(kind as u8);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Read a frame header and return `(kind, len)`.
///
/// The caller should then read exactly `len` bytes of payload.
pub fn read_frame_header(mut r: impl Read) -> io::Result<(FrameKind, u32)> {
    let mut kindb = [0u8; 1];
    r.read_exact(&mut kindb)?;
    let kind = FrameKind::from_u8(kindb[0])?;

    let mut lenb = [0u8; 4];
    r.read_exact(&mut lenb)?;
    let len = u32::from_le_bytes(lenb);
    if len > MAX_PAYLOAD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame payload too large ({len} bytes)"),
        ));
    }
    Ok((kind, len))
}

/// Encode and write one message as a frame.
pub fn write_message(mut w: impl Write, msg: &Message) -> io::Result<()> {
    let frame = msg.to_frame()?;
    w.write_all(&frame)?;
    Ok(())
}

/// Read exactly one frame and decode it into a [`Message`].
pub fn read_message(mut r: impl Read) -> io::Result<Message> {
    let (kind, len) = read_frame_header(&mut r)?;
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Message::decode(kind, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn prelude_roundtrip_ok() {
        let mut buf = Vec::new();
        write_prelude(&mut buf).unwrap();
        let mut cur = Cursor::new(buf);
        read_prelude(&mut cur).unwrap();
    }

    #[test]
    fn prelude_rejects_bad_magic() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"NOPE");
        buf.extend_from_slice(&VERSION.to_le_bytes());
        let mut cur = Cursor::new(buf);
        let err = read_prelude(&mut cur).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn prelude_rejects_bad_version() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&(VERSION + 1).to_le_bytes());
        let mut cur = Cursor::new(buf);
        let err = read_prelude(&mut cur).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn frame_header_rejects_unknown_kind() {
        let mut cur = Cursor::new(vec![0x55u8, 0, 0, 0, 0]);
        let err = read_frame_header(&mut cur).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn frame_header_rejects_oversized_payload() {
        let mut frame = vec![FrameKind::StreamData as u8];
        frame.extend_from_slice(&(MAX_PAYLOAD_LEN + 1).to_le_bytes());
        let err = read_frame_header(Cursor::new(frame)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn messages_are_read_back_in_write_order() {
        let id = StreamId::new();
        let mut buf = Vec::new();
        write_message(&mut buf, &Message::StreamData { id, chunk: vec![1, 2, 3] }).unwrap();
        write_message(&mut buf, &Message::EndStream { id }).unwrap();
        write_message(&mut buf, &Message::StopAllStreams).unwrap();

        let mut cur = Cursor::new(buf);
        assert_eq!(
            read_message(&mut cur).unwrap(),
            Message::StreamData { id, chunk: vec![1, 2, 3] }
        );
        assert_eq!(read_message(&mut cur).unwrap(), Message::EndStream { id });
        assert_eq!(read_message(&mut cur).unwrap(), Message::StopAllStreams);
        let eof = read_message(&mut cur).unwrap_err();
        assert_eq!(eof.kind(), io::ErrorKind::UnexpectedEof);
    }
}

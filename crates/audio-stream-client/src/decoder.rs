//! Incremental Decoder: interleaved PCM from a compressed buffer that is still growing.
//!
//! A Symphonia format reader parses container structure from the front of its source and
//! cannot be topped up in place. So whenever the accumulator grows or moves, the context is
//! dropped and a fresh one is probed over the full current span, then seeked back to the
//! number of frames already produced. Frames before that target are discarded, which keeps
//! the produced sequence identical to one uninterrupted decode.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::backend::PcmFormat;
use crate::error::StreamFault;

/// Streamable container recognised from the first bytes of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Ogg,
    Flac,
    Mp3,
    Adts,
}

impl Container {
    /// Bytes needed before [`Container::sniff`] can decide.
    pub const SIGNATURE_LEN: usize = 4;

    /// Identify the container from the stream head.
    ///
    /// RIFF/WAVE needs its full header and chunk sizes up front, so it is rejected along with
    /// anything unrecognised.
    pub fn sniff(head: &[u8]) -> Result<Container, StreamFault> {
        match head {
            [b'O', b'g', b'g', b'S', ..] => Ok(Container::Ogg),
            [b'f', b'L', b'a', b'C', ..] => Ok(Container::Flac),
            [b'I', b'D', b'3', ..] => Ok(Container::Mp3),
            [0xFF, b, ..] if b & 0xE0 == 0xE0 => {
                // Layer bits 00 mark an ADTS (AAC) header.
                if b & 0x06 == 0 {
                    Ok(Container::Adts)
                } else {
                    Ok(Container::Mp3)
                }
            }
            [b'R', b'I', b'F', b'F', ..] => Err(StreamFault::NonStreamableContainer("RIFF")),
            _ => Err(StreamFault::NonStreamableContainer("unrecognised signature")),
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Container::Ogg => "ogg",
            Container::Flac => "flac",
            Container::Mp3 => "mp3",
            Container::Adts => "aac",
        }
    }
}

/// Growable byte store for one stream.
///
/// Grows by at least doubling; every reallocation bumps [`Accumulator::generation`].
#[derive(Debug)]
pub struct Accumulator {
    data: Arc<Vec<u8>>,
    generation: u64,
}

impl Accumulator {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            data: Arc::new(Vec::with_capacity(bytes)),
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Count of backing-storage moves so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn head(&self, n: usize) -> &[u8] {
        &self.data[..n.min(self.data.len())]
    }

    /// Append `bytes`; returns `true` if the backing storage was enlarged or replaced.
    ///
    /// Zero-copy only while no decode context holds a snapshot.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        let shared = Arc::strong_count(&self.data) > 1;
        let buf = Arc::make_mut(&mut self.data);
        let before = buf.as_ptr();
        let needed = buf.len() + bytes.len();
        let grew = needed > buf.capacity();
        if grew {
            let target = (buf.capacity() * 2).max(needed);
            buf.reserve_exact(target - buf.len());
        }
        buf.extend_from_slice(bytes);
        let moved = shared || grew || buf.as_ptr() != before;
        if moved {
            self.generation += 1;
        }
        moved
    }

    /// Release the memory.
    pub fn clear(&mut self) {
        self.data = Arc::new(Vec::new());
        self.generation += 1;
    }

    fn snapshot(&self) -> BufferSource {
        BufferSource {
            data: Arc::clone(&self.data),
            len: self.data.len(),
            pos: 0,
        }
    }
}

/// Read-only view of the accumulator as it was when a context was opened.
struct BufferSource {
    data: Arc<Vec<u8>>,
    len: usize,
    pos: u64,
}

impl Read for BufferSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pos = usize::try_from(self.pos).unwrap_or(usize::MAX);
        if pos >= self.len {
            return Ok(0);
        }
        let n = buf.len().min(self.len - pos);
        buf[..n].copy_from_slice(&self.data[pos..pos + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for BufferSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(x) => Some(x),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => (self.len as u64).checked_add_signed(d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of buffer")
        })?;
        self.pos = target;
        Ok(self.pos)
    }
}

impl MediaSource for BufferSource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len as u64)
    }
}

/// One batch of decoded PCM, at most `frames_per_buffer` frames.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBatch {
    pub format: PcmFormat,
    pub samples: Vec<i16>,
}

impl PcmBatch {
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.format.channels.max(1))
    }
}

struct DecodeContext {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    /// Frames with a timestamp before this are dropped.
    skip_until: u64,
    /// No further packets in the current snapshot.
    exhausted: bool,
}

pub struct IncrementalDecoder {
    frames_per_buffer: usize,
    container: Option<Container>,
    context: Option<DecodeContext>,
    format: Option<PcmFormat>,
    /// Frames produced so far; the resume target of the next reopen.
    decoded_frames: u64,
    opened_len: usize,
    opened_generation: u64,
    /// Accumulator length at the last failed open.
    failed_len: Option<usize>,
    pending: Vec<i16>,
    reopens: u32,
}

impl fmt::Debug for IncrementalDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalDecoder")
            .field("format", &self.format())
            .field("decoded_frames", &self.decoded_frames())
            .field("reopens", &self.reopen_count())
            .finish_non_exhaustive()
    }
}

impl IncrementalDecoder {
    pub fn new(frames_per_buffer: usize) -> Self {
        Self {
            frames_per_buffer: frames_per_buffer.max(1),
            container: None,
            context: None,
            format: None,
            decoded_frames: 0,
            opened_len: 0,
            opened_generation: 0,
            failed_len: None,
            pending: Vec::new(),
            reopens: 0,
        }
    }

    pub fn set_container(&mut self, container: Container) {
        self.container = Some(container);
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    pub fn format(&self) -> Option<PcmFormat> {
        self.format
    }

    pub fn decoded_frames(&self) -> u64 {
        self.decoded_frames
    }

    pub fn reopen_count(&self) -> u32 {
        self.reopens
    }

    /// No context yet, or the accumulator moved or grew since the last open.
    pub fn needs_reopen(&self, acc: &Accumulator) -> bool {
        self.context.is_none()
            || acc.generation() != self.opened_generation
            || acc.len() != self.opened_len
    }

    /// Drop the open context (its snapshot pins the accumulator's storage).
    pub fn release_context(&mut self) {
        self.context = None;
    }

    /// Reopen if needed. `Ok(false)` means the stream cannot be opened yet.
    pub fn prepare(&mut self, acc: &Accumulator, input_finished: bool) -> Result<bool, StreamFault> {
        if !self.needs_reopen(acc) {
            return Ok(true);
        }
        if acc.is_empty() {
            if input_finished {
                return Err(StreamFault::DecodeFatal("stream ended without data".into()));
            }
            return Ok(false);
        }
        if !input_finished && self.context.is_none() && self.failed_len == Some(acc.len()) {
            return Ok(false);
        }

        self.context = None;
        let resume = self.decoded_frames;
        match self.open_at(acc, resume) {
            Ok(ctx) => {
                self.context = Some(ctx);
                self.opened_len = acc.len();
                self.opened_generation = acc.generation();
                self.failed_len = None;
                self.reopens += 1;
                tracing::trace!(bytes = acc.len(), resume, "decoder reopened");
                Ok(true)
            }
            Err(e) if input_finished => Err(StreamFault::DecodeFatal(e.to_string())),
            Err(e) => {
                tracing::trace!(bytes = acc.len(), "decoder not ready: {e}");
                self.failed_len = Some(acc.len());
                Ok(false)
            }
        }
    }

    fn open_at(&self, acc: &Accumulator, resume: u64) -> Result<DecodeContext, SymphoniaError> {
        let mut ctx = self.open(acc, resume)?;
        if resume == 0 {
            return Ok(ctx);
        }
        let target = SeekTo::TimeStamp {
            ts: resume,
            track_id: ctx.track_id,
        };
        match ctx.format.seek(SeekMode::Accurate, target) {
            Ok(seeked) if seeked.actual_ts <= resume => {
                ctx.decoder.reset();
                Ok(ctx)
            }
            Ok(seeked) => {
                tracing::debug!(resume, actual = seeked.actual_ts, "seek overshot; skipping from start");
                self.open(acc, resume)
            }
            Err(e) => {
                tracing::debug!(resume, "seek failed ({e}); skipping from start");
                self.open(acc, resume)
            }
        }
    }

    fn open(&self, acc: &Accumulator, skip_until: u64) -> Result<DecodeContext, SymphoniaError> {
        let mss = MediaSourceStream::new(Box::new(acc.snapshot()), Default::default());
        let mut hint = Hint::new();
        if let Some(c) = self.container {
            hint.with_extension(c.extension());
        }
        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format = probed.format;
        let track = format
            .default_track()
            .ok_or(SymphoniaError::Unsupported("no default audio track"))?;
        let track_id = track.id;
        let decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;
        Ok(DecodeContext {
            format,
            decoder,
            track_id,
            skip_until,
            exhausted: false,
        })
    }

    /// Next batch of at most `frames_per_buffer` frames, or `None` if nothing is decodable now.
    pub fn next_batch(&mut self) -> Option<PcmBatch> {
        self.fill_pending();
        let format = self.format?;
        let ch = usize::from(format.channels.max(1));
        let available = self.pending.len() / ch;
        if available == 0 {
            return None;
        }
        let frames = available.min(self.frames_per_buffer);
        let samples: Vec<i16> = self.pending.drain(..frames * ch).collect();
        Some(PcmBatch { format, samples })
    }

    /// Every packet of the current snapshot is decoded and handed out.
    pub fn is_caught_up(&self) -> bool {
        self.pending.is_empty() && self.context.as_ref().is_none_or(|c| c.exhausted)
    }

    /// Release the context and any undelivered samples.
    pub fn close(&mut self) {
        self.context = None;
        self.pending = Vec::new();
    }

    fn fill_pending(&mut self) {
        let Self {
            context,
            pending,
            format,
            decoded_frames,
            frames_per_buffer,
            ..
        } = self;
        let Some(ctx) = context.as_mut() else {
            return;
        };

        loop {
            let ch = format.map(|f| usize::from(f.channels.max(1))).unwrap_or(1);
            if ctx.exhausted || pending.len() / ch >= *frames_per_buffer {
                return;
            }

            let packet = match ctx.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    ctx.exhausted = true;
                    return;
                }
                Err(e) => {
                    tracing::debug!("next packet: {e}");
                    ctx.exhausted = true;
                    return;
                }
            };
            if packet.track_id() != ctx.track_id {
                continue;
            }

            let decoded = match ctx.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => {
                    tracing::debug!("decode: {e}");
                    ctx.exhausted = true;
                    return;
                }
            };

            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }
            let start = packet.ts();
            if start + frames as u64 <= ctx.skip_until {
                continue;
            }
            let skip = ctx.skip_until.saturating_sub(start) as usize;

            let spec = *decoded.spec();
            let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            buf.copy_interleaved_ref(decoded);

            let channels = spec.channels.count();
            let batch_format = PcmFormat {
                channels: channels as u16,
                sample_rate: spec.rate,
            };
            if format.is_some_and(|f| f != batch_format) {
                tracing::warn!(?batch_format, "stream format changed; dropping buffered samples");
                pending.clear();
            }
            *format = Some(batch_format);
            pending.extend_from_slice(&buf.samples()[skip * channels..frames * channels]);
            *decoded_frames += (frames - skip) as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{expected_samples, flac, ogg_flac};

    fn drain(dec: &mut IncrementalDecoder, out: &mut Vec<i16>) {
        while let Some(batch) = dec.next_batch() {
            assert!(batch.frames() <= 1024);
            out.extend_from_slice(&batch.samples);
        }
    }

    #[test]
    fn sniff_accepts_streamable_signatures() {
        assert_eq!(Container::sniff(b"OggS\0\x02"), Ok(Container::Ogg));
        assert_eq!(Container::sniff(b"fLaC\0\0\0\x22"), Ok(Container::Flac));
        assert_eq!(Container::sniff(b"ID3\x04"), Ok(Container::Mp3));
        assert_eq!(Container::sniff(&[0xFF, 0xFB, 0x90, 0x00]), Ok(Container::Mp3));
        assert_eq!(Container::sniff(&[0xFF, 0xF1, 0x50, 0x80]), Ok(Container::Adts));
    }

    #[test]
    fn sniff_rejects_riff_and_unknown() {
        assert_eq!(
            Container::sniff(b"RIFF\x24\0\0\0WAVE"),
            Err(StreamFault::NonStreamableContainer("RIFF"))
        );
        assert!(matches!(
            Container::sniff(b"\0\0\0\x20ftypM4A "),
            Err(StreamFault::NonStreamableContainer(_))
        ));
    }

    #[test]
    fn accumulator_growth_changes_identity() {
        let mut acc = Accumulator::with_capacity(8);
        assert!(!acc.append(&[1; 6]));
        assert!(acc.append(&[2; 6]));
        assert!(acc.capacity() >= 16);
        assert_eq!(acc.generation(), 1);
        assert!(!acc.append(&[3; 4]));
        assert_eq!(acc.len(), 16);
        assert_eq!(acc.head(3), &[1, 1, 1]);
    }

    #[test]
    fn append_while_a_snapshot_is_held_counts_as_a_move() {
        let mut acc = Accumulator::with_capacity(64);
        acc.append(&[1; 4]);
        let snap = acc.snapshot();
        assert!(acc.append(&[2; 4]));
        assert_eq!(snap.len, 4);
    }

    #[test]
    fn buffer_source_reads_and_seeks_within_snapshot() {
        let mut acc = Accumulator::with_capacity(16);
        acc.append(b"0123456789");
        let mut src = acc.snapshot();
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(src.seek(SeekFrom::End(-2)).unwrap(), 8);
        assert_eq!(src.read(&mut buf).unwrap(), 2);
        assert_eq!(src.read(&mut buf).unwrap(), 0);
        assert!(src.seek(SeekFrom::Current(-20)).is_err());
        assert_eq!(src.byte_len(), Some(10));
    }

    #[test]
    fn single_open_decodes_whole_asset() {
        let data = flac(44_100, 2, 1024, 5_000);
        let mut acc = Accumulator::with_capacity(data.len());
        acc.append(&data);
        let mut dec = IncrementalDecoder::new(1024);
        dec.set_container(Container::Flac);
        assert_eq!(dec.prepare(&acc, true), Ok(true));

        let mut out = Vec::new();
        drain(&mut dec, &mut out);
        assert!(dec.is_caught_up());
        assert_eq!(dec.format(), Some(PcmFormat { channels: 2, sample_rate: 44_100 }));
        assert_eq!(out, expected_samples(2, 5_000));
    }

    #[test]
    fn reopen_is_sample_offset_transparent() {
        let total = 12_000;
        let data = flac(44_100, 2, 1024, total);
        let mut acc = Accumulator::with_capacity(1024);
        let mut dec = IncrementalDecoder::new(1024);
        dec.set_container(Container::Flac);

        let mut out = Vec::new();
        let chunks: Vec<&[u8]> = data.chunks(3001).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let last = i + 1 == chunks.len();
            dec.release_context();
            acc.append(chunk);
            dec.prepare(&acc, last).unwrap();
            drain(&mut dec, &mut out);
            assert_eq!(out.len() as u64, dec.decoded_frames() * 2);
        }

        assert!(dec.reopen_count() > 5);
        assert!(acc.generation() > 0);
        assert!(dec.is_caught_up());
        assert!(!dec.needs_reopen(&acc));
        assert_eq!(dec.decoded_frames(), total as u64);
        assert_eq!(out, expected_samples(2, total));
    }

    fn decode_in_chunks(data: &[u8], chunk: usize, container: Container) -> (Vec<i16>, IncrementalDecoder) {
        let mut acc = Accumulator::with_capacity(1024);
        let mut dec = IncrementalDecoder::new(1024);
        dec.set_container(container);
        let mut out = Vec::new();
        let chunks: Vec<&[u8]> = data.chunks(chunk).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            dec.release_context();
            acc.append(chunk);
            dec.prepare(&acc, i + 1 == chunks.len()).unwrap();
            drain(&mut dec, &mut out);
        }
        (out, dec)
    }

    #[test]
    fn ogg_reopen_matches_single_open() {
        let total = 12_000;
        let data = ogg_flac(44_100, 2, 1024, total);
        assert_eq!(Container::sniff(&data[..Container::SIGNATURE_LEN]), Ok(Container::Ogg));

        let (whole, _) = decode_in_chunks(&data, data.len(), Container::Ogg);
        assert_eq!(whole, expected_samples(2, total));

        let (pieces, dec) = decode_in_chunks(&data, 3001, Container::Ogg);
        assert!(dec.reopen_count() > 5);
        assert!(dec.is_caught_up());
        assert_eq!(dec.decoded_frames(), total as u64);
        assert_eq!(pieces, whole);
    }

    #[test]
    fn open_failure_is_transient_until_input_finishes() {
        let data = flac(22_050, 1, 512, 2_000);
        let mut acc = Accumulator::with_capacity(4096);
        acc.append(&data[..20]);
        let mut dec = IncrementalDecoder::new(512);
        assert_eq!(dec.prepare(&acc, false), Ok(false));
        assert!(!dec.has_context());
        // Same bytes: no retry yet.
        assert_eq!(dec.prepare(&acc, false), Ok(false));

        dec.release_context();
        acc.append(&data[20..]);
        assert_eq!(dec.prepare(&acc, true), Ok(true));
        let mut out = Vec::new();
        drain(&mut dec, &mut out);
        assert_eq!(out, expected_samples(1, 2_000));
    }

    #[test]
    fn unopenable_after_input_finished_is_fatal() {
        let data = flac(22_050, 1, 512, 2_000);
        let mut acc = Accumulator::with_capacity(64);
        acc.append(&data[..20]);
        let mut dec = IncrementalDecoder::new(512);
        assert!(matches!(
            dec.prepare(&acc, true),
            Err(StreamFault::DecodeFatal(_))
        ));
    }
}

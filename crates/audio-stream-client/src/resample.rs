//! Per-voice sample rate conversion.
//!
//! Uses Rubato's sinc resampler to bring interleaved `f32` audio from a buffer's rate to the
//! output device rate. Voice pitch is applied as a relative ratio on top of the base
//! `output / input` ratio. Input is consumed in fixed chunks; a remainder is carried to the next
//! push, and [`RateConverter::flush`] zero-pads it when no more input is coming.

use std::fmt;

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Input frames handed to Rubato per call.
pub const CHUNK_FRAMES: usize = 1024;

/// Widest pitch change (either direction) the converter accepts.
const MAX_RELATIVE_RATIO: f64 = 10.0;

pub struct RateConverter {
    resampler: Async<f32>,
    channels: usize,
    in_rate: u32,
    pitch: f32,
    /// Interleaved input not yet converted (less than one chunk between calls).
    pending: Vec<f32>,
    scratch: Vec<f32>,
    indexing: Indexing,
}

impl fmt::Debug for RateConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateConverter")
            .field("channels", &self.channels)
            .field("in_rate", &self.in_rate)
            .field("pitch", &self.pitch)
            .field("pending_frames", &(self.pending.len() / self.channels))
            .finish()
    }
}

impl RateConverter {
    pub fn new(in_rate: u32, out_rate: u32, channels: usize, pitch: f32) -> Result<Self> {
        let channels = channels.max(1);
        let ratio = f64::from(out_rate.max(1)) / f64::from(in_rate.max(1));

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler = Async::<f32>::new_sinc(
            ratio,
            MAX_RELATIVE_RATIO,
            &params,
            CHUNK_FRAMES,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init ({in_rate} -> {out_rate} Hz): {e}"))?;
        let scratch = vec![0.0f32; resampler.output_frames_max() * channels];

        let mut converter = Self {
            resampler,
            channels,
            in_rate,
            pitch: 1.0,
            pending: Vec::with_capacity(CHUNK_FRAMES * channels),
            scratch,
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
        };
        converter.apply_pitch(pitch, false)?;
        Ok(converter)
    }

    pub fn in_rate(&self) -> u32 {
        self.in_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn pending_frames(&self) -> usize {
        self.pending.len() / self.channels
    }

    /// Ramp to a new pitch over the next chunk.
    pub fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        if pitch == self.pitch {
            return Ok(());
        }
        self.apply_pitch(pitch, true)
    }

    fn apply_pitch(&mut self, pitch: f32, ramp: bool) -> Result<()> {
        let relative = (1.0 / f64::from(pitch.max(f32::MIN_POSITIVE)))
            .clamp(1.0 / MAX_RELATIVE_RATIO, MAX_RELATIVE_RATIO);
        self.resampler
            .set_resample_ratio_relative(relative, ramp)
            .map_err(|e| anyhow!("set pitch {pitch}: {e}"))?;
        self.pitch = pitch;
        Ok(())
    }

    /// Append interleaved input and convert every complete chunk into `out`.
    pub fn push(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.pending.extend_from_slice(input);
        while self.pending.len() >= CHUNK_FRAMES * self.channels {
            self.process(CHUNK_FRAMES, None, out)?;
        }
        Ok(())
    }

    /// Convert the carried remainder, zero-padded to a full chunk.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let frames = self.pending_frames();
        if frames == 0 {
            return Ok(());
        }
        self.process(frames, Some(frames), out)
    }

    /// Drop carried input and filter state.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.resampler.reset();
    }

    fn process(&mut self, frames: usize, partial: Option<usize>, out: &mut Vec<f32>) -> Result<()> {
        let samples = frames * self.channels;
        let input = InterleavedSlice::new(&self.pending[..samples], self.channels, frames)
            .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;
        let capacity = self.scratch.len() / self.channels;
        let mut output = InterleavedSlice::new_mut(&mut self.scratch, self.channels, capacity)
            .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

        self.indexing.input_offset = 0;
        self.indexing.output_offset = 0;
        self.indexing.partial_len = partial;

        let (_, produced) = self
            .resampler
            .process_into_buffer(&input, &mut output, Some(&self.indexing))
            .map_err(|e| anyhow!("resample: {e}"))?;

        out.extend_from_slice(&self.scratch[..produced * self.channels]);
        self.pending.drain(..samples);
        Ok(())
    }
}

//! Voice Buffer Pipeline: keeps one voice's small ring of hardware buffers fed.

use std::collections::VecDeque;

use audio_stream_proto::{PlaybackLimits, Vec3};

use crate::backend::{AudioBackend, BufferId, VoiceId};
use crate::config::EngineConfig;
use crate::decoder::IncrementalDecoder;
use crate::pool::VoicePool;

#[derive(Debug)]
pub struct VoicePipeline {
    voice: VoiceId,
    slots: Vec<BufferId>,
    /// Slots not queued on the voice.
    free: VecDeque<BufferId>,
    started: bool,
    restarts: u32,
}

impl VoicePipeline {
    /// Take ownership of `voice`, generate its buffer slots and apply the stream's parameters.
    pub fn attach<B: AudioBackend + ?Sized>(
        backend: &mut B,
        voice: VoiceId,
        limits: &PlaybackLimits,
        engine: &EngineConfig,
        position: Vec3,
    ) -> Self {
        let slots: Vec<BufferId> = (0..engine.buffer_slots.max(1))
            .map(|_| backend.gen_buffer())
            .collect();
        backend.set_gain(voice, limits.gain);
        backend.set_pitch(voice, limits.pitch);
        backend.set_max_distance(voice, limits.max_distance);
        backend.set_reference_distance(voice, engine.reference_distance);
        backend.set_rolloff(voice, engine.rolloff);
        backend.set_position(voice, position);
        Self {
            voice,
            free: slots.iter().copied().collect(),
            slots,
            started: false,
            restarts: 0,
        }
    }

    pub fn voice(&self) -> VoiceId {
        self.voice
    }

    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn set_position<B: AudioBackend + ?Sized>(&self, backend: &mut B, position: Vec3) {
        backend.set_position(self.voice, position);
    }

    /// Move played buffers back to the free queue.
    pub fn reclaim<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) -> usize {
        let done = backend.unqueue_processed(self.voice, self.slots.len());
        let n = done.len();
        self.free.extend(done);
        n
    }

    /// Submit decoded batches while a slot is free. Returns the number queued.
    ///
    /// Each slot receives exactly the samples of one batch.
    pub fn fill<B: AudioBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        decoder: &mut IncrementalDecoder,
    ) -> usize {
        let mut queued = 0;
        while let Some(&slot) = self.free.front() {
            let Some(batch) = decoder.next_batch() else {
                break;
            };
            backend.buffer_data(slot, batch.format, &batch.samples);
            backend.queue_buffer(self.voice, slot);
            self.free.pop_front();
            queued += 1;
        }
        queued
    }

    /// Start the voice if it is idle with unplayed buffers queued.
    pub fn ensure_playing<B: AudioBackend + ?Sized>(&mut self, backend: &mut B) {
        if backend.is_playing(self.voice) {
            return;
        }
        let pending = backend
            .queued_count(self.voice)
            .saturating_sub(backend.processed_count(self.voice));
        if pending == 0 {
            return;
        }
        if self.started {
            self.restarts += 1;
            tracing::debug!(voice = self.voice.0, "voice restarted after underrun");
        }
        self.started = true;
        backend.play(self.voice);
    }

    /// Buffers still attached to the voice.
    pub fn queued<B: AudioBackend + ?Sized>(&self, backend: &B) -> usize {
        backend.queued_count(self.voice)
    }

    /// Return the voice to the pool, then delete every slot.
    pub fn release<B: AudioBackend + ?Sized>(self, backend: &mut B, pool: &mut VoicePool) {
        pool.release(backend, self.voice);
        for slot in self.slots {
            backend.delete_buffer(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VoiceState;
    use crate::decoder::{Accumulator, Container};
    use crate::mixer::{Mixer, OutputFormat};
    use crate::test_support::{expected_samples, flac};

    fn engine() -> EngineConfig {
        EngineConfig {
            frames_per_buffer: 256,
            ..EngineConfig::default()
        }
    }

    fn decoder_over(data: &[u8]) -> (Accumulator, IncrementalDecoder) {
        let mut acc = Accumulator::with_capacity(data.len());
        acc.append(data);
        let mut dec = IncrementalDecoder::new(256);
        dec.set_container(Container::Flac);
        assert_eq!(dec.prepare(&acc, true), Ok(true));
        (acc, dec)
    }

    #[test]
    fn fills_three_slots_with_exact_batches_and_plays() {
        let mut m = Mixer::new(OutputFormat {
            channels: 1,
            sample_rate: 8_000,
        });
        let mut pool = VoicePool::new(&mut m, 1);
        let voice = pool.acquire().unwrap();
        let (_acc, mut dec) = decoder_over(&flac(8_000, 1, 256, 600));

        let mut p = VoicePipeline::attach(&mut m, voice, &PlaybackLimits::default(), &engine(), Vec3::ORIGIN);
        assert_eq!(m.buffer_count(), 3);
        assert_eq!(p.fill(&mut m, &mut dec), 3);
        assert_eq!(p.free_slots(), 0);
        p.ensure_playing(&mut m);
        assert!(m.is_playing(voice));

        // 256 + 256 + 88 frames: the short tail is not padded.
        let mut out = vec![0.0f32; 700];
        m.render(&mut out);
        let expected: Vec<f32> = expected_samples(1, 600)
            .into_iter()
            .map(|s| f32::from(s) / 32768.0)
            .collect();
        assert_eq!(&out[..600], &expected[..]);
        assert!(out[600..].iter().all(|s| *s == 0.0));

        assert_eq!(m.state(voice), VoiceState::Stopped);
        assert_eq!(p.reclaim(&mut m), 3);
        assert_eq!(p.queued(&m), 0);
    }

    #[test]
    fn restarts_after_underrun() {
        let mut m = Mixer::new(OutputFormat {
            channels: 1,
            sample_rate: 8_000,
        });
        let mut pool = VoicePool::new(&mut m, 1);
        let voice = pool.acquire().unwrap();
        let (_acc, mut dec) = decoder_over(&flac(8_000, 1, 256, 1024));
        let mut p = VoicePipeline::attach(&mut m, voice, &PlaybackLimits::default(), &engine(), Vec3::ORIGIN);

        p.fill(&mut m, &mut dec);
        p.ensure_playing(&mut m);
        m.render(&mut vec![0.0; 1024]);
        assert_eq!(m.state(voice), VoiceState::Stopped);

        p.reclaim(&mut m);
        assert_eq!(p.fill(&mut m, &mut dec), 1);
        p.ensure_playing(&mut m);
        assert!(m.is_playing(voice));
        assert_eq!(p.restarts(), 1);
    }

    #[test]
    fn release_frees_voice_and_slots() {
        let mut m = Mixer::new(OutputFormat {
            channels: 2,
            sample_rate: 48_000,
        });
        let mut pool = VoicePool::new(&mut m, 2);
        let voice = pool.acquire().unwrap();
        let (_acc, mut dec) = decoder_over(&flac(48_000, 2, 256, 2048));
        let mut p = VoicePipeline::attach(&mut m, voice, &PlaybackLimits::default(), &engine(), Vec3::ORIGIN);
        p.fill(&mut m, &mut dec);
        p.ensure_playing(&mut m);

        p.release(&mut m, &mut pool);
        assert_eq!(m.buffer_count(), 0);
        assert_eq!(pool.free_count(), 2);
        assert!(pool.partitions_consistent());
    }
}

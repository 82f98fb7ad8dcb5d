//! Software implementation of [`AudioBackend`].
//!
//! The tick thread drives voices through the trait; the output callback calls
//! [`Mixer::render`] to pull mixed `f32` frames. Both sides share one mutex-guarded state,
//! held only for the duration of a single call.
//!
//! When a voice reaches a buffer, the buffer is mapped to the output channel layout and, if its
//! rate differs from the device or the voice is pitched, run through the voice's
//! [`RateConverter`]. The mixer itself only applies gain and inverse distance clamped
//! attenuation (silent beyond max distance) and sums the voices.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use audio_stream_proto::Vec3;

use crate::backend::{AudioBackend, BufferId, PcmFormat, VoiceId, VoiceState, neutral};
use crate::resample::RateConverter;

/// Device-side format the mixer renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

/// Cloneable handle to the shared mixer state.
#[derive(Clone, Debug)]
pub struct Mixer {
    shared: Arc<Mutex<MixerState>>,
}

#[derive(Debug)]
struct MixerState {
    output: OutputFormat,
    listener: Vec3,
    next_id: u32,
    voices: HashMap<VoiceId, Voice>,
    buffers: HashMap<BufferId, PcmBuffer>,
}

#[derive(Debug)]
struct PcmBuffer {
    format: PcmFormat,
    samples: Vec<i16>,
    attached_to: Option<VoiceId>,
}

impl PcmBuffer {
    fn frames(&self) -> usize {
        let ch = usize::from(self.format.channels.max(1));
        self.samples.len() / ch
    }

    /// Append every frame as `f32` in the output channel layout.
    fn map_into(&self, dst_channels: usize, out: &mut Vec<f32>) {
        let src_channels = usize::from(self.format.channels.max(1));
        out.reserve(self.frames() * dst_channels);
        for frame in self.samples.chunks_exact(src_channels) {
            let get = |ch: usize| f32::from(frame[ch]) / 32768.0;
            for dst_ch in 0..dst_channels {
                out.push(match (src_channels, dst_channels) {
                    (1, _) => get(0),
                    (2, 1) => 0.5 * (get(0) + get(1)),
                    _ => get(dst_ch.min(src_channels - 1)),
                });
            }
        }
    }
}

#[derive(Debug)]
struct Voice {
    queue: VecDeque<BufferId>,
    /// Leading entries of `queue` that have finished playing.
    processed: usize,
    /// Output-rate samples of `queue[processed]`, valid while `loaded`.
    staged: Vec<f32>,
    staged_pos: usize,
    loaded: bool,
    mapped: Vec<f32>,
    converter: Option<RateConverter>,
    state: VoiceState,
    gain: f32,
    pitch: f32,
    position: Vec3,
    rolloff: f32,
    reference_distance: f32,
    max_distance: f32,
}

impl Voice {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            processed: 0,
            staged: Vec::new(),
            staged_pos: 0,
            loaded: false,
            mapped: Vec::new(),
            converter: None,
            state: VoiceState::Initial,
            gain: neutral::GAIN,
            pitch: neutral::PITCH,
            position: Vec3::ORIGIN,
            rolloff: neutral::ROLLOFF,
            reference_distance: neutral::REFERENCE_DISTANCE,
            max_distance: neutral::MAX_DISTANCE,
        }
    }

    fn attenuation(&self, listener: &Vec3) -> f32 {
        let distance = listener.distance(&self.position) as f32;
        if distance > self.max_distance {
            return 0.0;
        }
        let reference = self.reference_distance;
        if reference <= 0.0 {
            return 1.0;
        }
        let clamped = distance.clamp(reference, self.max_distance.max(reference));
        reference / (reference + self.rolloff * (clamped - reference))
    }

    fn unstage(&mut self) {
        self.staged.clear();
        self.staged_pos = 0;
        self.loaded = false;
    }

    /// Drop staged output and converter state; queued buffers are untouched.
    fn reset_playback(&mut self) {
        self.unstage();
        self.converter = None;
    }

    /// Stage `queue[processed]` at the output rate. False when nothing is left to play.
    fn load_current(&mut self, buffers: &HashMap<BufferId, PcmBuffer>, output: OutputFormat) -> bool {
        let Some(buffer) = self.queue.get(self.processed).and_then(|id| buffers.get(id)) else {
            return false;
        };
        let has_next = self.processed + 1 < self.queue.len();
        let channels = usize::from(output.channels.max(1));
        let rate = buffer.format.sample_rate;
        self.staged.clear();
        self.staged_pos = 0;
        self.loaded = true;

        if let Some(conv) = self.converter.as_mut()
            && conv.in_rate() != rate
        {
            if let Err(e) = conv.flush(&mut self.staged) {
                tracing::warn!("rate converter flush failed: {e:#}");
            }
            self.converter = None;
        }

        let unity_pitch = (self.pitch - 1.0).abs() <= f32::EPSILON;
        if self.converter.is_none() && rate == output.sample_rate && unity_pitch {
            buffer.map_into(channels, &mut self.staged);
            return true;
        }

        if self.converter.is_none() {
            match RateConverter::new(rate, output.sample_rate, channels, self.pitch) {
                Ok(conv) => {
                    tracing::debug!(
                        from = rate,
                        to = output.sample_rate,
                        pitch = self.pitch,
                        "rate converter created"
                    );
                    self.converter = Some(conv);
                }
                Err(e) => {
                    tracing::warn!("skipping buffer: {e:#}");
                    return true;
                }
            }
        }
        let Some(conv) = self.converter.as_mut() else {
            return true;
        };

        self.mapped.clear();
        buffer.map_into(channels, &mut self.mapped);
        if let Err(e) = convert(conv, self.pitch, &self.mapped, &mut self.staged, !has_next) {
            tracing::warn!("rate conversion failed: {e:#}");
            conv.reset();
        }
        true
    }
}

/// Without a follow-up buffer the carried remainder is flushed so the tail is audible.
fn convert(
    conv: &mut RateConverter,
    pitch: f32,
    input: &[f32],
    out: &mut Vec<f32>,
    last: bool,
) -> anyhow::Result<()> {
    conv.set_pitch(pitch)?;
    conv.push(input, out)?;
    if last {
        conv.flush(out)?;
    }
    Ok(())
}

impl Mixer {
    pub fn new(output: OutputFormat) -> Self {
        Self {
            shared: Arc::new(Mutex::new(MixerState {
                output,
                listener: Vec3::ORIGIN,
                next_id: 1,
                voices: HashMap::new(),
                buffers: HashMap::new(),
            })),
        }
    }

    pub fn output(&self) -> OutputFormat {
        self.lock().output
    }

    /// Number of live buffers (queued or not).
    pub fn buffer_count(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn voice_count(&self) -> usize {
        self.lock().voices.len()
    }

    fn lock(&self) -> MutexGuard<'_, MixerState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mix every playing voice into `out` (interleaved, output channel count).
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let mut guard = self.lock();
        let MixerState {
            output,
            listener,
            voices,
            buffers,
            ..
        } = &mut *guard;
        let channels = usize::from(output.channels.max(1));
        let frames_out = out.len() / channels;

        for voice in voices.values_mut() {
            if voice.state != VoiceState::Playing {
                continue;
            }
            let gain = voice.gain * voice.attenuation(listener);
            let mut frame = 0usize;
            while frame < frames_out {
                if !voice.loaded && !voice.load_current(buffers, *output) {
                    break;
                }
                let available = (voice.staged.len() - voice.staged_pos) / channels;
                let n = available.min(frames_out - frame);
                let src = &voice.staged[voice.staged_pos..voice.staged_pos + n * channels];
                let dst = &mut out[frame * channels..(frame + n) * channels];
                for (d, s) in dst.iter_mut().zip(src) {
                    *d += s * gain;
                }
                voice.staged_pos += n * channels;
                frame += n;
                if voice.staged.len() - voice.staged_pos < channels {
                    voice.unstage();
                    voice.processed += 1;
                }
            }
            if voice.processed >= voice.queue.len() {
                voice.unstage();
                voice.state = VoiceState::Stopped;
            }
        }
    }
}

impl MixerState {
    fn voice(&mut self, id: VoiceId) -> Option<&mut Voice> {
        let voice = self.voices.get_mut(&id);
        if voice.is_none() {
            tracing::debug!(voice = id.0, "unknown voice");
        }
        voice
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }
}

impl AudioBackend for Mixer {
    fn gen_voice(&mut self) -> VoiceId {
        let mut st = self.lock();
        let id = VoiceId(st.alloc_id());
        st.voices.insert(id, Voice::new());
        id
    }

    fn delete_voice(&mut self, voice: VoiceId) {
        let mut st = self.lock();
        if let Some(v) = st.voices.remove(&voice) {
            for b in v.queue {
                if let Some(buf) = st.buffers.get_mut(&b) {
                    buf.attached_to = None;
                }
            }
        }
    }

    fn gen_buffer(&mut self) -> BufferId {
        let mut st = self.lock();
        let id = BufferId(st.alloc_id());
        let sample_rate = st.output.sample_rate;
        st.buffers.insert(
            id,
            PcmBuffer {
                format: PcmFormat {
                    channels: 1,
                    sample_rate,
                },
                samples: Vec::new(),
                attached_to: None,
            },
        );
        id
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        let mut st = self.lock();
        match st.buffers.get(&buffer) {
            Some(b) if b.attached_to.is_some() => {
                tracing::warn!(buffer = buffer.0, "refusing to delete a queued buffer");
            }
            Some(_) => {
                st.buffers.remove(&buffer);
            }
            None => {}
        }
    }

    fn buffer_data(&mut self, buffer: BufferId, format: PcmFormat, samples: &[i16]) {
        let mut st = self.lock();
        match st.buffers.get_mut(&buffer) {
            Some(b) if b.attached_to.is_none() => {
                b.format = format;
                b.samples.clear();
                b.samples.extend_from_slice(samples);
            }
            Some(_) => tracing::warn!(buffer = buffer.0, "buffer_data on a queued buffer"),
            None => {}
        }
    }

    fn queue_buffer(&mut self, voice: VoiceId, buffer: BufferId) {
        let mut st = self.lock();
        let free = matches!(st.buffers.get(&buffer), Some(b) if b.attached_to.is_none());
        if !free {
            tracing::warn!(buffer = buffer.0, "queue of unknown or attached buffer");
            return;
        }
        if let Some(v) = st.voice(voice) {
            v.queue.push_back(buffer);
            if let Some(b) = st.buffers.get_mut(&buffer) {
                b.attached_to = Some(voice);
            }
        }
    }

    fn unqueue_processed(&mut self, voice: VoiceId, max: usize) -> Vec<BufferId> {
        let mut st = self.lock();
        let mut out = Vec::new();
        if let Some(v) = st.voice(voice) {
            let n = v.processed.min(max);
            out.extend(v.queue.drain(..n));
            v.processed -= n;
        }
        for b in &out {
            if let Some(buf) = st.buffers.get_mut(b) {
                buf.attached_to = None;
            }
        }
        out
    }

    fn detach_buffers(&mut self, voice: VoiceId) -> Vec<BufferId> {
        let mut st = self.lock();
        let mut out = Vec::new();
        if let Some(v) = st.voice(voice) {
            v.state = VoiceState::Stopped;
            v.processed = 0;
            v.reset_playback();
            out.extend(v.queue.drain(..));
        }
        for b in &out {
            if let Some(buf) = st.buffers.get_mut(b) {
                buf.attached_to = None;
            }
        }
        out
    }

    fn queued_count(&self, voice: VoiceId) -> usize {
        self.lock().voices.get(&voice).map(|v| v.queue.len()).unwrap_or(0)
    }

    fn processed_count(&self, voice: VoiceId) -> usize {
        self.lock().voices.get(&voice).map(|v| v.processed).unwrap_or(0)
    }

    fn set_position(&mut self, voice: VoiceId, position: Vec3) {
        if let Some(v) = self.lock().voice(voice) {
            v.position = position;
        }
    }

    fn set_gain(&mut self, voice: VoiceId, gain: f32) {
        if let Some(v) = self.lock().voice(voice) {
            v.gain = gain.max(0.0);
        }
    }

    fn set_pitch(&mut self, voice: VoiceId, pitch: f32) {
        if let Some(v) = self.lock().voice(voice) {
            v.pitch = pitch.max(0.0);
        }
    }

    fn set_rolloff(&mut self, voice: VoiceId, rolloff: f32) {
        if let Some(v) = self.lock().voice(voice) {
            v.rolloff = rolloff.max(0.0);
        }
    }

    fn set_reference_distance(&mut self, voice: VoiceId, distance: f32) {
        if let Some(v) = self.lock().voice(voice) {
            v.reference_distance = distance.max(0.0);
        }
    }

    fn set_max_distance(&mut self, voice: VoiceId, distance: f32) {
        if let Some(v) = self.lock().voice(voice) {
            v.max_distance = distance.max(0.0);
        }
    }

    fn set_listener(&mut self, position: Vec3) {
        self.lock().listener = position;
    }

    /// Resumes from the first unprocessed buffer; a no-op when nothing is pending.
    fn play(&mut self, voice: VoiceId) {
        if let Some(v) = self.lock().voice(voice) {
            if v.processed < v.queue.len() {
                v.state = VoiceState::Playing;
            } else {
                v.state = VoiceState::Stopped;
            }
        }
    }

    /// Stops playback and marks every queued buffer processed.
    fn stop(&mut self, voice: VoiceId) {
        if let Some(v) = self.lock().voice(voice) {
            if v.state == VoiceState::Playing || v.state == VoiceState::Stopped {
                v.processed = v.queue.len();
                v.reset_playback();
            }
            v.state = VoiceState::Stopped;
        }
    }

    fn state(&self, voice: VoiceId) -> VoiceState {
        self.lock()
            .voices
            .get(&voice)
            .map(|v| v.state)
            .unwrap_or(VoiceState::Initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONO_8K: PcmFormat = PcmFormat {
        channels: 1,
        sample_rate: 8_000,
    };

    fn mixer() -> Mixer {
        Mixer::new(OutputFormat {
            channels: 2,
            sample_rate: 8_000,
        })
    }

    fn filled_buffer(m: &mut Mixer, frames: usize, value: i16) -> BufferId {
        let b = m.gen_buffer();
        m.buffer_data(b, MONO_8K, &vec![value; frames]);
        b
    }

    #[test]
    fn buffers_become_processed_in_order_then_voice_stops() {
        let mut m = mixer();
        let v = m.gen_voice();
        let a = filled_buffer(&mut m, 4, 1000);
        let b = filled_buffer(&mut m, 4, 1000);
        m.queue_buffer(v, a);
        m.queue_buffer(v, b);
        m.play(v);
        assert!(m.is_playing(v));

        let mut out = vec![0.0f32; 6 * 2];
        m.render(&mut out);
        assert_eq!(m.processed_count(v), 1);
        assert_eq!(m.queued_count(v), 2);
        assert_eq!(m.unqueue_processed(v, 8), vec![a]);

        let mut out = vec![0.0f32; 4 * 2];
        m.render(&mut out);
        assert_eq!(m.state(v), VoiceState::Stopped);
        assert!(out[..4].iter().all(|s| *s > 0.0));
        assert!(out[4..].iter().all(|s| *s == 0.0));
        assert_eq!(m.unqueue_processed(v, 8), vec![b]);
        assert_eq!(m.queued_count(v), 0);
    }

    #[test]
    fn play_after_underrun_resumes_with_new_buffers() {
        let mut m = mixer();
        let v = m.gen_voice();
        let a = filled_buffer(&mut m, 2, 500);
        m.queue_buffer(v, a);
        m.play(v);
        m.render(&mut vec![0.0; 8]);
        assert_eq!(m.state(v), VoiceState::Stopped);

        m.unqueue_processed(v, 1);
        m.buffer_data(a, MONO_8K, &[700, 700]);
        m.queue_buffer(v, a);
        m.play(v);
        assert!(m.is_playing(v));
        let mut out = vec![0.0; 4];
        m.render(&mut out);
        assert!((out[0] - 700.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn inverse_distance_clamped_attenuation() {
        let mut m = mixer();
        let v = m.gen_voice();
        m.set_reference_distance(v, 16.0);
        m.set_rolloff(v, 1.0);
        m.set_max_distance(v, 64.0);
        m.set_listener(Vec3::ORIGIN);

        let gain_at = |m: &mut Mixer, x: f64| {
            m.set_position(v, Vec3::new(x, 0.0, 0.0));
            let st = m.lock();
            st.voices[&v].attenuation(&st.listener)
        };
        assert_eq!(gain_at(&mut m, 4.0), 1.0);
        assert!((gain_at(&mut m, 32.0) - 0.5).abs() < 1e-6);
        assert_eq!(gain_at(&mut m, 65.0), 0.0);
    }

    #[test]
    fn pitch_doubles_consumption_rate() {
        let mut m = mixer();
        let normal = m.gen_voice();
        let fast = m.gen_voice();
        for v in [normal, fast] {
            let b = filled_buffer(&mut m, 4096, 100);
            m.queue_buffer(v, b);
        }
        m.set_pitch(fast, 2.0);
        m.play(normal);
        m.play(fast);

        m.render(&mut vec![0.0; 2_300 * 2]);
        assert_eq!(m.processed_count(fast), 1);
        assert_eq!(m.state(fast), VoiceState::Stopped);
        assert_eq!(m.processed_count(normal), 0);
        assert!(m.is_playing(normal));
    }

    #[test]
    fn foreign_rate_buffer_is_resampled_to_device_rate() {
        let mut m = Mixer::new(OutputFormat {
            channels: 2,
            sample_rate: 44_100,
        });
        let v = m.gen_voice();
        let b = m.gen_buffer();
        let format = PcmFormat {
            channels: 1,
            sample_rate: 48_000,
        };
        m.buffer_data(b, format, &vec![8_000; 4_800]);
        m.queue_buffer(v, b);
        m.play(v);

        let mut out = vec![0.0f32; 3_000 * 2];
        m.render(&mut out);
        assert_eq!(m.processed_count(v), 0);
        assert!(out.iter().any(|s| *s > 0.2));
        assert!(out.chunks_exact(2).all(|f| f[0] == f[1]));

        m.render(&mut vec![0.0; 3_000 * 2]);
        assert_eq!(m.processed_count(v), 1);
        assert_eq!(m.state(v), VoiceState::Stopped);
    }

    #[test]
    fn matching_rate_at_unity_pitch_is_bit_exact() {
        let mut m = mixer();
        let v = m.gen_voice();
        let b = m.gen_buffer();
        m.buffer_data(b, MONO_8K, &[1000, -2000, 3000]);
        m.queue_buffer(v, b);
        m.play(v);
        let mut out = vec![0.0f32; 3 * 2];
        m.render(&mut out);
        let expected: Vec<f32> = [1000i16, -2000, 3000]
            .iter()
            .flat_map(|s| [f32::from(*s) / 32768.0; 2])
            .collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn detach_releases_queued_buffers_for_deletion() {
        let mut m = mixer();
        let v = m.gen_voice();
        let a = filled_buffer(&mut m, 4, 1);
        m.queue_buffer(v, a);
        m.delete_buffer(a);
        assert_eq!(m.buffer_count(), 1);

        assert_eq!(m.detach_buffers(v), vec![a]);
        assert_eq!(m.state(v), VoiceState::Stopped);
        m.delete_buffer(a);
        assert_eq!(m.buffer_count(), 0);
    }
}

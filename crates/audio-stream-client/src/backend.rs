//! Hardware audio primitives driven by the receiver engine.
//!
//! The contract follows a classic positional audio API: voices play a FIFO of queued PCM
//! buffers; a buffer counts as *processed* once played and stays queued until unqueued.

use audio_stream_proto::Vec3;

/// Hardware playback voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u32);

/// Hardware PCM buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Initial,
    Playing,
    Stopped,
}

/// Layout of the interleaved `i16` samples handed to [`AudioBackend::buffer_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

/// Parameters a released voice is reset to.
pub mod neutral {
    pub const GAIN: f32 = 1.0;
    pub const PITCH: f32 = 1.0;
    pub const ROLLOFF: f32 = 1.0;
    pub const REFERENCE_DISTANCE: f32 = 1.0;
    pub const MAX_DISTANCE: f32 = f32::MAX;
}

/// Voice, buffer and listener operations.
///
/// Unknown ids are ignored. All calls happen on the owning tick thread.
pub trait AudioBackend {
    fn gen_voice(&mut self) -> VoiceId;
    fn delete_voice(&mut self, voice: VoiceId);

    fn gen_buffer(&mut self) -> BufferId;
    fn delete_buffer(&mut self, buffer: BufferId);

    /// Replace the contents of an unqueued buffer.
    fn buffer_data(&mut self, buffer: BufferId, format: PcmFormat, samples: &[i16]);

    fn queue_buffer(&mut self, voice: VoiceId, buffer: BufferId);

    /// Unqueue up to `max` processed buffers, oldest first.
    fn unqueue_processed(&mut self, voice: VoiceId, max: usize) -> Vec<BufferId>;

    /// Stop the voice and detach every queued buffer.
    fn detach_buffers(&mut self, voice: VoiceId) -> Vec<BufferId>;

    /// Buffers attached to the voice, processed ones included.
    fn queued_count(&self, voice: VoiceId) -> usize;
    fn processed_count(&self, voice: VoiceId) -> usize;

    fn set_position(&mut self, voice: VoiceId, position: Vec3);
    fn set_gain(&mut self, voice: VoiceId, gain: f32);
    fn set_pitch(&mut self, voice: VoiceId, pitch: f32);
    fn set_rolloff(&mut self, voice: VoiceId, rolloff: f32);
    fn set_reference_distance(&mut self, voice: VoiceId, distance: f32);
    fn set_max_distance(&mut self, voice: VoiceId, distance: f32);

    fn set_listener(&mut self, position: Vec3);

    fn play(&mut self, voice: VoiceId);
    fn stop(&mut self, voice: VoiceId);
    fn state(&self, voice: VoiceId) -> VoiceState;

    fn is_playing(&self, voice: VoiceId) -> bool {
        self.state(voice) == VoiceState::Playing
    }
}

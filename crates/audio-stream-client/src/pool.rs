//! Fixed-capacity voice pool shared by every stream.
//!
//! Voices are generated once up front; afterwards an id is either in the free queue or owned
//! by exactly one stream. Exhaustion is not an error: callers retry on a later tick.

use std::collections::{HashSet, VecDeque};

use audio_stream_proto::Vec3;

use crate::backend::{AudioBackend, BufferId, VoiceId, neutral};

#[derive(Debug)]
pub struct VoicePool {
    capacity: usize,
    free: VecDeque<VoiceId>,
    in_use: HashSet<VoiceId>,
}

impl VoicePool {
    /// Generate `capacity` voices on `backend`.
    pub fn new<B: AudioBackend + ?Sized>(backend: &mut B, capacity: usize) -> Self {
        let free = (0..capacity).map(|_| backend.gen_voice()).collect();
        Self {
            capacity,
            free,
            in_use: HashSet::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    /// Take a free voice, or `None` when every voice is owned.
    pub fn acquire(&mut self) -> Option<VoiceId> {
        let voice = self.free.pop_front()?;
        self.in_use.insert(voice);
        Some(voice)
    }

    /// Reset `voice` to neutral parameters, detach its buffers and mark it free.
    ///
    /// Returns the detached buffers; the caller still owns them. Releasing a voice that is not
    /// in use does nothing and returns an empty list.
    pub fn release<B: AudioBackend + ?Sized>(&mut self, backend: &mut B, voice: VoiceId) -> Vec<BufferId> {
        if !self.in_use.remove(&voice) {
            tracing::debug!(voice = voice.0, "release of a voice that is not in use");
            return Vec::new();
        }
        backend.stop(voice);
        let detached = backend.detach_buffers(voice);
        backend.set_gain(voice, neutral::GAIN);
        backend.set_pitch(voice, neutral::PITCH);
        backend.set_position(voice, Vec3::ORIGIN);
        backend.set_rolloff(voice, neutral::ROLLOFF);
        backend.set_reference_distance(voice, neutral::REFERENCE_DISTANCE);
        backend.set_max_distance(voice, neutral::MAX_DISTANCE);
        self.free.push_back(voice);
        detached
    }

    /// Delete every voice. Owned voices are detached first.
    pub fn destroy<B: AudioBackend + ?Sized>(mut self, backend: &mut B) {
        let owned: Vec<VoiceId> = self.in_use.iter().copied().collect();
        for voice in owned {
            self.release(backend, voice);
        }
        for voice in self.free.drain(..) {
            backend.delete_voice(voice);
        }
    }

    /// Free and in-use partitions are disjoint and together hold exactly `capacity` ids.
    pub fn partitions_consistent(&self) -> bool {
        let free: HashSet<VoiceId> = self.free.iter().copied().collect();
        free.len() == self.free.len()
            && free.is_disjoint(&self.in_use)
            && free.len() + self.in_use.len() == self.capacity
    }
}

use super::frame::AudioFrame;
use std::collections::VecDeque;

/// Fixed-capacity ring of the most recent frames, used as pre-roll so the
/// first syllable before the detector fires is not clipped.
#[derive(Debug)]
pub struct SegmentBuffer {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
}

impl SegmentBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting and returning the oldest one when full.
    pub fn push(&mut self, frame: AudioFrame) -> Option<AudioFrame> {
        let evicted = if self.frames.len() >= self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &AudioFrame> {
        self.frames.iter()
    }

    /// Move the buffered frames out, oldest first, leaving the ring empty.
    pub fn take_all(&mut self) -> Vec<AudioFrame> {
        self.frames.drain(..).collect()
    }
}

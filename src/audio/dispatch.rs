use super::frame::AudioFrame;
use super::resample::convert_frame_to_target;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Downmix interleaved input to mono while applying the provided converter so
/// the segmenter sees a single channel regardless of the microphone layout.
pub(super) fn append_downmixed_samples<T, F>(
    buf: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

/// Normalized float sample to PCM16 with clipping.
pub(super) fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

/// Cuts the device callback stream into fixed frames at the target rate and
/// pushes them without blocking the audio thread. Frames that do not fit in
/// the channel are counted as dropped.
pub(super) struct FrameDispatcher {
    device_frame_samples: usize,
    target_frame_samples: usize,
    device_rate: u32,
    target_rate: u32,
    pending: Vec<f32>,
    scratch: Vec<f32>,
    sender: Sender<AudioFrame>,
    dropped: Arc<AtomicUsize>,
}

impl FrameDispatcher {
    pub(super) fn new(
        device_rate: u32,
        target_rate: u32,
        target_frame_samples: usize,
        sender: Sender<AudioFrame>,
        dropped: Arc<AtomicUsize>,
    ) -> Self {
        let target_frame_samples = target_frame_samples.max(1);
        let device_frame_samples = if target_rate == 0 {
            target_frame_samples
        } else {
            ((target_frame_samples as u64 * u64::from(device_rate)) / u64::from(target_rate))
                .max(1) as usize
        };
        Self {
            device_frame_samples,
            target_frame_samples,
            device_rate,
            target_rate,
            pending: Vec::with_capacity(device_frame_samples),
            scratch: Vec::new(),
            sender,
            dropped,
        }
    }

    pub(super) fn push<T, F>(&mut self, data: &[T], channels: usize, convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        self.scratch.clear();
        append_downmixed_samples(&mut self.scratch, data, channels, convert);
        self.pending.extend_from_slice(&self.scratch);

        while self.pending.len() >= self.device_frame_samples {
            let chunk: Vec<f32> = self.pending.drain(..self.device_frame_samples).collect();
            let converted = convert_frame_to_target(
                chunk,
                self.device_rate,
                self.target_rate,
                self.target_frame_samples,
            );
            let frame = AudioFrame::new(converted.into_iter().map(to_pcm16).collect());
            if let Err(err) = self.sender.try_send(frame) {
                match err {
                    TrySendError::Full(_) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    TrySendError::Disconnected(_) => break,
                }
            }
        }
    }
}

//! Speech playback through the default CPAL output device.
//!
//! `play` blocks the calling thread until the audio has been handed to the
//! device, a stop request arrives, or the hard timeout expires. `stop` may
//! be called from any thread at any time.

use super::resample::resample;
use super::wav::decode_wav;
use crate::error::AudioError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_PLAYBACK_TIMEOUT: Duration = Duration::from_secs(30);
pub const PLAYBACK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Raw little-endian mono PCM16 at `SpeechAudio::sample_rate`.
    Pcm16,
    /// RIFF/WAVE container; the header carries rate and channels.
    Wav,
}

/// Synthesized speech ready for playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechAudio {
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
    pub format: AudioFormat,
}

/// Mono float samples decoded from [`SpeechAudio`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SpeechAudio {
    pub fn empty() -> Self {
        Self {
            bytes: Vec::new(),
            sample_rate: 0,
            format: AudioFormat::Pcm16,
        }
    }

    pub fn pcm16(samples: &[i16], sample_rate: u32) -> Self {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        Self {
            bytes,
            sample_rate,
            format: AudioFormat::Pcm16,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn decode(&self) -> Result<DecodedAudio, AudioError> {
        match self.format {
            AudioFormat::Pcm16 => {
                if self.sample_rate == 0 {
                    return Err(AudioError::InvalidData("PCM audio without sample rate".into()));
                }
                let samples = self
                    .bytes
                    .chunks_exact(2)
                    .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32_768.0)
                    .collect();
                Ok(DecodedAudio {
                    samples,
                    sample_rate: self.sample_rate,
                })
            }
            AudioFormat::Wav => decode_wav(&self.bytes),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Stopped,
    TimedOut,
    /// Nothing to play.
    Skipped,
}

/// Audio output used by the orchestrator.
pub trait PlaybackSink: Send + Sync {
    /// Play and block until the audio is done or the timeout expires. A
    /// `stop()` or a raised `cancel` flag ends it early as `Stopped`.
    fn play(&self, audio: &SpeechAudio, cancel: &AtomicBool) -> Result<PlaybackOutcome, AudioError>;

    /// Halt the playback in progress, if any.
    fn stop(&self);
}

/// Generation-counting stop primitive: a stop only affects playbacks that
/// started before it.
#[derive(Debug, Default)]
pub struct StopSignal {
    generation: AtomicU64,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a playback about to start.
    pub fn begin(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_stopped(&self, token: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != token
    }
}

/// Poll `done`, the stop signal and `cancel` every `poll` until one fires or
/// `timeout` elapses.
pub fn wait_for_playback(
    done: &AtomicBool,
    stop: &StopSignal,
    token: u64,
    cancel: &AtomicBool,
    timeout: Duration,
    poll: Duration,
) -> PlaybackOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        if stop.is_stopped(token) || cancel.load(Ordering::SeqCst) {
            return PlaybackOutcome::Stopped;
        }
        if done.load(Ordering::SeqCst) {
            return PlaybackOutcome::Finished;
        }
        let now = Instant::now();
        if now >= deadline {
            return PlaybackOutcome::TimedOut;
        }
        thread::sleep(poll.min(deadline - now));
    }
}

/// Speaker output via CPAL. The stream is built and dropped on the calling
/// thread for each utterance.
pub struct CpalPlayback {
    device_name: Option<String>,
    timeout: Duration,
    poll: Duration,
    stop: StopSignal,
}

impl CpalPlayback {
    pub fn new(device_name: Option<String>, timeout: Duration) -> Self {
        Self {
            device_name,
            timeout,
            poll: PLAYBACK_POLL_INTERVAL,
            stop: StopSignal::new(),
        }
    }

    fn device(&self) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => host
                .output_devices()
                .map_err(|err| AudioError::Device(format!("no output devices available: {err}")))?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| AudioError::Device(format!("output device '{name}' not found"))),
            None => host
                .default_output_device()
                .ok_or_else(|| AudioError::Device("no default output device available".into())),
        }
    }
}

impl PlaybackSink for CpalPlayback {
    fn play(
        &self,
        audio: &SpeechAudio,
        cancel: &AtomicBool,
    ) -> Result<PlaybackOutcome, AudioError> {
        if audio.is_empty() {
            return Ok(PlaybackOutcome::Skipped);
        }
        let token = self.stop.begin();
        if cancel.load(Ordering::SeqCst) {
            return Ok(PlaybackOutcome::Stopped);
        }
        let decoded = audio.decode()?;
        if decoded.samples.is_empty() {
            return Ok(PlaybackOutcome::Skipped);
        }

        let device = self.device()?;
        let supported = device
            .default_output_config()
            .map_err(|err| AudioError::Device(format!("no usable output config: {err}")))?;
        let format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let device_rate = config.sample_rate.0;
        let channels = usize::from(config.channels.max(1));

        let samples: Arc<[f32]> =
            resample(&decoded.samples, decoded.sample_rate, device_rate).into();
        let cursor = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicBool::new(false));
        tracing::debug!(
            samples = samples.len(),
            device_rate,
            channels,
            ?format,
            "starting playback"
        );

        let output = OutputBuffer {
            channels,
            samples,
            cursor,
            done: done.clone(),
        };
        let stream = match format {
            SampleFormat::F32 => build_output::<f32>(&device, &config, output),
            SampleFormat::I16 => build_output::<i16>(&device, &config, output),
            SampleFormat::U16 => build_output::<u16>(&device, &config, output),
            other => Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
        }?;
        stream
            .play()
            .map_err(|err| AudioError::Device(format!("failed to start output stream: {err}")))?;

        let outcome =
            wait_for_playback(&done, &self.stop, token, cancel, self.timeout, self.poll);
        if let Err(err) = stream.pause() {
            tracing::debug!(error = %err, "failed to pause output stream");
        }
        drop(stream);
        match outcome {
            PlaybackOutcome::TimedOut => tracing::warn!(
                timeout_secs = self.timeout.as_secs(),
                "playback timed out; forcing stop"
            ),
            PlaybackOutcome::Stopped => tracing::info!("playback stopped"),
            _ => {}
        }
        Ok(outcome)
    }

    fn stop(&self) {
        self.stop.stop();
    }
}

/// Decoded samples shared with the output callback.
struct OutputBuffer {
    channels: usize,
    samples: Arc<[f32]>,
    cursor: Arc<AtomicUsize>,
    done: Arc<AtomicBool>,
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    output: OutputBuffer,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let OutputBuffer {
        channels,
        samples,
        cursor,
        done,
    } = output;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let idx = cursor.fetch_add(1, Ordering::Relaxed);
                    let value = match samples.get(idx) {
                        Some(value) => *value,
                        None => {
                            done.store(true, Ordering::SeqCst);
                            0.0
                        }
                    };
                    for out in frame.iter_mut() {
                        *out = T::from_sample(value);
                    }
                }
            },
            |err| tracing::warn!(error = %err, "output stream error"),
            None,
        )
        .map_err(|err| AudioError::Device(format!("failed to build output stream: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn pcm_decodes_little_endian_samples() {
        let audio = SpeechAudio::pcm16(&[0, 16_384, -32_768], 16_000);
        let decoded = audio.decode().expect("decode");
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn wav_is_decoded_and_downmixed() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let spec = hound::WavSpec {
                channels: 2,
                sample_rate: 22_050,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("writer");
            for sample in [16_384i16, 0, -16_384, -16_384] {
                writer.write_sample(sample).expect("write");
            }
            writer.finalize().expect("finalize");
        }
        let audio = SpeechAudio {
            bytes: cursor.into_inner(),
            sample_rate: 0,
            format: AudioFormat::Wav,
        };
        let decoded = audio.decode().expect("decode");
        assert_eq!(decoded.sample_rate, 22_050);
        assert_eq!(decoded.samples, vec![0.25, -0.5]);
    }

    #[test]
    fn garbage_wav_is_invalid_data() {
        let audio = SpeechAudio {
            bytes: b"not a wav".to_vec(),
            sample_rate: 0,
            format: AudioFormat::Wav,
        };
        assert!(matches!(audio.decode(), Err(AudioError::InvalidData(_))));
    }

    #[test]
    fn wait_reports_finished_playback() {
        let done = AtomicBool::new(true);
        let stop = StopSignal::new();
        let token = stop.begin();
        let outcome = wait_for_playback(
            &done,
            &stop,
            token,
            &AtomicBool::new(false),
            Duration::from_secs(1),
            Duration::from_millis(5),
        );
        assert_eq!(outcome, PlaybackOutcome::Finished);
    }

    #[test]
    fn wait_times_out_when_driver_never_finishes() {
        let done = AtomicBool::new(false);
        let stop = StopSignal::new();
        let started = Instant::now();
        let outcome = wait_for_playback(
            &done,
            &stop,
            stop.begin(),
            &AtomicBool::new(false),
            Duration::from_millis(60),
            Duration::from_millis(10),
        );
        assert_eq!(outcome, PlaybackOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn stop_from_another_thread_ends_wait() {
        let done = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(StopSignal::new());
        let token = stop.begin();
        let stopper = {
            let stop = stop.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                stop.stop();
            })
        };
        let outcome = wait_for_playback(
            &done,
            &stop,
            token,
            &AtomicBool::new(false),
            Duration::from_secs(5),
            PLAYBACK_POLL_INTERVAL,
        );
        stopper.join().expect("join");
        assert_eq!(outcome, PlaybackOutcome::Stopped);
    }

    #[test]
    fn cancel_raised_before_the_wait_still_stops_it() {
        // A stop that lands before `begin` is missed by the generation check.
        let stop = StopSignal::new();
        let cancel = AtomicBool::new(false);
        stop.stop();
        cancel.store(true, Ordering::SeqCst);
        let token = stop.begin();
        let started = Instant::now();
        let outcome = wait_for_playback(
            &AtomicBool::new(false),
            &stop,
            token,
            &cancel,
            Duration::from_secs(5),
            PLAYBACK_POLL_INTERVAL,
        );
        assert_eq!(outcome, PlaybackOutcome::Stopped);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn cancelled_cpal_playback_returns_before_touching_the_device() {
        let playback = CpalPlayback::new(Some("no such device".into()), Duration::from_secs(1));
        let audio = SpeechAudio::pcm16(&[1_000; 160], 16_000);
        let outcome = playback
            .play(&audio, &AtomicBool::new(true))
            .expect("cancelled play");
        assert_eq!(outcome, PlaybackOutcome::Stopped);
    }

    #[test]
    fn earlier_stop_does_not_affect_later_playback() {
        let stop = StopSignal::new();
        stop.stop();
        let token = stop.begin();
        assert!(!stop.is_stopped(token));
        stop.stop();
        assert!(stop.is_stopped(token));
    }
}

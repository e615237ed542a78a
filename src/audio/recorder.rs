//! System microphone capture via CPAL.
//!
//! Handles device enumeration, format conversion, and sample rate
//! normalization. Frames leave as mono PCM16 at the configured rate. The
//! CPAL stream is owned by a dedicated thread because it is not `Send` on
//! every platform.

use super::dispatch::FrameDispatcher;
use super::frame::AudioFrame;
use super::source::{CaptureSource, CaptureStream};
use crate::error::AudioError;
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const STREAM_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Microphone source backed by the default CPAL host.
#[derive(Debug, Clone)]
pub struct CpalCapture {
    device_name: Option<String>,
    sample_rate: u32,
    channel_capacity: usize,
}

impl CpalCapture {
    /// `device_name` picks a specific input; `None` uses the system default.
    pub fn new(device_name: Option<String>, sample_rate: u32, channel_capacity: usize) -> Self {
        Self {
            device_name,
            sample_rate,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// List microphone names so the CLI can expose a human-friendly selector.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices().context("no input devices available")?;
        let mut names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
        Ok(names)
    }
}

impl CaptureSource for CpalCapture {
    fn open(&self, frame_samples: usize) -> Result<CaptureStream, AudioError> {
        let (frame_tx, frame_rx) = bounded::<AudioFrame>(self.channel_capacity);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let dropped = Arc::new(AtomicUsize::new(0));

        let device_name = self.device_name.clone();
        let target_rate = self.sample_rate;
        let worker_dropped = dropped.clone();
        let worker = thread::Builder::new()
            .name("capture-stream".to_string())
            .spawn(move || {
                run_stream(
                    device_name.as_deref(),
                    target_rate,
                    frame_samples,
                    frame_tx,
                    worker_dropped,
                    stop_rx,
                    ready_tx,
                )
            })
            .map_err(|err| AudioError::Device(format!("failed to spawn capture thread: {err}")))?;

        match ready_rx.recv_timeout(STREAM_START_TIMEOUT) {
            Ok(Ok(())) => Ok(CaptureStream::new(frame_rx, dropped, stop_tx, worker)),
            Ok(Err(err)) => {
                let _ = worker.join();
                Err(err)
            }
            Err(_) => {
                drop(stop_tx);
                Err(AudioError::Device(format!(
                    "capture stream did not start within {}s",
                    STREAM_START_TIMEOUT.as_secs()
                )))
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| "default input".to_string())
    }
}

fn resolve_device(preferred: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => {
            let mut devices = host
                .input_devices()
                .map_err(|err| AudioError::Device(format!("no input devices available: {err}")))?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| AudioError::Device(format!("input device '{name}' not found")))
        }
        None => host.default_input_device().ok_or_else(|| {
            AudioError::Device(format!(
                "no default input device available. {}",
                mic_permission_hint()
            ))
        }),
    }
}

fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone (enable your terminal)."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone (allow access for your terminal)."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}

/// Body of the capture thread: build and start the stream, report readiness,
/// then park until stopped or the driver reports an error. Dropping the
/// stream drops the frame sender, which consumers observe as a disconnect.
fn run_stream(
    device_name: Option<&str>,
    target_rate: u32,
    frame_samples: usize,
    frame_tx: Sender<AudioFrame>,
    dropped: Arc<AtomicUsize>,
    stop_rx: Receiver<()>,
    ready_tx: Sender<Result<(), AudioError>>,
) {
    let (err_tx, err_rx) = bounded::<String>(1);
    let built = build_stream(
        device_name,
        target_rate,
        frame_samples,
        frame_tx,
        dropped,
        err_tx,
    );
    let stream = match built {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::Device(format!(
            "failed to start input stream: {err}"
        ))));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    select! {
        recv(stop_rx) -> _ => {}
        recv(err_rx) -> msg => {
            if let Ok(msg) = msg {
                tracing::error!(error = %msg, "input stream failed");
            }
        }
    }
    if let Err(err) = stream.pause() {
        tracing::debug!(error = %err, "failed to pause input stream");
    }
}

fn error_callback(err_tx: Sender<String>) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        tracing::warn!(error = %err, "audio_stream_error");
        let _ = err_tx.try_send(err.to_string());
    }
}

fn build_stream(
    device_name: Option<&str>,
    target_rate: u32,
    frame_samples: usize,
    frame_tx: Sender<AudioFrame>,
    dropped: Arc<AtomicUsize>,
    err_tx: Sender<String>,
) -> Result<cpal::Stream, AudioError> {
    let device = resolve_device(device_name)?;
    let default_config = device
        .default_input_config()
        .map_err(|err| AudioError::Device(format!("no usable input config: {err}")))?;
    let format = default_config.sample_format();
    let device_config: StreamConfig = default_config.into();
    let device_rate = device_config.sample_rate.0;
    let channels = usize::from(device_config.channels.max(1));
    tracing::debug!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        ?format,
        device_rate,
        channels,
        target_rate,
        "capture config"
    );

    let dispatcher = Arc::new(Mutex::new(FrameDispatcher::new(
        device_rate,
        target_rate,
        frame_samples,
        frame_tx,
        dropped.clone(),
    )));

    let built = match format {
        SampleFormat::F32 => {
            let dispatcher = dispatcher.clone();
            let dropped = dropped.clone();
            device.build_input_stream(
                &device_config,
                move |data: &[f32], _| {
                    if let Ok(mut pump) = dispatcher.try_lock() {
                        pump.push(data, channels, |sample| sample);
                    } else {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                },
                error_callback(err_tx),
                None,
            )
        }
        SampleFormat::I16 => {
            let dispatcher = dispatcher.clone();
            let dropped = dropped.clone();
            device.build_input_stream(
                &device_config,
                move |data: &[i16], _| {
                    if let Ok(mut pump) = dispatcher.try_lock() {
                        pump.push(data, channels, |sample| sample as f32 / 32_768.0);
                    } else {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                },
                error_callback(err_tx),
                None,
            )
        }
        SampleFormat::U16 => {
            let dispatcher = dispatcher.clone();
            let dropped = dropped.clone();
            device.build_input_stream(
                &device_config,
                move |data: &[u16], _| {
                    if let Ok(mut pump) = dispatcher.try_lock() {
                        pump.push(data, channels, |sample| {
                            (sample as f32 - 32_768.0) / 32_768.0
                        });
                    } else {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                },
                error_callback(err_tx),
                None,
            )
        }
        other => return Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
    };
    built.map_err(|err| AudioError::Device(format!("failed to build input stream: {err}")))
}

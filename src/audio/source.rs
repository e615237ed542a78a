//! Frame-producing capture sources.
//!
//! A source is a factory for live streams: `open` starts capture and returns a
//! [`CaptureStream`] whose frames arrive over a bounded channel; dropping or
//! stopping the stream releases the device.

use super::frame::AudioFrame;
use crate::error::AudioError;
use crate::lock::lock_or_recover;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Something that can open a microphone-like frame stream.
pub trait CaptureSource: Send + Sync {
    /// Start capturing frames of exactly `frame_samples` samples.
    fn open(&self, frame_samples: usize) -> Result<CaptureStream, AudioError>;

    /// Sample rate of the frames this source produces.
    fn sample_rate(&self) -> u32;

    fn name(&self) -> String {
        "capture".to_string()
    }
}

/// Live stream handle. Frames are owned by whoever receives them.
pub struct CaptureStream {
    receiver: Receiver<AudioFrame>,
    dropped: Arc<AtomicUsize>,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureStream {
    /// Wrap a stream whose producer runs on `worker` and exits once `stop_tx`
    /// is dropped.
    pub fn new(
        receiver: Receiver<AudioFrame>,
        dropped: Arc<AtomicUsize>,
        stop_tx: Sender<()>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            receiver,
            dropped,
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        }
    }

    /// Wait up to `timeout` for the next frame.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<AudioFrame, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Frames discarded because the consumer fell behind.
    pub fn frames_dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Release the device. Safe to call more than once.
    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.worker.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!("capture worker panicked during shutdown");
            }
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// In-memory source that replays prepared frames. Each `open` consumes the
/// next queued script; with no script left the stream stays open and silent
/// until stopped.
pub struct ScriptedSource {
    sample_rate: u32,
    scripts: Mutex<VecDeque<Script>>,
    pace: Option<Duration>,
    open_error: Mutex<Option<AudioError>>,
}

struct Script {
    frames: Vec<AudioFrame>,
    disconnect_at_end: bool,
}

impl ScriptedSource {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            scripts: Mutex::new(VecDeque::new()),
            pace: None,
            open_error: Mutex::new(None),
        }
    }

    /// Sleep between frames to mimic a real-time device.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Queue frames for the next `open`; the stream idles afterwards.
    pub fn push_script(&self, frames: Vec<AudioFrame>) {
        lock_or_recover(&self.scripts, "scripted_source.push").push_back(Script {
            frames,
            disconnect_at_end: false,
        });
    }

    /// Queue frames after which the stream disconnects, as a vanished device would.
    pub fn push_script_then_disconnect(&self, frames: Vec<AudioFrame>) {
        lock_or_recover(&self.scripts, "scripted_source.push").push_back(Script {
            frames,
            disconnect_at_end: true,
        });
    }

    /// Make the next `open` fail with `err`.
    pub fn fail_next_open(&self, err: AudioError) {
        *lock_or_recover(&self.open_error, "scripted_source.fail") = Some(err);
    }
}

impl CaptureSource for ScriptedSource {
    fn open(&self, _frame_samples: usize) -> Result<CaptureStream, AudioError> {
        if let Some(err) = lock_or_recover(&self.open_error, "scripted_source.open").take() {
            return Err(err);
        }
        let script = lock_or_recover(&self.scripts, "scripted_source.open")
            .pop_front()
            .unwrap_or(Script {
                frames: Vec::new(),
                disconnect_at_end: false,
            });
        let (frame_tx, frame_rx) = unbounded::<AudioFrame>();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let pace = self.pace;
        let worker = thread::Builder::new()
            .name("scripted-capture".to_string())
            .spawn(move || {
                for frame in script.frames {
                    if stop_rx.try_recv() != Err(crossbeam_channel::TryRecvError::Empty) {
                        return;
                    }
                    if frame_tx.send(frame).is_err() {
                        return;
                    }
                    if let Some(pace) = pace {
                        thread::sleep(pace);
                    }
                }
                if script.disconnect_at_end {
                    return;
                }
                // Hold the channel open until the consumer stops the stream.
                let _ = stop_rx.recv();
            })
            .map_err(|err| AudioError::Device(format!("failed to spawn capture thread: {err}")))?;
        Ok(CaptureStream::new(
            frame_rx,
            Arc::new(AtomicUsize::new(0)),
            stop_tx,
            worker,
        ))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_script_then_idles_until_stopped() {
        let source = ScriptedSource::new(16_000);
        source.push_script(vec![AudioFrame::filled(2, 1), AudioFrame::filled(2, 2)]);
        let mut stream = source.open(2).expect("open");
        assert_eq!(
            stream.recv_timeout(Duration::from_secs(1)).unwrap().samples(),
            &[1, 1]
        );
        assert_eq!(
            stream.recv_timeout(Duration::from_secs(1)).unwrap().samples(),
            &[2, 2]
        );
        assert_eq!(
            stream.recv_timeout(Duration::from_millis(30)),
            Err(RecvTimeoutError::Timeout)
        );
        stream.stop();
    }

    #[test]
    fn disconnecting_script_closes_channel() {
        let source = ScriptedSource::new(16_000);
        source.push_script_then_disconnect(vec![AudioFrame::filled(2, 9)]);
        let stream = source.open(2).expect("open");
        assert!(stream.recv_timeout(Duration::from_secs(1)).is_ok());
        assert_eq!(
            stream.recv_timeout(Duration::from_secs(1)),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn open_failure_is_reported_once() {
        let source = ScriptedSource::new(16_000);
        source.fail_next_open(AudioError::Device("unplugged".into()));
        assert!(source.open(2).is_err());
        assert!(source.open(2).is_ok());
    }
}

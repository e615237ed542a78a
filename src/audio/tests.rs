use super::capture::ContinuousDetector;
use super::dispatch::{append_downmixed_samples, to_pcm16, FrameDispatcher};
use super::resample::{
    adjust_frame_length, basic_resample, convert_frame_to_target, design_low_pass,
    downsampling_tap_count, low_pass_fir, resample, resample_linear,
};
use super::{
    segment_all, segment_pcm, AudioFrame, Calibration, LevelCalibrator, ScriptedSource,
    SegmentEvent, Segmenter, SegmenterConfig, StopReason, Thresholds,
};
use crate::error::AudioError;
use crossbeam_channel::{bounded, unbounded};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SPEECH: i16 = 500;

/// 10-sample frames at 1 kHz: 3 frames of trailing silence, 10 max,
/// 2 speech minimum, 3 frames of pre-roll.
fn test_config() -> SegmenterConfig {
    SegmenterConfig {
        sample_rate: 1_000,
        frame_ms: 10,
        silence_duration_ms: 30,
        max_recording_ms: 100,
        min_speech_ms: 20,
        pre_roll_ms: 30,
        calibration_ms: 50,
        poll_timeout_ms: 20,
        channel_capacity: 16,
    }
}

fn fixed_calibration() -> Calibration {
    Calibration {
        ambient_rms: Some(10.0),
        thresholds: Thresholds {
            speech: 100.0,
            silence: 100.0,
        },
        silence_lowered_from: None,
    }
}

fn frames(value: i16, count: usize) -> Vec<AudioFrame> {
    (0..count).map(|_| AudioFrame::filled(10, value)).collect()
}

fn script(parts: &[(i16, usize)]) -> Vec<AudioFrame> {
    parts
        .iter()
        .flat_map(|&(value, count)| frames(value, count))
        .collect()
}

fn segmenter_with(source: ScriptedSource, cfg: SegmenterConfig) -> Segmenter {
    Segmenter::new(Arc::new(source), cfg, LevelCalibrator::default())
}

#[test]
fn downmixes_multi_channel_audio() {
    let mut buf = Vec::new();
    let samples = [1.0f32, -1.0, 0.5, 0.5];
    append_downmixed_samples(&mut buf, &samples, 2, |sample| sample);
    assert_eq!(buf, vec![0.0, 0.5]);
}

#[test]
fn preserves_single_channel_audio() {
    let mut buf = Vec::new();
    let samples = [0.1f32, 0.2, 0.3];
    append_downmixed_samples(&mut buf, &samples, 1, |sample| sample);
    assert_eq!(buf, samples);
}

#[test]
fn append_downmixed_samples_handles_partial_frame() {
    let mut buf = Vec::new();
    append_downmixed_samples(&mut buf, &[0.2f32, 0.4, 0.6], 2, |sample| sample);
    assert_eq!(buf.len(), 2);
    assert!((buf[1] - 0.6).abs() < 1e-6);
}

#[test]
fn pcm16_conversion_clips() {
    assert_eq!(to_pcm16(2.0), i16::MAX);
    assert_eq!(to_pcm16(-2.0), -i16::MAX);
    assert_eq!(to_pcm16(0.0), 0);
}

#[test]
fn frame_dispatcher_emits_frames_and_tracks_drops() {
    let (tx, rx) = bounded(1);
    let dropped = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = FrameDispatcher::new(16_000, 16_000, 4, tx, dropped.clone());
    dispatcher.push(&[0.5f32; 8], 1, |sample| sample);
    let frame = rx.try_recv().expect("first frame");
    assert_eq!(frame.samples(), &[16_384; 4]);
    assert_eq!(dropped.load(Ordering::Relaxed), 1);
}

#[test]
fn frame_dispatcher_accumulates_partial_frames() {
    let (tx, rx) = bounded(4);
    let dropped = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = FrameDispatcher::new(16_000, 16_000, 4, tx, dropped);
    dispatcher.push(&[0.0f32; 3], 1, |sample| sample);
    assert!(rx.try_recv().is_err());
    dispatcher.push(&[0.0f32; 1], 1, |sample| sample);
    assert_eq!(rx.try_recv().expect("frame").len(), 4);
}

#[test]
fn frame_dispatcher_resamples_to_target_frame_size() {
    let (tx, rx) = bounded(4);
    let dropped = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = FrameDispatcher::new(48_000, 16_000, 160, tx, dropped);
    dispatcher.push(&[0i16; 960], 2, |sample| f32::from(sample) / 32_768.0);
    let frame = rx.try_recv().expect("frame");
    assert_eq!(frame.len(), 160);
}

#[test]
fn resample_linear_scales_length() {
    let input = vec![0.0f32, 1.0, 2.0, 3.0];
    let result = resample_linear(&input, 0.5);
    assert_eq!(result.len(), 2);
    assert!(result[0].abs() < 1e-6);
}

#[test]
fn resample_returns_input_when_rates_match() {
    let input = vec![0.1f32, 0.2, 0.3];
    assert_eq!(resample(&input, 16_000, 16_000), input);
    assert!(resample(&[], 48_000, 16_000).is_empty());
}

#[test]
fn resample_ignores_out_of_range_rates() {
    let input = vec![0.1f32, 0.2, 0.3];
    assert_eq!(resample(&input, 1_000, 16_000), input);
}

#[test]
fn basic_resample_downsamples_constant_signal() {
    let input = vec![0.5f32; 480];
    let output = basic_resample(&input, 48_000, 16_000);
    assert_eq!(output.len(), 160);
    let mid = output[80];
    assert!((mid - 0.5).abs() < 1e-3);
}

#[test]
fn basic_resample_upsamples_constant_signal() {
    let input = vec![1.0f32; 80];
    let output = basic_resample(&input, 8_000, 16_000);
    assert_eq!(output.len(), 160);
    assert!(output.iter().all(|s| (s - 1.0).abs() < 1e-5));
}

#[test]
fn downsampling_tap_count_is_odd_and_scaled() {
    let taps = downsampling_tap_count(48_000, 16_000);
    assert_eq!(taps % 2, 1);
    assert!(taps >= 11);
    assert!(downsampling_tap_count(1_600_000, 16_000) <= 129);
}

#[test]
fn design_low_pass_coeffs_are_normalized() {
    let coeffs = design_low_pass(0.2, 31);
    let sum: f32 = coeffs.iter().sum();
    assert!((sum - 1.0).abs() < 1e-4);
    assert_eq!(design_low_pass(0.2, 1), vec![1.0]);
}

#[test]
fn low_pass_fir_preserves_dc_component() {
    let input = vec![1.0f32; 200];
    let output = low_pass_fir(&input, 48_000, 16_000, 31);
    assert!((output[100] - 1.0).abs() < 1e-3);
    assert_eq!(low_pass_fir(&input, 48_000, 16_000, 1), input);
}

#[test]
fn adjust_frame_length_truncates_and_pads() {
    assert_eq!(adjust_frame_length(vec![1.0, 2.0, 3.0], 2), vec![1.0, 2.0]);
    assert_eq!(adjust_frame_length(vec![1.0], 3), vec![1.0, 1.0, 1.0]);
    assert_eq!(adjust_frame_length(Vec::new(), 2), vec![0.0, 0.0]);
}

#[test]
fn convert_frame_to_target_skips_resample_when_rates_match() {
    let frame = vec![0.1f32, 0.2, 0.3, 0.4];
    assert_eq!(convert_frame_to_target(frame.clone(), 16_000, 16_000, 4), frame);
}

#[test]
fn stop_reason_labels_are_stable() {
    assert_eq!(
        StopReason::TrailingSilence { frames: 3 }.label(),
        "trailing_silence"
    );
    assert_eq!(StopReason::MaxFrames.label(), "max_frames");
    assert_eq!(StopReason::ManualStop.label(), "manual_stop");
    assert_eq!(StopReason::Timeout.label(), "timeout");
}

#[test]
fn offline_segmentation_stops_on_trailing_silence() {
    let cfg = test_config();
    let mut samples = vec![0i16; 20];
    samples.extend(vec![SPEECH; 30]);
    samples.extend(vec![0i16; 60]);
    let result = segment_pcm(&samples, &cfg, 100.0);
    let utterance = result.utterance.expect("utterance");
    assert_eq!(utterance.frame_count(), 8);
    assert_eq!(result.metrics.speech_frames, 3);
    assert_eq!(
        result.metrics.stop_reason,
        StopReason::TrailingSilence { frames: 3 }
    );
}

#[test]
fn offline_segmentation_pads_partial_frame() {
    let cfg = test_config();
    let samples = vec![SPEECH; 25];
    let result = segment_pcm(&samples, &cfg, 100.0);
    let utterance = result.utterance.expect("utterance");
    assert_eq!(utterance.samples().len(), 30);
    assert_eq!(utterance.samples()[29], 0);
}

#[test]
fn whole_recording_splits_into_each_utterance() {
    let cfg = test_config();
    let mut samples = vec![0i16; 20];
    samples.extend(vec![SPEECH; 30]);
    samples.extend(vec![0i16; 50]);
    samples.extend(vec![SPEECH * 2; 40]);
    samples.extend(vec![0i16; 40]);
    // A lone spike is shorter than the minimum speech length.
    samples.extend(vec![SPEECH; 10]);
    samples.extend(vec![0i16; 40]);
    let utterances = segment_all(&samples, &cfg, 100.0);
    let peaks: Vec<i16> = utterances.iter().map(|u| u.peak()).collect();
    assert_eq!(peaks, [SPEECH, SPEECH * 2]);
}

#[test]
fn silent_recording_has_no_utterances() {
    assert!(segment_all(&[0i16; 500], &test_config(), 100.0).is_empty());
    assert!(segment_all(&[], &test_config(), 100.0).is_empty());
}

#[test]
fn bounded_record_returns_utterance_after_trailing_silence() {
    let source = ScriptedSource::new(1_000);
    source.push_script(script(&[(0, 2), (SPEECH, 3), (0, 3), (SPEECH, 5)]));
    let segmenter = segmenter_with(source, test_config()).with_calibration(fixed_calibration());
    let result = segmenter
        .record_with_metrics(&AtomicBool::new(false))
        .expect("record");
    let utterance = result.utterance.expect("utterance");
    assert_eq!(utterance.frame_count(), 8);
    assert_eq!(utterance.sample_rate(), 1_000);
    assert_eq!(result.metrics.frames_processed, 8);
}

#[test]
fn bounded_record_discards_too_short_speech() {
    let source = ScriptedSource::new(1_000);
    source.push_script(script(&[(0, 2), (SPEECH, 1), (0, 3)]));
    let segmenter = segmenter_with(source, test_config()).with_calibration(fixed_calibration());
    let utterance = segmenter.record(&AtomicBool::new(false)).expect("record");
    assert!(utterance.is_none());
}

#[test]
fn bounded_record_forwards_max_length_speech_once() {
    let source = ScriptedSource::new(1_000);
    source.push_script(script(&[(SPEECH, 12)]));
    let segmenter = segmenter_with(source, test_config()).with_calibration(fixed_calibration());
    let result = segmenter
        .record_with_metrics(&AtomicBool::new(false))
        .expect("record");
    assert_eq!(result.metrics.stop_reason, StopReason::MaxFrames);
    assert_eq!(result.utterance.expect("utterance").frame_count(), 10);
}

#[test]
fn bounded_record_honours_stop_flag() {
    let source = ScriptedSource::new(1_000);
    let segmenter = segmenter_with(source, test_config()).with_calibration(fixed_calibration());
    let started = Instant::now();
    let result = segmenter
        .record_with_metrics(&AtomicBool::new(true))
        .expect("record");
    assert_eq!(result.metrics.stop_reason, StopReason::ManualStop);
    assert!(result.utterance.is_none());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn bounded_record_reports_device_disconnect() {
    let source = ScriptedSource::new(1_000);
    source.push_script_then_disconnect(script(&[(SPEECH, 2)]));
    let segmenter = segmenter_with(source, test_config()).with_calibration(fixed_calibration());
    let err = segmenter
        .record(&AtomicBool::new(false))
        .expect_err("disconnect");
    assert_eq!(err, AudioError::Disconnected);
}

#[test]
fn one_second_of_silence_is_no_speech_and_keeps_threshold() {
    let cfg = SegmenterConfig {
        sample_rate: 1_000,
        frame_ms: 100,
        max_recording_ms: 1_000,
        calibration_ms: 200,
        poll_timeout_ms: 50,
        ..SegmenterConfig::default()
    };
    let source = ScriptedSource::new(1_000);
    // Calibration pass: ambient RMS 50.
    source.push_script_then_disconnect(vec![AudioFrame::new(vec![50, -50].repeat(50))]);
    source.push_script(vec![AudioFrame::filled(100, 0); 10]);
    let segmenter = segmenter_with(source, cfg);

    let before = segmenter.calibrate_if_needed().thresholds;
    assert_eq!(before.speech, 150.0);
    let utterance = segmenter.record(&AtomicBool::new(false)).expect("record");
    assert!(utterance.is_none());
    assert_eq!(segmenter.calibrate_if_needed().thresholds, before);
}

#[test]
fn calibration_failure_falls_back_to_static_threshold() {
    let source = ScriptedSource::new(1_000);
    source.fail_next_open(AudioError::Device("no mic".into()));
    let segmenter = segmenter_with(source, test_config());
    let calibration = segmenter.calibrate_if_needed();
    assert_eq!(calibration.ambient_rms, None);
    assert_eq!(calibration.thresholds.speech, 500.0);
}

#[test]
fn continuous_detector_prefixes_pre_roll() {
    let cfg = test_config();
    let mut detector = ContinuousDetector::new(&cfg, 100.0);
    let now = Instant::now();
    for value in 1..=5 {
        assert!(detector.push(AudioFrame::filled(10, value), now, None).is_none());
    }
    assert!(detector
        .push(AudioFrame::filled(10, SPEECH), now, None)
        .is_none());
    assert!(detector.is_recording());
    let expected_prefix: Vec<i16> = script(&[(4, 1), (5, 1), (SPEECH, 1)])
        .into_iter()
        .flat_map(AudioFrame::into_samples)
        .collect();

    let mut emitted = None;
    for frame in script(&[(SPEECH, 1), (0, 3)]) {
        if let Some(utterance) = detector.push(frame, now, None) {
            emitted = Some(utterance);
        }
    }
    let utterance = emitted.expect("utterance");
    assert_eq!(&utterance.samples()[..30], expected_prefix.as_slice());
    assert_eq!(utterance.frame_count(), 7);
    assert!(!detector.is_recording());
}

#[test]
fn continuous_detector_ignores_blips() {
    let cfg = test_config();
    let mut detector = ContinuousDetector::new(&cfg, 100.0);
    let now = Instant::now();
    let emitted: Vec<_> = script(&[(0, 2), (SPEECH, 1), (0, 5)])
        .into_iter()
        .filter_map(|frame| detector.push(frame, now, None))
        .collect();
    assert!(emitted.is_empty());
    assert!(!detector.is_recording());
}

#[test]
fn continuous_detector_forwards_max_length_once() {
    let cfg = test_config();
    let mut detector = ContinuousDetector::new(&cfg, 100.0);
    let now = Instant::now();
    let emitted: Vec<_> = script(&[(SPEECH, 10), (0, 4)])
        .into_iter()
        .filter_map(|frame| detector.push(frame, now, None))
        .collect();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].frame_count(), 10);
}

#[test]
fn continuous_detector_drops_audio_during_cooldown() {
    let cfg = test_config();
    let mut detector = ContinuousDetector::new(&cfg, 100.0);
    let now = Instant::now();
    let cooldown = Some(now + Duration::from_secs(60));
    assert!(detector.push(AudioFrame::filled(10, 7), now, cooldown).is_none());
    assert!(detector
        .push(AudioFrame::filled(10, SPEECH), now, cooldown)
        .is_none());
    assert!(!detector.is_recording());

    let emitted: Vec<_> = script(&[(SPEECH, 2), (0, 3)])
        .into_iter()
        .filter_map(|frame| detector.push(frame, now, None))
        .collect();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].frame_count(), 5);
    assert_eq!(emitted[0].samples()[0], SPEECH);
}

#[test]
fn continuous_listener_delivers_utterances_until_stopped() {
    let source = ScriptedSource::new(1_000).with_pace(Duration::from_millis(1));
    source.push_script(script(&[(0, 3), (SPEECH, 3), (0, 4)]));
    let segmenter = segmenter_with(source, test_config()).with_calibration(fixed_calibration());
    let (tx, rx) = unbounded();
    segmenter
        .start_continuous(Box::new(move |event| {
            let _ = tx.send(event);
        }))
        .expect("start");
    assert!(segmenter.is_continuous());

    match rx.recv_timeout(Duration::from_secs(2)).expect("event") {
        SegmentEvent::Utterance(utterance) => assert_eq!(utterance.frame_count(), 8),
        other => panic!("unexpected event {other:?}"),
    }
    segmenter.stop_continuous();
    assert!(!segmenter.is_continuous());
}

#[test]
fn continuous_listener_reports_disconnect_without_retry() {
    let source = ScriptedSource::new(1_000);
    source.push_script_then_disconnect(Vec::new());
    let segmenter = segmenter_with(source, test_config()).with_calibration(fixed_calibration());
    let (tx, rx) = unbounded();
    segmenter
        .start_continuous(Box::new(move |event| {
            let _ = tx.send(event);
        }))
        .expect("start");
    match rx.recv_timeout(Duration::from_secs(2)).expect("event") {
        SegmentEvent::Failed(err) => assert_eq!(err, AudioError::Disconnected),
        other => panic!("unexpected event {other:?}"),
    }
    let deadline = Instant::now() + Duration::from_secs(2);
    while segmenter.is_continuous() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!segmenter.is_continuous());
}

//! WAV decoding for synthesized replies and recorded input files.

use super::dispatch::append_downmixed_samples;
use super::playback::DecodedAudio;
use super::resample::resample;
use crate::error::AudioError;
use std::io::{Cursor, Read};
use std::path::Path;

/// Decode an in-memory WAV into mono float samples at its own rate.
pub(super) fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, AudioError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|err| AudioError::InvalidData(format!("bad WAV data: {err}")))?;
    decode_reader(reader)
}

/// Load a WAV file as mono PCM16 at `sample_rate`, the shape the
/// segmenter expects from a capture device.
pub fn read_wav_file(path: &Path, sample_rate: u32) -> Result<Vec<i16>, AudioError> {
    let reader = hound::WavReader::open(path).map_err(|err| {
        AudioError::InvalidData(format!("failed to read '{}': {err}", path.display()))
    })?;
    let decoded = decode_reader(reader)?;
    tracing::debug!(
        path = %path.display(),
        source_rate = decoded.sample_rate,
        samples = decoded.samples.len(),
        "decoded input WAV"
    );
    let samples = resample(&decoded.samples, decoded.sample_rate, sample_rate);
    Ok(samples
        .into_iter()
        .map(|sample| (sample.clamp(-1.0, 1.0) * 32_767.0) as i16)
        .collect())
}

fn decode_reader<R: Read>(mut reader: hound::WavReader<R>) -> Result<DecodedAudio, AudioError> {
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|err| AudioError::InvalidData(err.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|err| AudioError::InvalidData(err.to_string()))?
        }
    };
    let channels = usize::from(spec.channels.max(1));
    let mut samples = Vec::with_capacity(interleaved.len() / channels);
    append_downmixed_samples(&mut samples, &interleaved, channels, |s| s);
    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

use std::time::Duration;

/// Root-mean-square energy of signed 16-bit samples, in raw sample units.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (energy / samples.len() as f64).sqrt() as f32
}

/// Fixed-length block of mono PCM16 samples produced by a capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// A frame of `len` identical samples; handy for synthetic input.
    pub fn filled(len: usize, value: i16) -> Self {
        Self {
            samples: vec![value; len],
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// Concatenated frames judged to contain one spoken command.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    samples: Vec<i16>,
    sample_rate: u32,
    frame_count: usize,
}

impl Utterance {
    pub fn from_frames<I>(frames: I, sample_rate: u32) -> Self
    where
        I: IntoIterator<Item = AudioFrame>,
    {
        let mut samples = Vec::new();
        let mut frame_count = 0usize;
        for frame in frames {
            samples.extend(frame.into_samples());
            frame_count += 1;
        }
        Self {
            samples,
            sample_rate,
            frame_count,
        }
    }

    /// Wrap caller-supplied audio (e.g. a file) that bypassed segmentation.
    pub fn from_samples(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            frame_count: 0,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of capture frames the utterance was built from (0 when supplied directly).
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }

    pub fn peak(&self) -> i16 {
        self.samples
            .iter()
            .map(|s| s.saturating_abs())
            .max()
            .unwrap_or(0)
    }

    /// Little-endian PCM16 bytes, the wire format handed to recognizers.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

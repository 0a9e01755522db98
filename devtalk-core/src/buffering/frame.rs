//! Fixed-size capture frame assembly.

/// One capture frame: mono f32 samples in [-1.0, 1.0] at the capture rate.
///
/// Produced once per `frame_size` samples by [`FrameAssembler`] and handed to
/// the capture pipeline for a single encode; never retained afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// A frame of `len` zero samples.
    pub fn silent(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Root-mean-square level of the frame. Zero for an empty frame.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }
}

/// Accumulates arbitrarily sized sample runs into frames of exactly
/// `frame_size` samples.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        Self {
            frame_size: frame_size.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_size.max(1) * 2),
        }
    }

    pub fn push(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.pending.len() < self.frame_size {
            return None;
        }
        let rest = self.pending.split_off(self.frame_size);
        let samples = std::mem::replace(&mut self.pending, rest);
        Some(AudioFrame::new(samples, self.sample_rate))
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

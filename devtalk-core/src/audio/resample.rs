//! Fixed-ratio sample-rate conversion with rubato.
//!
//! Devices run at whatever rate the OS mixer picked (44.1 / 48 kHz are
//! typical) while the live endpoint speaks 16 kHz in and 24 kHz out.
//! `RateConverter` bridges both directions on worker threads, never inside a
//! device callback.
//!
//! Equal rates short-circuit to a copy; no rubato session is built.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{Result, TutorError};

/// Converts mono f32 audio from `from_rate` to `to_rate`.
pub struct RateConverter {
    resampler: Option<FastFixedIn<f32>>,
    from_rate: u32,
    to_rate: u32,
    /// Input carried over until a full rubato block is available.
    carry: Vec<f32>,
    block: usize,
    scratch: Vec<Vec<f32>>,
}

impl RateConverter {
    /// `block` is the number of input frames rubato consumes per call.
    ///
    /// # Errors
    /// `TutorError::AudioStream` if rubato rejects the ratio or block size.
    pub fn new(from_rate: u32, to_rate: u32, block: usize) -> Result<Self> {
        let block = block.max(1);
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                from_rate,
                to_rate,
                carry: Vec::new(),
                block,
                scratch: Vec::new(),
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            to_rate as f64 / from_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            block,
            1,
        )
        .map_err(|e| TutorError::AudioStream(format!("resampler init: {e}")))?;

        let scratch = vec![vec![0f32; resampler.output_frames_max()]; 1];
        debug!(from_rate, to_rate, block, "rate converter ready");

        Ok(Self {
            resampler: Some(resampler),
            from_rate,
            to_rate,
            carry: Vec::with_capacity(block * 2),
            block,
            scratch,
        })
    }

    /// Append converted output for `samples` to `out`. Returns the number of
    /// samples appended (zero while a partial block is being carried).
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<f32>) -> usize {
        let Some(resampler) = self.resampler.as_mut() else {
            out.extend_from_slice(samples);
            return samples.len();
        };

        self.carry.extend_from_slice(samples);
        let before = out.len();
        let mut offset = 0;
        while self.carry.len() - offset >= self.block {
            let input = &self.carry[offset..offset + self.block];
            match resampler.process_into_buffer(&[input], &mut self.scratch, None) {
                Ok((_, produced)) => out.extend_from_slice(&self.scratch[0][..produced]),
                Err(e) => error!("resampler process error: {e}"),
            }
            offset += self.block;
        }
        self.carry.drain(..offset);
        out.len() - before
    }

    /// Convenience wrapper around [`process_into`](Self::process_into).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        self.process_into(samples, &mut out);
        out
    }

    /// Drop carried input and rubato's internal delay line.
    pub fn reset(&mut self) {
        self.carry.clear();
        if let Some(r) = self.resampler.as_mut() {
            r.reset();
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Approximate output samples produced per input block.
    pub fn output_per_block(&self) -> usize {
        (self.block as u64 * self.to_rate as u64 / self.from_rate.max(1) as u64) as usize
    }
}

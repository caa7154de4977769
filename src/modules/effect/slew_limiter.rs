//! Slew rate limiter effect

use dasp_graph::Buffer;

use crate::module::{BlockContext, Inputs, Module};

/// A stereo slew rate limiter that smooths sudden changes in a signal
///
/// Useful for:
/// - Smoothing control voltages
/// - Creating portamento/glide effects
/// - Reducing harsh transients
pub struct SlewLimiter {
    /// Maximum change per sample
    rate: f32,
    /// Last output value per channel
    last: [f32; 2],
    /// Rate in units per second, converted once the sample rate is known
    rate_per_second: Option<f32>,
}

impl SlewLimiter {
    /// Maximum change per sample
    pub const RATE: u32 = 0;
    /// Maximum change per second
    pub const RATE_PER_SECOND: u32 = 1;

    /// Create a new slew limiter with the given rate per sample
    ///
    /// A rate of 1.0 means the signal can change by at most 1.0 per sample.
    /// Lower values = more smoothing.
    pub fn new(rate: f32) -> Self {
        Self {
            rate: rate.abs(),
            last: [0.0; 2],
            rate_per_second: None,
        }
    }

    /// Create with a rate specified in units per second
    ///
    /// For example, `from_rate_per_second(1000.0)` at 48kHz means
    /// the signal can change by ~0.02 per sample.
    pub fn from_rate_per_second(rate: f32) -> Self {
        Self {
            rate: 0.0,
            last: [0.0; 2],
            rate_per_second: Some(rate.abs()),
        }
    }

    #[inline]
    pub fn rate(&self) -> f32 {
        self.rate
    }
}

impl Module for SlewLimiter {
    fn process(&mut self, ctx: &BlockContext, inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        if let Some(rps) = self.rate_per_second {
            self.rate = rps / ctx.sample_rate as f32;
        }
        let max_delta = self.rate;

        for ((out_buffer, last), ch) in outputs.iter_mut().zip(self.last.iter_mut()).zip(0..) {
            let Some(in_buffer) = inputs.get(ch) else {
                continue;
            };
            for (out_sample, &in_sample) in out_buffer.iter_mut().zip(in_buffer.iter()) {
                *last += (in_sample - *last).clamp(-max_delta, max_delta);
                *out_sample = *last;
            }
        }
    }

    fn set_param(&mut self, param: u32, value: f32) {
        match param {
            Self::RATE => {
                self.rate = value.abs();
                self.rate_per_second = None;
            }
            Self::RATE_PER_SECOND => self.rate_per_second = Some(value.abs()),
            _ => {}
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        2
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        2
    }
}

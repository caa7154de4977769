//! Gain/volume control effect

use dasp_graph::Buffer;

use crate::module::{BlockContext, Inputs, Module};

/// A stereo gain (volume) control with click-free smoothing.
///
/// Input channel `n` maps to output channel `n`.
pub struct Gain {
    gain: f32,
    /// Smoothing to prevent clicks on rapid gain changes
    smoothed_gain: f32,
    /// Smoothing coefficient (0.0 = instant, 1.0 = no change)
    smooth_coeff: f32,
}

impl Gain {
    /// Gain multiplier (1.0 = unity, 0.0 = silence)
    pub const GAIN: u32 = 0;

    /// Create a new gain module with the specified gain value
    pub fn new(gain: f32) -> Self {
        Self {
            gain,
            smoothed_gain: gain,
            smooth_coeff: 0.995, // ~7ms at 48kHz
        }
    }

    /// Set the smoothing time in milliseconds
    pub fn with_smoothing_ms(mut self, ms: f32, sample_rate: u32) -> Self {
        // Time constant: after `ms` milliseconds, we've reached ~63% of target
        let samples = (ms / 1000.0) * sample_rate as f32;
        self.smooth_coeff = (-1.0 / samples).exp();
        self
    }

    /// Disable smoothing for instant gain changes
    pub fn without_smoothing(mut self) -> Self {
        self.smooth_coeff = 0.0;
        self
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl Module for Gain {
    fn process(&mut self, _ctx: &BlockContext, inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        let smooth_coeff = self.smooth_coeff;
        let target_gain = self.gain;
        let mut current_gain = self.smoothed_gain;

        for (ch, out_buffer) in outputs.iter_mut().enumerate() {
            let Some(in_buffer) = inputs.get(ch) else {
                out_buffer.silence();
                continue;
            };

            // Every channel starts from the same smoothed value so they track together
            let mut gain = self.smoothed_gain;
            for (out_sample, &in_sample) in out_buffer.iter_mut().zip(in_buffer.iter()) {
                gain = target_gain + smooth_coeff * (gain - target_gain);
                *out_sample = in_sample * gain;
            }

            if ch == 0 {
                current_gain = gain;
            }
        }

        self.smoothed_gain = current_gain;
    }

    fn set_param(&mut self, param: u32, value: f32) {
        if param == Self::GAIN {
            self.gain = value;
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

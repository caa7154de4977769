//! Sine wave oscillator

use dasp_graph::Buffer;

use crate::module::{BlockContext, Inputs, Module};

/// A sine wave oscillator (mono source)
pub struct Sine {
    frequency: f32,
    phase: f32,
    amplitude: f32,
}

impl Sine {
    /// Frequency in Hz
    pub const FREQUENCY: u32 = 0;
    /// Output amplitude (0.0 - 1.0)
    pub const AMPLITUDE: u32 = 1;

    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            phase: 0.0,
            amplitude: 0.25, // -12dB, safe default
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    #[inline]
    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }
}

impl Module for Sine {
    fn process(&mut self, ctx: &BlockContext, _inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        let Some((first, rest)) = outputs.split_first_mut() else {
            return;
        };

        let phase_inc = self.frequency / ctx.sample_rate as f32;
        let amplitude = self.amplitude;

        for sample in first.iter_mut() {
            *sample = (self.phase * core::f32::consts::TAU).sin() * amplitude;

            self.phase += phase_inc;
            // Branchless phase wrap (phase is always positive)
            self.phase -= (self.phase >= 1.0) as u32 as f32;
        }

        for buffer in rest.iter_mut() {
            buffer.copy_from_slice(first);
        }
    }

    fn set_param(&mut self, param: u32, value: f32) {
        match param {
            Self::FREQUENCY => self.frequency = value.max(0.0),
            Self::AMPLITUDE => self.amplitude = value.clamp(0.0, 1.0),
            _ => {}
        }
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        1
    }
}

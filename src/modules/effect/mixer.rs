//! Mixer effect - sums multiple inputs together

use alloc::vec;
use alloc::vec::Vec;

use dasp_graph::Buffer;

use crate::module::{BlockContext, Inputs, Module};

/// Sums `sources` multichannel inputs into one multichannel output.
///
/// Input `source * channels + ch` feeds output `ch`. Parameter `n` is the
/// level of source `n`.
pub struct Mixer {
    channels: usize,
    levels: Vec<f32>,
}

impl Mixer {
    /// Create a mixer for `sources` inputs of `channels` channels each
    pub fn new(sources: usize, channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            levels: vec![1.0; sources],
        }
    }

    /// Create a stereo mixer
    pub fn stereo(sources: usize) -> Self {
        Self::new(sources, 2)
    }

    /// Create a mono mixer
    pub fn mono(sources: usize) -> Self {
        Self::new(sources, 1)
    }

    pub fn level(&self, source: usize) -> Option<f32> {
        self.levels.get(source).copied()
    }
}

impl Module for Mixer {
    fn process(&mut self, _ctx: &BlockContext, inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        outputs.iter_mut().for_each(Buffer::silence);

        for (source, &level) in self.levels.iter().enumerate() {
            if level == 0.0 {
                continue;
            }
            for (ch, out_buf) in outputs.iter_mut().enumerate() {
                let input = source * self.channels + ch;
                if !inputs.is_connected(input) {
                    continue;
                }
                let Some(in_buf) = inputs.get(input) else {
                    continue;
                };
                for (out_sample, in_sample) in out_buf.iter_mut().zip(in_buf.iter()) {
                    *out_sample += *in_sample * level;
                }
            }
        }
    }

    fn set_param(&mut self, param: u32, value: f32) {
        if let Some(level) = self.levels.get_mut(param as usize) {
            *level = value.max(0.0);
        }
    }

    fn num_inputs(&self) -> usize {
        self.levels.len() * self.channels
    }

    fn num_outputs(&self) -> usize {
        self.channels
    }
}

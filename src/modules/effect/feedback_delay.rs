//! Feedback junction for patch-level delay loops

use dasp_graph::Buffer;

use crate::module::{BlockContext, Inputs, Module};

/// Mixes a dry signal with an attenuated feedback return.
///
/// Input 0 is the dry signal, input 1 the return. A cable that closes a loop
/// into this module is read one block late, so a loop through it behaves as
/// a [`BLOCK_SIZE`](crate::BLOCK_SIZE)-sample echo whose decay is set by
/// [`FEEDBACK`](Self::FEEDBACK).
pub struct FeedbackDelay {
    feedback: f32,
}

impl FeedbackDelay {
    /// Return level (0.0 - 0.99)
    pub const FEEDBACK: u32 = 0;

    pub fn new(feedback: f32) -> Self {
        Self {
            feedback: feedback.clamp(0.0, 0.99),
        }
    }

    #[inline]
    pub fn feedback(&self) -> f32 {
        self.feedback
    }
}

impl Module for FeedbackDelay {
    fn process(&mut self, _ctx: &BlockContext, inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        let Some(out) = outputs.first_mut() else {
            return;
        };
        out.silence();

        if let Some(dry) = inputs.get(0) {
            out.iter_mut().zip(dry.iter()).for_each(|(o, d)| *o += d);
        }
        if let Some(ret) = inputs.get(1) {
            let feedback = self.feedback;
            out.iter_mut()
                .zip(ret.iter())
                .for_each(|(o, r)| *o += r * feedback);
        }
    }

    fn set_param(&mut self, param: u32, value: f32) {
        if param == Self::FEEDBACK {
            self.feedback = value.clamp(0.0, 0.99);
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        2
    }

    fn tolerates_feedback(&self) -> bool {
        true
    }
}

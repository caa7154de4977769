//! Core module trait and context types.

use dasp_graph::Buffer;

use crate::topology::LogicalId;
use crate::transport::TransportState;

/// Information available during block processing.
///
/// Built by the [`Renderer`](crate::Renderer) on its own stack for every block
/// and passed to every [`Module::process`] call. It replaces any ambient global
/// transport state: modules read tempo and position from here.
#[derive(Clone, Copy, Debug)]
pub struct BlockContext {
    /// Sample rate of the rack in Hz
    pub sample_rate: u32,
    /// Number of samples per buffer (always [`BLOCK_SIZE`](crate::BLOCK_SIZE))
    pub block_size: usize,
    /// Transport state at the first sample of this block
    pub transport: TransportState,
    /// Logical ID of the module being processed
    pub module: LogicalId,
}

/// Input buffers for one module, with per-channel connectivity.
///
/// Every declared input channel has a buffer. Unconnected channels are silent;
/// modules that switch between manual and CV-driven behaviour should check
/// [`is_connected`](Self::is_connected) rather than testing for silence.
pub struct Inputs<'a> {
    buffers: &'a [Buffer],
    connected: &'a [bool],
}

impl<'a> Inputs<'a> {
    pub fn new(buffers: &'a [Buffer], connected: &'a [bool]) -> Self {
        Self { buffers, connected }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    #[inline]
    pub fn get(&self, channel: usize) -> Option<&'a Buffer> {
        self.buffers.get(channel)
    }

    /// Whether anything in the current patch feeds this input channel.
    #[inline]
    pub fn is_connected(&self, channel: usize) -> bool {
        self.connected.get(channel).copied().unwrap_or(false)
    }

    pub fn buffers(&self) -> &'a [Buffer] {
        self.buffers
    }
}

/// A note event routed to a polyphonic module by the voice manager.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VoiceEvent {
    /// Start `note` on voice slot `voice`
    NoteOn { voice: usize, note: u8, velocity: f32 },
    /// Stop whatever voice slot `voice` is playing
    NoteOff { voice: usize, note: u8 },
    /// Silence every voice (the bank was resized)
    AllOff,
}

/// Playback position reported by modules that can drive the transport.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimelinePosition {
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub active: bool,
}

/// The core trait for rack modules.
///
/// A module turns one block of input buffers into one block of output
/// buffers. `process` runs on the audio thread, so it must not allocate,
/// lock, or block. Construction happens on the control thread.
///
/// # Parameters
///
/// Parameter edits arrive through [`set_param`](Self::set_param), called on the
/// audio thread just before `process` with every change queued since the last
/// block.
///
/// ```
/// use dasp_graph::Buffer;
/// use klingt_rack::{BlockContext, Inputs, Module};
///
/// struct Offset {
///     amount: f32,
/// }
///
/// impl Module for Offset {
///     fn process(&mut self, _ctx: &BlockContext, inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
///         let input = inputs.get(0);
///         for (i, sample) in outputs[0].iter_mut().enumerate() {
///             *sample = input.map_or(0.0, |b| b[i]) + self.amount;
///         }
///     }
///
///     fn set_param(&mut self, _param: u32, value: f32) {
///         self.amount = value;
///     }
///
///     fn num_inputs(&self) -> usize { 1 }
/// }
/// ```
pub trait Module: Send + 'static {
    /// Process one block.
    ///
    /// `inputs` has exactly [`num_inputs`](Self::num_inputs) buffers and
    /// `outputs` exactly [`num_outputs`](Self::num_outputs).
    fn process(&mut self, ctx: &BlockContext, inputs: &Inputs<'_>, outputs: &mut [Buffer]);

    /// Apply a parameter change.
    fn set_param(&mut self, _param: u32, _value: f32) {}

    /// Number of input channels (0 for sources).
    fn num_inputs(&self) -> usize {
        0
    }

    /// Number of output channels.
    fn num_outputs(&self) -> usize {
        1
    }

    /// Whether an input of this module may close a cycle.
    ///
    /// Such an edge is read with one block of delay.
    fn tolerates_feedback(&self) -> bool {
        false
    }

    /// Whether this module receives [`VoiceEvent`]s.
    fn is_polyphonic(&self) -> bool {
        false
    }

    fn voice_event(&mut self, _event: VoiceEvent) {}

    /// Current playback position, for modules that can act as timeline master.
    fn timeline(&self) -> Option<TimelinePosition> {
        None
    }
}

//! Per-slot runtime state shared between the topology store and active sets.

use alloc::boxed::Box;
use alloc::vec::Vec;

use dasp_graph::Buffer;
use parking_lot::{Mutex, MutexGuard};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::module::{BlockContext, Inputs, Module, VoiceEvent};

/// A queued parameter change for one module.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParamChange {
    pub param: u32,
    pub value: f32,
}

/// The module plus the buffers the audio thread needs around it.
///
/// Output buffers persist between blocks, which is what makes a delayed
/// (feedback) edge read the previous block's output. `history` holds the
/// outputs as they were before the current block ran, for delayed edges
/// whose source is ordered before their destination.
pub(crate) struct ModuleCell {
    module: Box<dyn Module>,
    pub(crate) inputs: Vec<Buffer>,
    pub(crate) outputs: Vec<Buffer>,
    pub(crate) history: Vec<Buffer>,
    params: Consumer<ParamChange>,
}

impl ModuleCell {
    /// Zero every input buffer before routes are summed in.
    pub(crate) fn clear_inputs(&mut self) {
        for buffer in self.inputs.iter_mut() {
            buffer.silence();
        }
    }

    /// Sum `buffer` into input `channel`.
    #[inline]
    pub(crate) fn add_input(&mut self, channel: usize, buffer: &Buffer) {
        if let Some(input) = self.inputs.get_mut(channel) {
            input.iter_mut().zip(buffer.iter()).for_each(|(i, s)| *i += s);
        }
    }

    /// Sum this module's own last output into one of its inputs (self-loop).
    pub(crate) fn add_own_output(&mut self, src_channel: usize, dst_channel: usize) {
        let (Some(output), Some(input)) =
            (self.outputs.get(src_channel), self.inputs.get_mut(dst_channel))
        else {
            return;
        };
        input.iter_mut().zip(output.iter()).for_each(|(i, s)| *i += s);
    }

    /// Output `channel`, either as just produced or as of the previous block.
    #[inline]
    pub(crate) fn output(&self, channel: usize, previous: bool) -> Option<&Buffer> {
        if previous {
            self.history.get(channel)
        } else {
            self.outputs.get(channel)
        }
    }

    /// Drain pending parameter changes, then process one block.
    pub(crate) fn run(&mut self, ctx: &BlockContext, connected: &[bool], keep_history: bool) {
        if keep_history {
            self.history.clone_from_slice(&self.outputs);
        }

        let params = &mut self.params;
        let module = &mut self.module;

        while let Ok(change) = params.pop() {
            module.set_param(change.param, change.value);
        }

        let inputs = Inputs::new(&self.inputs, connected);
        module.process(ctx, &inputs, &mut self.outputs);
    }

    pub(crate) fn voice_event(&mut self, event: VoiceEvent) {
        self.module.voice_event(event);
    }

    pub(crate) fn module(&self) -> &dyn Module {
        &*self.module
    }
}

/// Shared owner of a [`ModuleCell`].
///
/// Only the audio thread ever locks the cell (always with `try_lock`), so the
/// lock is uncontended. The control thread only creates and drops it.
pub(crate) struct SlotRuntime {
    cell: Mutex<ModuleCell>,
}

impl SlotRuntime {
    /// Wrap a module, preallocating its buffers and parameter queue.
    pub(crate) fn new(
        module: Box<dyn Module>,
        queue_capacity: usize,
    ) -> (Self, Producer<ParamChange>) {
        let (producer, consumer) = RingBuffer::new(queue_capacity);
        let inputs = (0..module.num_inputs()).map(|_| Buffer::SILENT).collect();
        let outputs: Vec<Buffer> = (0..module.num_outputs()).map(|_| Buffer::SILENT).collect();
        let cell = ModuleCell {
            module,
            inputs,
            history: outputs.clone(),
            outputs,
            params: consumer,
        };
        (
            Self {
                cell: Mutex::new(cell),
            },
            producer,
        )
    }

    #[inline]
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, ModuleCell>> {
        self.cell.try_lock()
    }
}

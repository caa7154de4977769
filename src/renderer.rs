//! The audio-thread half of a rack.
//!
//! A [`Renderer`] owns everything the audio callback touches: the snapshot
//! reader, the transport clock, the voice manager, and the note queue. It
//! shares nothing with the control thread except lock-free queues, atomics,
//! and the published [`ActiveSet`].
//!
//! Nothing in here allocates, frees, logs, or waits once constructed.

use alloc::sync::Arc;
use alloc::vec::Vec;

use dasp_graph::Buffer;
use rtrb::Consumer;

use crate::active_set::{ActiveSet, SnapshotReader};
use crate::module::{BlockContext, VoiceEvent};
use crate::topology::LogicalId;
use crate::transport::TransportClock;
use crate::voice::{NoteEvent, VoiceCommand, VoiceEndpoint};
use crate::BLOCK_SIZE;

/// Renders the rack one block at a time. Move it into the audio callback.
pub struct Renderer {
    reader: SnapshotReader,
    clock: TransportClock,
    voices: VoiceEndpoint,
    notes: Consumer<NoteEvent>,
    sample_rate: u32,
    /// Main bus used by [`render_interleaved`](Self::render_interleaved)
    bus: Vec<Buffer>,
    /// Frames of `bus` already handed out
    cursor: usize,
    /// Epoch of the snapshot the voice bank was last checked against
    epoch: u64,
}

impl Renderer {
    pub(crate) fn new(
        reader: SnapshotReader,
        clock: TransportClock,
        voices: VoiceEndpoint,
        notes: Consumer<NoteEvent>,
        sample_rate: u32,
        output_channels: usize,
    ) -> Self {
        let epoch = reader.current().epoch();
        Self {
            reader,
            clock,
            voices,
            notes,
            sample_rate,
            bus: (0..output_channels).map(|_| Buffer::SILENT).collect(),
            cursor: BLOCK_SIZE,
            epoch,
        }
    }

    /// The snapshot used by the most recent block.
    pub fn active_set(&self) -> &Arc<ActiveSet> {
        self.reader.current()
    }

    /// Channels on the main output bus.
    pub fn output_channels(&self) -> usize {
        self.bus.len()
    }

    /// Render one block.
    ///
    /// `hardware_in` holds one buffer per hardware input channel (may be
    /// empty). `output` receives the main bus; extra buffers stay silent.
    pub fn process(&mut self, hardware_in: &[Buffer], output: &mut [Buffer]) {
        output.iter_mut().for_each(Buffer::silence);

        let set = Arc::clone(self.reader.acquire());
        let transport = self.clock.begin_block();

        if set.epoch() != self.epoch {
            self.epoch = set.epoch();
            self.voices.manager.release_orphans(|id| set.contains(id));
        }
        self.apply_voice_commands(&set);
        self.dispatch_notes(&set);

        let mut master_seconds = None;

        for (index, entry) in set.entries.iter().enumerate() {
            if entry.muted {
                continue;
            }
            // Only this thread locks module cells, so this never fails in practice
            let Some(mut cell) = entry.runtime.try_lock() else {
                continue;
            };

            cell.clear_inputs();
            for route in &entry.routes {
                if route.src == index {
                    cell.add_own_output(route.src_channel, route.dst_channel);
                    continue;
                }
                let Some(src) = set.entries.get(route.src) else {
                    continue;
                };
                if let Some(src_cell) = src.runtime.try_lock() {
                    if let Some(buffer) = src_cell.output(route.src_channel, route.from_history) {
                        cell.add_input(route.dst_channel, buffer);
                    }
                }
            }
            for (channel, &hardware) in entry.input_mapping.iter().enumerate() {
                if let Some(buffer) = hardware_in.get(hardware) {
                    cell.add_input(channel, buffer);
                }
            }

            let ctx = BlockContext {
                sample_rate: self.sample_rate,
                block_size: BLOCK_SIZE,
                transport,
                module: entry.id,
            };
            cell.run(&ctx, &entry.connected, entry.keeps_history);

            if self.clock.is_timeline_master(entry.id) {
                if let Some(timeline) = cell.module().timeline().filter(|t| t.active) {
                    master_seconds = Some(timeline.position_seconds);
                }
            }

            for route in &entry.bus_routes {
                if let (Some(out), Some(src)) =
                    (output.get_mut(route.bus_channel), cell.outputs.get(route.src_channel))
                {
                    out.iter_mut().zip(src.iter()).for_each(|(o, s)| *o += s);
                }
            }
        }

        self.clock.end_block(BLOCK_SIZE, master_seconds);
        self.voices.board.publish(&self.voices.manager);

        // `set` is a clone of the reader's reference, never the last one
        drop(set);
    }

    /// Fill an interleaved host buffer of any length from fixed-size blocks.
    ///
    /// Bus channels beyond `channels` are dropped; host channels beyond the
    /// bus are written as silence.
    pub fn render_interleaved(&mut self, data: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        for frame in data.chunks_mut(channels) {
            if self.cursor >= BLOCK_SIZE {
                let mut bus = core::mem::take(&mut self.bus);
                self.process(&[], &mut bus);
                self.bus = bus;
                self.cursor = 0;
            }
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = self.bus.get(ch).map_or(0.0, |b| b[self.cursor]);
            }
            self.cursor += 1;
        }
    }

    fn apply_voice_commands(&mut self, set: &ActiveSet) {
        while let Ok(command) = self.voices.commands.pop() {
            match command {
                VoiceCommand::Resize(max_voices) => {
                    self.voices.manager.set_max_voices(max_voices);
                    for entry in set.entries.iter().filter(|e| e.polyphonic) {
                        if let Some(mut cell) = entry.runtime.try_lock() {
                            cell.voice_event(VoiceEvent::AllOff);
                        }
                    }
                }
            }
        }
    }

    fn dispatch_notes(&mut self, set: &ActiveSet) {
        while let Ok(event) = self.notes.pop() {
            if !self.voices.board.is_enabled() {
                continue;
            }
            match event {
                NoteEvent::On {
                    target,
                    note,
                    velocity,
                } => {
                    if !is_polyphonic_target(set, target) {
                        continue;
                    }
                    let Some(assignment) = self.voices.manager.note_on(note, velocity, target)
                    else {
                        continue;
                    };
                    if let Some(stolen) = assignment.stolen {
                        if let Some(previous) = stolen.target_module {
                            send_voice_event(
                                set,
                                previous,
                                VoiceEvent::NoteOff {
                                    voice: assignment.voice,
                                    note: stolen.note_number,
                                },
                            );
                        }
                    }
                    send_voice_event(
                        set,
                        target,
                        VoiceEvent::NoteOn {
                            voice: assignment.voice,
                            note,
                            velocity,
                        },
                    );
                }
                NoteEvent::Off { target, note } => {
                    // Released even if the target is muted or gone
                    if let Some((voice, _)) = self.voices.manager.note_off(note, target) {
                        send_voice_event(set, target, VoiceEvent::NoteOff { voice, note });
                    }
                }
            }
        }
    }
}

fn is_polyphonic_target(set: &ActiveSet, id: LogicalId) -> bool {
    set.position(id)
        .and_then(|i| set.entries.get(i))
        .is_some_and(|e| e.polyphonic && !e.muted)
}

fn send_voice_event(set: &ActiveSet, id: LogicalId, event: VoiceEvent) {
    let Some(entry) = set.position(id).and_then(|i| set.entries.get(i)) else {
        return;
    };
    if let Some(mut cell) = entry.runtime.try_lock() {
        cell.voice_event(event);
    }
}

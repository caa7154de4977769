//! Rack - the control-thread API.
//!
//! Every structural edit goes through [`Rack`]. Edits land in the topology
//! store immediately but only reach the audio thread on
//! [`commit_changes`](Rack::commit_changes) (or the bulk edits that commit
//! implicitly), which rebuilds the execution order and publishes a fresh
//! [`ActiveSet`].
//!
//! The store lives behind a mutex so a `Rack` can be shared between control
//! threads. The audio thread never takes that mutex; its only view of the
//! patch is the published snapshot.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use parking_lot::Mutex;
use rtrb::{Producer, RingBuffer};
use tracing::{debug, trace, warn};

use crate::active_set::{self, ActiveSet, Publisher};
use crate::config::RackConfig;
use crate::module::Module;
use crate::registry::ModuleRegistry;
use crate::renderer::Renderer;
use crate::state::{ModuleState, ParamValue, PatchState};
use crate::topology::{Connection, LogicalId, ModuleInfo, RuntimeHandle, TopologyStore};
use crate::transport::TransportHandle;
use crate::voice::{NoteEvent, Voice, VoiceControl};
use crate::{PatchError, Result};

struct ControlState {
    store: TopologyStore,
    publisher: Publisher,
}

/// A modular patch: modules, cables, transport, and voices.
///
/// Create one with [`Rack::new`], which also returns the [`Renderer`] to
/// move onto the audio thread.
///
/// ```
/// use klingt_rack::{LogicalId, Rack, RackConfig};
///
/// let (rack, mut renderer) = Rack::with_builtins(RackConfig::default()).unwrap();
/// let osc = rack.add_module("sine").unwrap();
/// let amp = rack.add_module("gain").unwrap();
/// rack.connect(osc, 0, amp, 0).unwrap();
/// rack.connect(amp, 0, LogicalId::MAIN_OUTPUT, 0).unwrap();
/// rack.commit_changes().unwrap();
///
/// let mut out = vec![0.0f32; 256 * 2];
/// renderer.render_interleaved(&mut out, 2);
/// ```
pub struct Rack {
    config: RackConfig,
    registry: ModuleRegistry,
    control: Mutex<ControlState>,
    transport: TransportHandle,
    voices: VoiceControl,
    notes: Mutex<Producer<NoteEvent>>,
}

impl Rack {
    /// Create a rack and its renderer.
    pub fn new(config: RackConfig, registry: ModuleRegistry) -> Result<(Self, Renderer)> {
        config.validate()?;

        let store = TopologyStore::new(
            config.input_channels,
            config.output_channels,
            config.param_queue_capacity,
        );
        let (publisher, reader) = active_set::channel(config.retire_queue_capacity);
        let transport = TransportHandle::new(
            config.sample_rate,
            config.initial_bpm,
            *config.bpm_range.start(),
            *config.bpm_range.end(),
        );
        let (voices, endpoint) = VoiceControl::new(config.max_voices, config.voice_capacity);
        let (notes_tx, notes_rx) = RingBuffer::new(config.note_queue_capacity);

        let renderer = Renderer::new(
            reader,
            transport.clock(),
            endpoint,
            notes_rx,
            config.sample_rate,
            config.output_channels,
        );

        debug!(
            sample_rate = config.sample_rate,
            outputs = config.output_channels,
            "rack created"
        );

        let rack = Self {
            config,
            registry,
            control: Mutex::new(ControlState { store, publisher }),
            transport,
            voices,
            notes: Mutex::new(notes_tx),
        };
        Ok((rack, renderer))
    }

    /// Create a rack whose registry holds the built-in modules.
    pub fn with_builtins(config: RackConfig) -> Result<(Self, Renderer)> {
        Self::new(config, ModuleRegistry::with_builtins())
    }

    pub fn config(&self) -> &RackConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    pub fn voices(&self) -> &VoiceControl {
        &self.voices
    }

    // --- structural edits -------------------------------------------------

    /// Instantiate a registered module type. Not live until the next commit.
    pub fn add_module(&self, module_type: &str) -> Result<LogicalId> {
        let Some(module) = self.registry.create(module_type) else {
            warn!(module_type, "unknown module type");
            return Err(PatchError::UnknownModuleType(module_type.into()));
        };
        self.insert(module_type, module)
    }

    /// Add an already constructed module under `module_type`.
    ///
    /// The type tag is what [`save_state`](Self::save_state) records, so
    /// register the same tag if the patch should be loadable later.
    pub fn add_custom<M: Module>(&self, module_type: &str, module: M) -> Result<LogicalId> {
        self.insert(module_type, Box::new(module))
    }

    fn insert(&self, module_type: &str, module: Box<dyn Module>) -> Result<LogicalId> {
        let mut control = self.control.lock();
        let id = control.store.insert(module_type, module).inspect_err(|error| {
            warn!(module_type, %error, "module refused");
        })?;
        debug!(%id, module_type, "module added");
        Ok(id)
    }

    /// Remove a module and every cable touching it. `false` if it did not exist.
    pub fn remove_module(&self, id: LogicalId) -> bool {
        let mut control = self.control.lock();
        let removed = control.store.remove(id);
        if removed {
            self.transport.release_timeline_master(id);
            debug!(%id, "module removed");
        }
        control.publisher.collect();
        removed
    }

    /// Patch `src.out[src_channel]` into `dst.in[dst_channel]`.
    ///
    /// `dst` may be [`LogicalId::MAIN_OUTPUT`]. Refused without any change if
    /// an endpoint is unknown, a channel is out of range, the cable exists,
    /// or it would close a cycle no feedback-tolerant module breaks.
    pub fn connect(
        &self,
        src: LogicalId,
        src_channel: usize,
        dst: LogicalId,
        dst_channel: usize,
    ) -> Result<()> {
        let connection = Connection::new(src, src_channel, dst, dst_channel);
        let mut control = self.control.lock();
        match control.store.connect(connection) {
            Ok(()) => {
                debug!(%connection, "connected");
                Ok(())
            }
            Err(error) => {
                warn!(%connection, %error, "connect refused");
                Err(error)
            }
        }
    }

    /// Remove an exact-match cable. `false` if there was none.
    pub fn disconnect(
        &self,
        src: LogicalId,
        src_channel: usize,
        dst: LogicalId,
        dst_channel: usize,
    ) -> bool {
        let connection = Connection::new(src, src_channel, dst, dst_channel);
        let removed = self.control.lock().store.disconnect(&connection);
        if removed {
            debug!(%connection, "disconnected");
        }
        removed
    }

    /// Rebuild the execution order and publish a new active set.
    ///
    /// Returns the new snapshot's epoch. On error the previous snapshot stays
    /// published.
    pub fn commit_changes(&self) -> Result<u64> {
        let mut control = self.control.lock();
        Self::commit(&mut control)
    }

    fn commit(control: &mut ControlState) -> Result<u64> {
        let schedule = match control.store.schedule() {
            Ok(schedule) => schedule,
            Err(members) => {
                warn!(?members, "commit rejected, keeping previous active set");
                return Err(PatchError::CycleRejected { members });
            }
        };

        let epoch = control.publisher.next_epoch();
        let set = ActiveSet::build(epoch, &control.store, &schedule);

        control.store.clear_handles();
        for (index, &id) in schedule.order.iter().enumerate() {
            if let Some(slot) = control.store.slot_mut(id) {
                slot.handle = Some(RuntimeHandle {
                    epoch,
                    index: index as u32,
                });
            }
        }

        control.publisher.publish(set);
        let collected = control.publisher.collect();
        debug!(
            epoch,
            modules = schedule.order.len(),
            delayed = schedule.delayed.len(),
            "active set published"
        );
        if collected > 0 {
            trace!(collected, "retired active sets dropped");
        }
        Ok(epoch)
    }

    /// Remove every module and cable, then commit.
    ///
    /// Logical IDs keep counting up from where they were.
    pub fn clear_all(&self) -> Result<u64> {
        let mut control = self.control.lock();
        for id in control.store.ids() {
            control.store.remove(id);
        }
        self.transport.set_timeline_master(None);
        debug!("rack cleared");
        Self::commit(&mut control)
    }

    /// Remove every cable, then commit.
    pub fn clear_all_connections(&self) -> Result<u64> {
        let mut control = self.control.lock();
        control.store.clear_connections();
        debug!("all connections cleared");
        Self::commit(&mut control)
    }

    /// Remove every cable touching `id`, then commit.
    pub fn clear_connections_for_node(&self, id: LogicalId) -> Result<u64> {
        let mut control = self.control.lock();
        if !control.store.contains(id) {
            return Err(PatchError::UnknownModule(id));
        }
        let removed = control.store.clear_connections_for(id);
        debug!(%id, removed, "connections cleared");
        Self::commit(&mut control)
    }

    // --- cross-cutting controls ------------------------------------------

    /// Mute (detach and remember cables) or unmute (restore them), then commit.
    ///
    /// Returns whether the mute state changed.
    pub fn set_muted(&self, id: LogicalId, muted: bool) -> Result<bool> {
        let mut control = self.control.lock();
        let changed = control.store.set_muted(id, muted)?;
        if changed {
            debug!(%id, muted, "mute changed");
            Self::commit(&mut control)?;
        }
        Ok(changed)
    }

    pub fn is_muted(&self, id: LogicalId) -> Option<bool> {
        self.control.lock().store.slot(id).map(|slot| slot.muted)
    }

    /// Feed hardware input `channels[i]` into module input `i`, then commit.
    ///
    /// An empty list removes the mapping.
    pub fn set_audio_input_channel_mapping(&self, id: LogicalId, channels: Vec<usize>) -> Result<u64> {
        let mut control = self.control.lock();
        control.store.set_input_mapping(id, channels)?;
        debug!(%id, "input mapping changed");
        Self::commit(&mut control)
    }

    /// Queue a parameter change. Applied on the audio thread before the
    /// module's next block; no commit needed.
    pub fn set_param(&self, id: LogicalId, param: u32, value: f32) -> Result<()> {
        self.control.lock().store.set_param(id, param, value)
    }

    /// Last value set for each of a module's parameters.
    pub fn params(&self, id: LogicalId) -> Option<BTreeMap<u32, f32>> {
        self.control.lock().store.slot(id).map(|slot| slot.params.clone())
    }

    /// Designate the module whose timeline drives the transport position.
    pub fn set_timeline_master(&self, id: Option<LogicalId>) -> Result<()> {
        if let Some(id) = id {
            if !self.control.lock().store.contains(id) {
                return Err(PatchError::UnknownModule(id));
            }
        }
        self.transport.set_timeline_master(id);
        debug!(master = ?id, "timeline master changed");
        Ok(())
    }

    /// Queue a note event for a polyphonic module.
    pub fn send_note(&self, event: NoteEvent) -> Result<()> {
        self.notes
            .lock()
            .push(event)
            .map_err(|_| PatchError::QueueFull("note queue"))
    }

    // --- introspection ----------------------------------------------------

    /// Every module, by ascending logical ID.
    pub fn modules_info(&self) -> Vec<ModuleInfo> {
        let control = self.control.lock();
        control
            .store
            .ids()
            .into_iter()
            .filter_map(|id| control.store.module_info(id))
            .collect()
    }

    pub fn module_info(&self, id: LogicalId) -> Option<ModuleInfo> {
        self.control.lock().store.module_info(id)
    }

    /// Every live cable (muted modules' cables excluded).
    pub fn connections_info(&self) -> Vec<Connection> {
        self.control.lock().store.connections().to_vec()
    }

    /// Runtime handle of `id` in the last published active set.
    ///
    /// `None` if the module is unknown or was added after the last commit.
    pub fn module_for_logical(&self, id: LogicalId) -> Option<RuntimeHandle> {
        self.control.lock().store.slot(id).and_then(|slot| slot.handle)
    }

    /// The most recently published snapshot.
    pub fn active_set(&self) -> Arc<ActiveSet> {
        self.control.lock().publisher.current()
    }

    /// Processing order of the most recently published snapshot.
    pub fn execution_order(&self) -> Vec<LogicalId> {
        self.active_set().order().collect()
    }

    pub fn max_voices(&self) -> usize {
        self.voices.max_voices()
    }

    pub fn set_max_voices(&self, max_voices: usize) -> Result<()> {
        self.voices.set_max_voices(max_voices)?;
        debug!(max_voices, "voice bank resized");
        Ok(())
    }

    pub fn set_voice_manager_enabled(&self, enabled: bool) {
        self.voices.set_voice_manager_enabled(enabled);
    }

    pub fn get_voices(&self) -> Vec<Voice> {
        self.voices.voices()
    }

    // --- persistence ------------------------------------------------------

    /// Capture the patch for saving.
    pub fn save_state(&self) -> PatchState {
        let control = self.control.lock();
        let store = &control.store;
        let modules = store
            .ids()
            .into_iter()
            .filter_map(|id| {
                let slot = store.slot(id)?;
                Some(ModuleState {
                    id,
                    module_type: slot.module_type.clone(),
                    params: slot
                        .params
                        .iter()
                        .map(|(&param, &value)| ParamValue { param, value })
                        .collect(),
                    muted: slot.muted,
                    input_mapping: slot.input_mapping.clone(),
                    muted_connections: store.muted_connections(id).to_vec(),
                })
            })
            .collect();

        PatchState {
            modules,
            connections: store.connections().to_vec(),
            next_id: store.next_id(),
        }
    }

    /// Replace the patch with `state` and commit.
    ///
    /// All or nothing: if any module type is unknown or any cable is invalid,
    /// the current patch is left untouched.
    pub fn load_state(&self, state: &PatchState) -> Result<u64> {
        let store = self.build_store(state)?;

        let mut control = self.control.lock();
        let next_id = control.store.next_id().max(store.next_id());
        control.store = store;
        control.store.reserve_ids(next_id);

        if let Some(master) = self.transport.timeline_master() {
            if !control.store.contains(master) {
                self.transport.set_timeline_master(None);
            }
        }

        debug!(modules = state.modules.len(), "patch loaded");
        Self::commit(&mut control)
    }

    fn build_store(&self, state: &PatchState) -> Result<TopologyStore> {
        let mut store = TopologyStore::new(
            self.config.input_channels,
            self.config.output_channels,
            self.config.param_queue_capacity,
        );

        for saved in &state.modules {
            let mut module = self
                .registry
                .create(&saved.module_type)
                .ok_or_else(|| PatchError::UnknownModuleType(saved.module_type.clone()))?;
            for p in &saved.params {
                module.set_param(p.param, p.value);
            }
            store.insert_with_id(saved.id, &saved.module_type, module)?;
            if let Some(slot) = store.slot_mut(saved.id) {
                slot.params = saved.params.iter().map(|p| (p.param, p.value)).collect();
            }
            if !saved.input_mapping.is_empty() {
                store.set_input_mapping(saved.id, saved.input_mapping.clone())?;
            }
        }

        for &connection in &state.connections {
            store.connect(connection)?;
        }
        for saved in state.modules.iter().filter(|m| m.muted) {
            store.restore_muted(saved.id, saved.muted_connections.clone())?;
        }

        store.reserve_ids(state.next_id);
        Ok(store)
    }

    /// Drop active sets the audio thread has finished with. Returns how many.
    ///
    /// Every structural edit already does this; call it periodically if the
    /// patch sits unchanged for long.
    pub fn collect_garbage(&self) -> usize {
        let collected = self.control.lock().publisher.collect();
        if collected > 0 {
            trace!(collected, "retired active sets dropped");
        }
        collected
    }
}

//! Topology store - logical modules, connections, and mute bookkeeping.
//!
//! Only the control thread touches this. The audio thread sees the result
//! through [`ActiveSet`](crate::ActiveSet) snapshots built from it.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;
use itertools::Itertools;
use rtrb::Producer;
use serde::{Deserialize, Serialize};

use crate::adapter::{ParamChange, SlotRuntime};
use crate::module::Module;
use crate::schedule::{self, Schedule, ScheduleNode};
use crate::{PatchError, Result};

/// Stable, persistable identity of a module within a patch.
///
/// Assigned monotonically by the rack and never reused within a session.
/// ID 0 is reserved for the main output bus ([`LogicalId::MAIN_OUTPUT`]).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct LogicalId(pub(crate) u32);

impl LogicalId {
    /// Destination ID for connections into the rack's main output bus.
    pub const MAIN_OUTPUT: LogicalId = LogicalId(0);

    /// Rebuild an ID from its raw value (e.g. when restoring a patch).
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_main_output(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main_output() {
            write!(f, "main-output")
        } else {
            write!(f, "module#{}", self.0)
        }
    }
}

/// Ephemeral position of a module inside one published active set.
///
/// Reassigned on every rebuild. Never persist it, and never compare handles
/// taken from different epochs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RuntimeHandle {
    pub(crate) epoch: u64,
    pub(crate) index: u32,
}

impl RuntimeHandle {
    /// The active-set epoch this handle belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Position in that active set's processing order.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// A patch cable from one output channel to one input channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Connection {
    pub src: LogicalId,
    pub src_channel: usize,
    pub dst: LogicalId,
    pub dst_channel: usize,
    pub dst_is_main_output: bool,
}

impl Connection {
    pub fn new(src: LogicalId, src_channel: usize, dst: LogicalId, dst_channel: usize) -> Self {
        Self {
            src,
            src_channel,
            dst,
            dst_channel,
            dst_is_main_output: dst.is_main_output(),
        }
    }

    #[inline]
    pub fn touches(&self, id: LogicalId) -> bool {
        self.src == id || self.dst == id
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.out{} -> {}.in{}",
            self.src, self.src_channel, self.dst, self.dst_channel
        )
    }
}

/// Read-only description of a module, for UI rendering.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleInfo {
    pub id: LogicalId,
    pub module_type: String,
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub muted: bool,
    pub polyphonic: bool,
    pub input_mapping: Vec<usize>,
    pub runtime_handle: Option<RuntimeHandle>,
}

/// The ID after `id`, or an error once the ID space is used up.
fn successor(id: LogicalId) -> Result<u32> {
    id.0.checked_add(1)
        .ok_or_else(|| PatchError::InvalidConfig(format!("logical id {id} is the last one")))
}

/// One instantiated module plus its identity and cross-cutting controls.
pub(crate) struct ModuleSlot {
    pub(crate) module_type: String,
    pub(crate) runtime: Arc<SlotRuntime>,
    pub(crate) params_tx: Producer<ParamChange>,
    /// Last value sent per parameter; the module's persisted parameter blob
    pub(crate) params: BTreeMap<u32, f32>,
    pub(crate) muted: bool,
    pub(crate) input_mapping: Vec<usize>,
    pub(crate) handle: Option<RuntimeHandle>,
    pub(crate) num_inputs: usize,
    pub(crate) num_outputs: usize,
    pub(crate) polyphonic: bool,
    pub(crate) tolerates_feedback: bool,
}

/// Authoritative record of modules and connections.
pub(crate) struct TopologyStore {
    slots: HashMap<LogicalId, ModuleSlot>,
    connections: Vec<Connection>,
    /// Connections detached by muting, keyed by the muted module
    muted_connections: HashMap<LogicalId, Vec<Connection>>,
    next_id: u32,
    input_channels: usize,
    output_channels: usize,
    queue_capacity: usize,
}

impl TopologyStore {
    pub(crate) fn new(input_channels: usize, output_channels: usize, queue_capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            connections: Vec::new(),
            muted_connections: HashMap::new(),
            next_id: 1,
            input_channels,
            output_channels,
            queue_capacity,
        }
    }

    /// Insert a module under a freshly allocated logical ID.
    pub(crate) fn insert(&mut self, module_type: &str, module: Box<dyn Module>) -> Result<LogicalId> {
        let id = LogicalId(self.next_id);
        self.next_id = successor(id)?;
        self.insert_slot(id, module_type, module);
        Ok(id)
    }

    /// Insert a module under a known ID, bumping the counter past it.
    pub(crate) fn insert_with_id(
        &mut self,
        id: LogicalId,
        module_type: &str,
        module: Box<dyn Module>,
    ) -> Result<()> {
        if id.is_main_output() || self.slots.contains_key(&id) {
            return Err(PatchError::InvalidConfig(format!("duplicate logical id {id}")));
        }
        self.next_id = self.next_id.max(successor(id)?);
        self.insert_slot(id, module_type, module);
        Ok(())
    }

    fn insert_slot(&mut self, id: LogicalId, module_type: &str, module: Box<dyn Module>) {
        let num_inputs = module.num_inputs();
        let num_outputs = module.num_outputs();
        let polyphonic = module.is_polyphonic();
        let tolerates_feedback = module.tolerates_feedback();
        let (runtime, params_tx) = SlotRuntime::new(module, self.queue_capacity);

        self.slots.insert(
            id,
            ModuleSlot {
                module_type: module_type.into(),
                runtime: Arc::new(runtime),
                params_tx,
                params: BTreeMap::new(),
                muted: false,
                input_mapping: Vec::new(),
                handle: None,
                num_inputs,
                num_outputs,
                polyphonic,
                tolerates_feedback,
            },
        );
    }

    /// Remove a module, every connection touching it, and any saved mute state.
    pub(crate) fn remove(&mut self, id: LogicalId) -> bool {
        if self.slots.remove(&id).is_none() {
            return false;
        }
        self.connections.retain(|c| !c.touches(id));
        self.muted_connections.remove(&id);
        for saved in self.muted_connections.values_mut() {
            saved.retain(|c| !c.touches(id));
        }
        true
    }

    pub(crate) fn contains(&self, id: LogicalId) -> bool {
        self.slots.contains_key(&id)
    }

    pub(crate) fn slot(&self, id: LogicalId) -> Option<&ModuleSlot> {
        self.slots.get(&id)
    }

    pub(crate) fn slot_mut(&mut self, id: LogicalId) -> Option<&mut ModuleSlot> {
        self.slots.get_mut(&id)
    }

    /// Logical IDs in ascending order.
    pub(crate) fn ids(&self) -> Vec<LogicalId> {
        self.slots.keys().copied().sorted().collect()
    }

    pub(crate) fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Make sure IDs below `next_id` are never allocated.
    pub(crate) fn reserve_ids(&mut self, next_id: u32) {
        self.next_id = self.next_id.max(next_id);
    }

    pub(crate) fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Validate and add a connection. The store is unchanged on error.
    pub(crate) fn connect(&mut self, connection: Connection) -> Result<()> {
        self.validate(&connection)?;

        if self.connections.contains(&connection) {
            return Err(PatchError::AlreadyConnected(connection));
        }

        let mut trial = self.connections.clone();
        trial.push(connection);
        schedule::build(&self.schedule_nodes(), &trial)
            .map_err(|members| PatchError::CycleRejected { members })?;

        self.connections.push(connection);
        Ok(())
    }

    fn validate(&self, connection: &Connection) -> Result<()> {
        let src = self
            .slots
            .get(&connection.src)
            .ok_or(PatchError::UnknownModule(connection.src))?;
        if connection.src_channel >= src.num_outputs {
            return Err(PatchError::ChannelOutOfRange {
                module: connection.src,
                channel: connection.src_channel,
                available: src.num_outputs,
            });
        }

        let dst_inputs = if connection.dst.is_main_output() {
            self.output_channels
        } else {
            self.slots
                .get(&connection.dst)
                .ok_or(PatchError::UnknownModule(connection.dst))?
                .num_inputs
        };
        if connection.dst_channel >= dst_inputs {
            return Err(PatchError::ChannelOutOfRange {
                module: connection.dst,
                channel: connection.dst_channel,
                available: dst_inputs,
            });
        }
        Ok(())
    }

    /// Remove an exact-match connection.
    pub(crate) fn disconnect(&mut self, connection: &Connection) -> bool {
        match self.connections.iter().position(|c| c == connection) {
            Some(index) => {
                self.connections.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear_connections(&mut self) {
        self.connections.clear();
        for saved in self.muted_connections.values_mut() {
            saved.clear();
        }
    }

    /// Remove every connection touching `id`. Returns how many were removed.
    pub(crate) fn clear_connections_for(&mut self, id: LogicalId) -> usize {
        let before = self.connections.len();
        self.connections.retain(|c| !c.touches(id));
        for saved in self.muted_connections.values_mut() {
            saved.retain(|c| !c.touches(id));
        }
        before - self.connections.len()
    }

    /// Mute or unmute a module. Returns whether the state changed.
    ///
    /// Muting detaches every connection touching the module and saves it;
    /// unmuting restores the saved connections whose endpoints still exist
    /// and that would not close an unschedulable cycle.
    pub(crate) fn set_muted(&mut self, id: LogicalId, muted: bool) -> Result<bool> {
        let slot = self.slots.get_mut(&id).ok_or(PatchError::UnknownModule(id))?;
        if slot.muted == muted {
            return Ok(false);
        }
        slot.muted = muted;

        if muted {
            let (detached, kept): (Vec<_>, Vec<_>) =
                self.connections.iter().copied().partition(|c| c.touches(id));
            self.connections = kept;
            self.muted_connections.insert(id, detached);
        } else {
            let saved = self.muted_connections.remove(&id).unwrap_or_default();
            for connection in saved {
                if let Err(error) = self.connect(connection) {
                    tracing::debug!(%connection, %error, "dropping saved connection on unmute");
                }
            }
        }
        Ok(true)
    }

    pub(crate) fn muted_connections(&self, id: LogicalId) -> &[Connection] {
        self.muted_connections
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Restore a muted module's saved connections verbatim (used when loading a patch).
    pub(crate) fn restore_muted(&mut self, id: LogicalId, saved: Vec<Connection>) -> Result<()> {
        let slot = self.slots.get_mut(&id).ok_or(PatchError::UnknownModule(id))?;
        slot.muted = true;
        self.muted_connections.insert(id, saved);
        Ok(())
    }

    /// Set the hardware input channel feeding each module input.
    pub(crate) fn set_input_mapping(&mut self, id: LogicalId, channels: Vec<usize>) -> Result<()> {
        let input_channels = self.input_channels;
        let slot = self.slots.get_mut(&id).ok_or(PatchError::UnknownModule(id))?;
        if channels.len() > slot.num_inputs {
            return Err(PatchError::ChannelOutOfRange {
                module: id,
                channel: channels.len() - 1,
                available: slot.num_inputs,
            });
        }
        if let Some(&bad) = channels.iter().find(|&&ch| ch >= input_channels) {
            return Err(PatchError::ChannelOutOfRange {
                module: id,
                channel: bad,
                available: input_channels,
            });
        }
        slot.input_mapping = channels;
        Ok(())
    }

    /// Queue a parameter change and record it in the slot's parameter blob.
    pub(crate) fn set_param(&mut self, id: LogicalId, param: u32, value: f32) -> Result<()> {
        let slot = self.slots.get_mut(&id).ok_or(PatchError::UnknownModule(id))?;
        slot.params_tx
            .push(ParamChange { param, value })
            .map_err(|_| PatchError::QueueFull("parameter queue"))?;
        slot.params.insert(param, value);
        Ok(())
    }

    pub(crate) fn schedule_nodes(&self) -> Vec<ScheduleNode> {
        self.ids()
            .into_iter()
            .map(|id| ScheduleNode {
                id,
                tolerates_feedback: self.slots[&id].tolerates_feedback,
            })
            .collect()
    }

    /// Compute the execution order for the current connection set.
    pub(crate) fn schedule(&self) -> core::result::Result<Schedule, Vec<LogicalId>> {
        schedule::build(&self.schedule_nodes(), &self.connections)
    }

    pub(crate) fn module_info(&self, id: LogicalId) -> Option<ModuleInfo> {
        self.slots.get(&id).map(|slot| ModuleInfo {
            id,
            module_type: slot.module_type.clone(),
            num_inputs: slot.num_inputs,
            num_outputs: slot.num_outputs,
            muted: slot.muted,
            polyphonic: slot.polyphonic,
            input_mapping: slot.input_mapping.clone(),
            runtime_handle: slot.handle,
        })
    }

    /// Forget every runtime handle; the next publish assigns fresh ones.
    pub(crate) fn clear_handles(&mut self) {
        for slot in self.slots.values_mut() {
            slot.handle = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{FeedbackDelay, Gain, Sine};

    fn store() -> TopologyStore {
        TopologyStore::new(2, 2, 8)
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut store = store();
        let a = store.insert("sine", Box::new(Sine::new(440.0))).unwrap();
        let b = store.insert("sine", Box::new(Sine::new(440.0))).unwrap();
        assert!(store.remove(b));
        let c = store.insert("sine", Box::new(Sine::new(440.0))).unwrap();
        assert_eq!((a.get(), b.get(), c.get()), (1, 2, 3));
        assert!(!store.contains(b));
    }

    #[test]
    fn connect_validates_endpoints_and_channels() {
        let mut store = store();
        let sine = store.insert("sine", Box::new(Sine::new(440.0))).unwrap();
        let gain = store.insert("gain", Box::new(Gain::new(1.0))).unwrap();

        assert!(matches!(
            store.connect(Connection::new(sine, 1, gain, 0)),
            Err(PatchError::ChannelOutOfRange { .. })
        ));
        assert!(matches!(
            store.connect(Connection::new(sine, 0, LogicalId(99), 0)),
            Err(PatchError::UnknownModule(_))
        ));
        assert!(matches!(
            store.connect(Connection::new(gain, 0, LogicalId::MAIN_OUTPUT, 2)),
            Err(PatchError::ChannelOutOfRange { .. })
        ));
        assert!(store.connections().is_empty());

        store.connect(Connection::new(sine, 0, gain, 0)).unwrap();
        assert!(matches!(
            store.connect(Connection::new(sine, 0, gain, 0)),
            Err(PatchError::AlreadyConnected(_))
        ));

        let out = Connection::new(gain, 1, LogicalId::MAIN_OUTPUT, 1);
        store.connect(out).unwrap();
        assert!(store.connections()[1].dst_is_main_output);
    }

    #[test]
    fn cycle_without_feedback_input_is_refused() {
        let mut store = store();
        let a = store.insert("gain", Box::new(Gain::new(1.0))).unwrap();
        let b = store.insert("gain", Box::new(Gain::new(1.0))).unwrap();
        store.connect(Connection::new(a, 0, b, 0)).unwrap();
        assert!(matches!(
            store.connect(Connection::new(b, 0, a, 0)),
            Err(PatchError::CycleRejected { .. })
        ));
        assert_eq!(store.connections().len(), 1);
    }

    #[test]
    fn cycle_through_feedback_input_is_accepted() {
        let mut store = store();
        let gain = store.insert("gain", Box::new(Gain::new(1.0))).unwrap();
        let delay = store.insert("feedback_delay", Box::new(FeedbackDelay::new(0.5))).unwrap();
        store.connect(Connection::new(delay, 0, gain, 0)).unwrap();
        store.connect(Connection::new(gain, 0, delay, 0)).unwrap();
        let schedule = store.schedule().unwrap();
        assert_eq!(schedule.delayed.len(), 1);
    }

    #[test]
    fn remove_purges_connections_and_mute_state() {
        let mut store = store();
        let a = store.insert("gain", Box::new(Gain::new(1.0))).unwrap();
        let b = store.insert("gain", Box::new(Gain::new(1.0))).unwrap();
        let c = store.insert("gain", Box::new(Gain::new(1.0))).unwrap();
        store.connect(Connection::new(a, 0, b, 0)).unwrap();
        store.connect(Connection::new(b, 0, c, 0)).unwrap();

        assert!(store.set_muted(b, true).unwrap());
        assert!(store.connections().is_empty());
        assert_eq!(store.muted_connections(b).len(), 2);

        assert!(store.remove(a));
        assert_eq!(store.muted_connections(b).len(), 1);

        assert!(store.remove(b));
        assert!(store.muted_connections(b).is_empty());
    }

    #[test]
    fn unmute_restores_saved_connections() {
        let mut store = store();
        let a = store.insert("gain", Box::new(Gain::new(1.0))).unwrap();
        let b = store.insert("gain", Box::new(Gain::new(1.0))).unwrap();
        let ab = Connection::new(a, 0, b, 1);
        store.connect(ab).unwrap();

        store.set_muted(a, true).unwrap();
        assert!(!store.set_muted(a, true).unwrap());
        store.set_muted(a, false).unwrap();
        assert_eq!(store.connections(), &[ab]);
    }

    #[test]
    fn clearing_a_node_purges_it_from_saved_mute_state() {
        let mut store = store();
        let a = store.insert("gain", Box::new(Gain::new(1.0))).unwrap();
        let b = store.insert("gain", Box::new(Gain::new(1.0))).unwrap();
        let c = store.insert("gain", Box::new(Gain::new(1.0))).unwrap();
        store.connect(Connection::new(a, 0, b, 0)).unwrap();
        store.connect(Connection::new(a, 1, c, 0)).unwrap();

        store.set_muted(a, true).unwrap();
        assert_eq!(store.clear_connections_for(b), 0);
        assert_eq!(store.muted_connections(a), &[Connection::new(a, 1, c, 0)]);

        store.set_muted(a, false).unwrap();
        assert_eq!(store.connections(), &[Connection::new(a, 1, c, 0)]);
    }

    #[test]
    fn exhausted_id_space_is_refused() {
        let mut store = store();
        let last = LogicalId::from_raw(u32::MAX);
        assert!(store
            .insert_with_id(last, "sine", Box::new(Sine::new(440.0)))
            .is_err());
        assert!(!store.contains(last));

        let almost = LogicalId::from_raw(u32::MAX - 1);
        store
            .insert_with_id(almost, "sine", Box::new(Sine::new(440.0)))
            .unwrap();
        assert_eq!(store.next_id(), u32::MAX);
        assert!(store.insert("sine", Box::new(Sine::new(440.0))).is_err());
        assert_eq!(store.next_id(), u32::MAX);
        assert_eq!(store.ids(), vec![almost]);
    }

    #[test]
    fn input_mapping_is_validated() {
        let mut store = store();
        let gain = store.insert("gain", Box::new(Gain::new(1.0))).unwrap();
        assert!(store.set_input_mapping(gain, vec![1, 0]).is_ok());
        assert!(store.set_input_mapping(gain, vec![0, 1, 1]).is_err());
        assert!(store.set_input_mapping(gain, vec![2]).is_err());
        assert_eq!(store.slot(gain).unwrap().input_mapping, vec![1, 0]);
    }
}

//! Immutable snapshots of the live modules and their publication.
//!
//! The control thread builds an [`ActiveSet`] from the topology store after
//! every commit and installs it with a single [`ArcSwap`] store. The audio
//! thread loads the pointer once per block and keeps using that snapshot for
//! the whole block.
//!
//! The audio thread never drops the last reference to a snapshot: when it
//! moves on to a newer one, it pushes the old `Arc` into a retire queue that
//! the control thread drains in [`Publisher::collect`].

use alloc::sync::Arc;
use alloc::vec::Vec;

use arc_swap::ArcSwap;
use hashbrown::HashMap;
use rtrb::{Consumer, Producer, PushError, RingBuffer};

use crate::adapter::SlotRuntime;
use crate::schedule::Schedule;
use crate::topology::{LogicalId, RuntimeHandle, TopologyStore};

/// Where one module input reads from.
#[derive(Clone, Copy, Debug)]
pub(crate) struct InputRoute {
    /// Index of the source entry in the active set
    pub(crate) src: usize,
    pub(crate) src_channel: usize,
    pub(crate) dst_channel: usize,
    /// Read the source's output from the previous block
    pub(crate) delayed: bool,
    /// The source runs earlier in the block, so a delayed read must use its history
    pub(crate) from_history: bool,
}

/// A module output feeding the main output bus.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BusRoute {
    pub(crate) src_channel: usize,
    pub(crate) bus_channel: usize,
}

/// One live module in processing order.
pub(crate) struct ActiveEntry {
    pub(crate) id: LogicalId,
    pub(crate) runtime: Arc<SlotRuntime>,
    pub(crate) routes: Vec<InputRoute>,
    pub(crate) bus_routes: Vec<BusRoute>,
    /// Per input channel: fed by a cable or a hardware input
    pub(crate) connected: Vec<bool>,
    /// Hardware input channel for each module input
    pub(crate) input_mapping: Vec<usize>,
    pub(crate) muted: bool,
    pub(crate) polyphonic: bool,
    /// Some later-ordered module reads this one's previous block
    pub(crate) keeps_history: bool,
}

/// An immutable, ordered snapshot of the live modules.
///
/// Obtained from [`Rack::active_set`](crate::Rack::active_set) for
/// inspection; the audio thread holds its own reference while rendering.
pub struct ActiveSet {
    epoch: u64,
    pub(crate) entries: Vec<ActiveEntry>,
    index: HashMap<LogicalId, usize>,
}

impl ActiveSet {
    /// The snapshot in place before the first commit.
    pub(crate) fn empty() -> Self {
        Self {
            epoch: 0,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a snapshot of every module in `store`, ordered by `schedule`.
    pub(crate) fn build(epoch: u64, store: &TopologyStore, schedule: &Schedule) -> Self {
        let index: HashMap<LogicalId, usize> = schedule
            .order
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        let mut entries: Vec<ActiveEntry> = schedule
            .order
            .iter()
            .filter_map(|&id| {
                let slot = store.slot(id)?;
                let mut connected = vec![false; slot.num_inputs];
                for flag in connected.iter_mut().take(slot.input_mapping.len()) {
                    *flag = true;
                }
                Some(ActiveEntry {
                    id,
                    runtime: Arc::clone(&slot.runtime),
                    routes: Vec::new(),
                    bus_routes: Vec::new(),
                    connected,
                    input_mapping: slot.input_mapping.clone(),
                    muted: slot.muted,
                    polyphonic: slot.polyphonic,
                    keeps_history: false,
                })
            })
            .collect();

        for (i, connection) in store.connections().iter().enumerate() {
            let Some(&src) = index.get(&connection.src) else {
                continue;
            };

            if connection.dst_is_main_output {
                entries[src].bus_routes.push(BusRoute {
                    src_channel: connection.src_channel,
                    bus_channel: connection.dst_channel,
                });
                continue;
            }

            let Some(&dst) = index.get(&connection.dst) else {
                continue;
            };
            let delayed = schedule.delayed.contains(&i);
            let from_history = delayed && src < dst;
            if from_history {
                entries[src].keeps_history = true;
            }
            if let Some(flag) = entries[dst].connected.get_mut(connection.dst_channel) {
                *flag = true;
            }
            entries[dst].routes.push(InputRoute {
                src,
                src_channel: connection.src_channel,
                dst_channel: connection.dst_channel,
                delayed,
                from_history,
            });
        }

        Self {
            epoch,
            entries,
            index,
        }
    }

    /// Commit counter this snapshot was published under (0 before the first commit).
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Logical IDs in processing order.
    pub fn order(&self) -> impl Iterator<Item = LogicalId> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    pub fn contains(&self, id: LogicalId) -> bool {
        self.index.contains_key(&id)
    }

    /// Position of `id` in the processing order.
    #[inline]
    pub fn position(&self, id: LogicalId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// The runtime handle `id` has in this snapshot.
    pub fn handle_of(&self, id: LogicalId) -> Option<RuntimeHandle> {
        self.position(id).map(|index| RuntimeHandle {
            epoch: self.epoch,
            index: index as u32,
        })
    }

    /// Whether input `channel` of `id` is fed by a cable or hardware input.
    pub fn is_input_connected(&self, id: LogicalId, channel: usize) -> bool {
        self.position(id)
            .and_then(|i| self.entries[i].connected.get(channel).copied())
            .unwrap_or(false)
    }

    /// Number of cables in this snapshot that are read with one block of delay.
    pub fn delayed_edges(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.routes.iter().filter(|r| r.delayed).count())
            .sum()
    }
}

impl core::fmt::Debug for ActiveSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ActiveSet")
            .field("epoch", &self.epoch)
            .field("order", &self.order().collect::<Vec<_>>())
            .finish()
    }
}

/// Control-thread side: installs snapshots and reclaims retired ones.
pub(crate) struct Publisher {
    shared: Arc<ArcSwap<ActiveSet>>,
    retired: Consumer<Arc<ActiveSet>>,
    epoch: u64,
}

/// Audio-thread side: the snapshot currently being rendered.
pub(crate) struct SnapshotReader {
    shared: Arc<ArcSwap<ActiveSet>>,
    current: Arc<ActiveSet>,
    /// A snapshot that did not fit in the retire queue yet
    pending: Option<Arc<ActiveSet>>,
    retire: Producer<Arc<ActiveSet>>,
}

/// Create a connected publisher/reader pair holding an empty snapshot.
pub(crate) fn channel(retire_capacity: usize) -> (Publisher, SnapshotReader) {
    let initial = Arc::new(ActiveSet::empty());
    let shared = Arc::new(ArcSwap::new(Arc::clone(&initial)));
    let (producer, consumer) = RingBuffer::new(retire_capacity.max(1));
    (
        Publisher {
            shared: Arc::clone(&shared),
            retired: consumer,
            epoch: 0,
        },
        SnapshotReader {
            shared,
            current: initial,
            pending: None,
            retire: producer,
        },
    )
}

impl Publisher {
    /// The epoch the next published snapshot will carry.
    pub(crate) fn next_epoch(&self) -> u64 {
        self.epoch + 1
    }

    /// Install `set` as the current snapshot.
    pub(crate) fn publish(&mut self, set: ActiveSet) -> u64 {
        self.epoch = set.epoch;
        self.shared.store(Arc::new(set));
        self.epoch
    }

    pub(crate) fn current(&self) -> Arc<ActiveSet> {
        self.shared.load_full()
    }

    /// Drop every snapshot the audio thread has retired. Returns how many.
    pub(crate) fn collect(&mut self) -> usize {
        let mut collected = 0;
        while let Ok(set) = self.retired.pop() {
            drop(set);
            collected += 1;
        }
        collected
    }
}

impl SnapshotReader {
    /// Adopt the latest published snapshot, if the previous one can be retired.
    ///
    /// Called once at the start of every block. Never frees memory.
    pub(crate) fn acquire(&mut self) -> &Arc<ActiveSet> {
        if let Some(old) = self.pending.take() {
            if let Err(PushError::Full(old)) = self.retire.push(old) {
                self.pending = Some(old);
                return &self.current;
            }
        }

        let latest = self.shared.load();
        if !Arc::ptr_eq(&*latest, &self.current) {
            let old = core::mem::replace(&mut self.current, arc_swap::Guard::into_inner(latest));
            if let Err(PushError::Full(old)) = self.retire.push(old) {
                self.pending = Some(old);
            }
        }
        &self.current
    }

    pub(crate) fn current(&self) -> &Arc<ActiveSet> {
        &self.current
    }
}

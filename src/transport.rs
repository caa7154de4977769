//! Sample-accurate transport shared by every module.
//!
//! The control thread sets play/stop, tempo, and the global division through
//! relaxed atomics. The audio thread is the only writer of the position
//! fields: it advances them once per block, or copies the position reported
//! by the timeline master when one is designated.

use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF64;

use crate::topology::LogicalId;

/// Value of the transport at one instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransportState {
    pub is_playing: bool,
    pub bpm: f64,
    pub song_position_beats: f64,
    pub song_position_seconds: f64,
    /// Division override broadcast to tempo-synced modules
    pub global_division_index: Option<u32>,
    pub sample_position: u64,
    pub timeline_master: Option<LogicalId>,
}

impl Default for TransportState {
    fn default() -> Self {
        Self {
            is_playing: false,
            bpm: 120.0,
            song_position_beats: 0.0,
            song_position_seconds: 0.0,
            global_division_index: None,
            sample_position: 0,
            timeline_master: None,
        }
    }
}

/// Lock-free transport fields.
#[derive(Debug)]
pub(crate) struct TransportShared {
    playing: AtomicBool,
    bpm: AtomicF64,
    /// Negative means no override
    division: AtomicI64,
    sample_position: AtomicU64,
    seconds: AtomicF64,
    beats: AtomicF64,
    reset_pending: AtomicBool,
    /// Raw logical ID of the timeline master, 0 for none
    master: AtomicU32,
    bpm_min: f64,
    bpm_max: f64,
    sample_rate: f64,
}

/// Control-thread handle to the transport.
///
/// Cheap to clone; every clone talks to the same transport.
#[derive(Clone, Debug)]
pub struct TransportHandle {
    shared: Arc<TransportShared>,
}

impl TransportHandle {
    pub(crate) fn new(sample_rate: u32, bpm: f64, bpm_min: f64, bpm_max: f64) -> Self {
        Self {
            shared: Arc::new(TransportShared {
                playing: AtomicBool::new(false),
                bpm: AtomicF64::new(bpm.clamp(bpm_min, bpm_max)),
                division: AtomicI64::new(-1),
                sample_position: AtomicU64::new(0),
                seconds: AtomicF64::new(0.0),
                beats: AtomicF64::new(0.0),
                reset_pending: AtomicBool::new(false),
                master: AtomicU32::new(0),
                bpm_min,
                bpm_max,
                sample_rate: sample_rate as f64,
            }),
        }
    }

    pub(crate) fn clock(&self) -> TransportClock {
        TransportClock {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn set_playing(&self, playing: bool) {
        self.shared.playing.store(playing, Ordering::Relaxed);
    }

    pub fn play(&self) {
        self.set_playing(true);
    }

    pub fn stop(&self) {
        self.set_playing(false);
    }

    /// Set the tempo, clamped to the configured range. Non-finite values are ignored.
    pub fn set_bpm(&self, bpm: f64) {
        if bpm.is_finite() {
            let bpm = bpm.clamp(self.shared.bpm_min, self.shared.bpm_max);
            self.shared.bpm.store(bpm, Ordering::Relaxed);
        }
    }

    pub fn set_global_division_index(&self, index: Option<u32>) {
        let raw = index.map_or(-1, i64::from);
        self.shared.division.store(raw, Ordering::Relaxed);
    }

    /// Zero the position at the start of the next block. Play state and tempo
    /// are unchanged.
    pub fn reset_transport_position(&self) {
        self.shared.reset_pending.store(true, Ordering::Release);
    }

    /// Designate the module allowed to drive the position, or `None`.
    pub fn set_timeline_master(&self, id: Option<LogicalId>) {
        let raw = id.map_or(0, LogicalId::get);
        self.shared.master.store(raw, Ordering::Release);
    }

    pub fn timeline_master(&self) -> Option<LogicalId> {
        self.shared.timeline_master()
    }

    pub fn is_timeline_master(&self, id: LogicalId) -> bool {
        self.shared.is_timeline_master(id)
    }

    /// Clear the master designation if `id` holds it (used when a module is removed).
    pub(crate) fn release_timeline_master(&self, id: LogicalId) {
        let _ = self.shared.master.compare_exchange(
            id.get(),
            0,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    pub fn transport_state(&self) -> TransportState {
        self.shared.state()
    }
}

impl TransportShared {
    fn timeline_master(&self) -> Option<LogicalId> {
        match self.master.load(Ordering::Acquire) {
            0 => None,
            raw => Some(LogicalId(raw)),
        }
    }

    fn is_timeline_master(&self, id: LogicalId) -> bool {
        !id.is_main_output() && self.master.load(Ordering::Acquire) == id.get()
    }

    fn state(&self) -> TransportState {
        let division = self.division.load(Ordering::Relaxed);
        TransportState {
            is_playing: self.playing.load(Ordering::Relaxed),
            bpm: self.bpm.load(Ordering::Relaxed),
            song_position_beats: self.beats.load(Ordering::Acquire),
            song_position_seconds: self.seconds.load(Ordering::Acquire),
            global_division_index: u32::try_from(division).ok(),
            sample_position: self.sample_position.load(Ordering::Acquire),
            timeline_master: self.timeline_master(),
        }
    }

    fn store_position(&self, samples: u64, bpm: f64) {
        let seconds = samples as f64 / self.sample_rate;
        self.sample_position.store(samples, Ordering::Release);
        self.seconds.store(seconds, Ordering::Release);
        self.beats.store(seconds * bpm / 60.0, Ordering::Release);
    }
}

/// Audio-thread side of the transport. Owned by the [`Renderer`](crate::Renderer).
pub(crate) struct TransportClock {
    shared: Arc<TransportShared>,
}

impl TransportClock {
    /// State at the first sample of the coming block, after applying any reset.
    pub(crate) fn begin_block(&mut self) -> TransportState {
        if self.shared.reset_pending.swap(false, Ordering::AcqRel) {
            let bpm = self.shared.bpm.load(Ordering::Relaxed);
            self.shared.store_position(0, bpm);
        }
        self.shared.state()
    }

    /// Advance by one block, or adopt the master's reported position.
    ///
    /// `master_seconds` is only honoured if it came from the current master;
    /// the renderer checks that before passing it.
    pub(crate) fn end_block(&mut self, frames: usize, master_seconds: Option<f64>) {
        let bpm = self.shared.bpm.load(Ordering::Relaxed);
        let position = match master_seconds {
            Some(seconds) => (seconds.max(0.0) * self.shared.sample_rate).round() as u64,
            None if self.shared.playing.load(Ordering::Relaxed) => {
                self.shared.sample_position.load(Ordering::Acquire) + frames as u64
            }
            None => return,
        };
        self.shared.store_position(position, bpm);
    }

    pub(crate) fn is_timeline_master(&self, id: LogicalId) -> bool {
        self.shared.is_timeline_master(id)
    }
}

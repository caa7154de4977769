//! Polyphonic voice allocation with oldest-note stealing.
//!
//! The [`VoiceManager`] itself is a plain flat array owned by the audio
//! thread. The control thread drives it through [`VoiceControl`]: resizes go
//! through a lock-free command queue, and voice state comes back through a
//! mirrored [`VoiceBoard`] of atomics, so neither side ever blocks the other.
//!
//! All audio-thread methods are allocation-free after construction.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::topology::LogicalId;
use crate::{PatchError, Result};

/// One slot of the voice bank.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Voice {
    pub is_active: bool,
    pub note_number: u8,
    pub velocity: f32,
    /// Value of the global age counter when this voice was last assigned
    pub age: u64,
    pub target_module: Option<LogicalId>,
}

/// Result of a note-on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoiceAssignment {
    pub voice: usize,
    /// The voice's previous occupant, if it had to be stolen
    pub stolen: Option<Voice>,
}

/// A note event addressed to a polyphonic module.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NoteEvent {
    On {
        target: LogicalId,
        note: u8,
        velocity: f32,
    },
    Off {
        target: LogicalId,
        note: u8,
    },
}

/// Fixed-size voice bank.
#[derive(Debug)]
pub struct VoiceManager {
    voices: Vec<Voice>,
    capacity: usize,
    global_age: u64,
}

impl VoiceManager {
    /// A bank of `max_voices` voices that can later grow up to `capacity`.
    pub fn new(max_voices: usize, capacity: usize) -> Self {
        let capacity = capacity.max(max_voices);
        let mut voices = Vec::with_capacity(capacity);
        voices.resize(max_voices, Voice::default());
        Self {
            voices,
            capacity,
            global_age: 0,
        }
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn max_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active).count()
    }

    /// First inactive voice.
    pub fn find_free_voice(&self) -> Option<usize> {
        self.voices.iter().position(|v| !v.is_active)
    }

    /// Voice with the smallest age, lowest index on ties.
    pub fn find_oldest_voice(&self) -> Option<usize> {
        self.voices
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| v.age)
            .map(|(i, _)| i)
    }

    /// Assign a voice to a new note, stealing the oldest if the bank is full.
    ///
    /// Returns `None` only when the bank has no voices at all.
    pub fn note_on(&mut self, note: u8, velocity: f32, target: LogicalId) -> Option<VoiceAssignment> {
        let (voice, stolen) = match self.find_free_voice() {
            Some(free) => (free, None),
            None => {
                let oldest = self.find_oldest_voice()?;
                (oldest, Some(self.voices[oldest]))
            }
        };

        self.global_age += 1;
        self.voices[voice] = Voice {
            is_active: true,
            note_number: note,
            velocity,
            age: self.global_age,
            target_module: Some(target),
        };
        Some(VoiceAssignment { voice, stolen })
    }

    /// Release the most recently assigned active voice playing `note` for `target`.
    pub fn note_off(&mut self, note: u8, target: LogicalId) -> Option<(usize, Voice)> {
        let index = self
            .voices
            .iter()
            .enumerate()
            .filter(|(_, v)| {
                v.is_active && v.note_number == note && v.target_module == Some(target)
            })
            .max_by_key(|(_, v)| v.age)
            .map(|(i, _)| i)?;

        let released = self.voices[index];
        self.voices[index].is_active = false;
        Some((index, released))
    }

    /// Free every active voice whose target fails `keep`. Returns how many.
    pub fn release_orphans(&mut self, mut keep: impl FnMut(LogicalId) -> bool) -> usize {
        let mut released = 0;
        for voice in self.voices.iter_mut().filter(|v| v.is_active) {
            if !voice.target_module.is_some_and(&mut keep) {
                voice.is_active = false;
                released += 1;
            }
        }
        released
    }

    /// Resize the bank. Destructive: every voice is reset to free.
    ///
    /// Clamped to the capacity given at construction so it never allocates.
    pub fn set_max_voices(&mut self, max_voices: usize) {
        let len = max_voices.min(self.capacity);
        self.voices.clear();
        self.voices.resize(len, Voice::default());
    }
}

/// Lock-free mirror of one voice, written by the audio thread.
#[derive(Debug)]
struct VoiceCell {
    active: AtomicBool,
    note: AtomicU8,
    velocity: AtomicF32,
    age: AtomicU64,
    target: AtomicU32,
}

impl VoiceCell {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            note: AtomicU8::new(0),
            velocity: AtomicF32::new(0.0),
            age: AtomicU64::new(0),
            target: AtomicU32::new(0),
        }
    }
}

/// Read-only view of the voice bank for the control thread.
#[derive(Debug)]
pub(crate) struct VoiceBoard {
    cells: Box<[VoiceCell]>,
    len: AtomicUsize,
    enabled: AtomicBool,
}

impl VoiceBoard {
    fn new(capacity: usize, len: usize) -> Self {
        Self {
            cells: (0..capacity).map(|_| VoiceCell::new()).collect(),
            len: AtomicUsize::new(len),
            enabled: AtomicBool::new(true),
        }
    }

    /// Copy the manager's voices into the board. Audio thread only.
    pub(crate) fn publish(&self, manager: &VoiceManager) {
        for (cell, voice) in self.cells.iter().zip(manager.voices()) {
            cell.active.store(voice.is_active, Ordering::Relaxed);
            cell.note.store(voice.note_number, Ordering::Relaxed);
            cell.velocity.store(voice.velocity, Ordering::Relaxed);
            cell.age.store(voice.age, Ordering::Relaxed);
            cell.target
                .store(voice.target_module.map_or(0, LogicalId::get), Ordering::Relaxed);
        }
        self.len.store(manager.max_voices(), Ordering::Release);
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> Vec<Voice> {
        let len = self.len.load(Ordering::Acquire);
        self.cells[..len.min(self.cells.len())]
            .iter()
            .map(|cell| Voice {
                is_active: cell.active.load(Ordering::Relaxed),
                note_number: cell.note.load(Ordering::Relaxed),
                velocity: cell.velocity.load(Ordering::Relaxed),
                age: cell.age.load(Ordering::Relaxed),
                target_module: match cell.target.load(Ordering::Relaxed) {
                    0 => None,
                    raw => Some(LogicalId(raw)),
                },
            })
            .collect()
    }
}

/// Commands from the control thread to the audio thread's voice manager.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum VoiceCommand {
    Resize(usize),
}

/// Control-thread surface of the voice manager.
pub struct VoiceControl {
    board: Arc<VoiceBoard>,
    commands: Mutex<Producer<VoiceCommand>>,
    max_voices: AtomicUsize,
    capacity: usize,
}

/// Audio-thread half returned alongside a [`VoiceControl`].
pub(crate) struct VoiceEndpoint {
    pub(crate) manager: VoiceManager,
    pub(crate) board: Arc<VoiceBoard>,
    pub(crate) commands: Consumer<VoiceCommand>,
}

impl VoiceControl {
    pub(crate) fn new(max_voices: usize, capacity: usize) -> (Self, VoiceEndpoint) {
        let board = Arc::new(VoiceBoard::new(capacity, max_voices));
        let (producer, consumer) = RingBuffer::new(16);
        let control = Self {
            board: Arc::clone(&board),
            commands: Mutex::new(producer),
            max_voices: AtomicUsize::new(max_voices),
            capacity,
        };
        let endpoint = VoiceEndpoint {
            manager: VoiceManager::new(max_voices, capacity),
            board,
            commands: consumer,
        };
        (control, endpoint)
    }

    /// When disabled, incoming note events are dropped by the audio thread.
    pub fn set_voice_manager_enabled(&self, enabled: bool) {
        self.board.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_voice_manager_enabled(&self) -> bool {
        self.board.is_enabled()
    }

    /// Request a destructive resize of the voice bank.
    ///
    /// Takes effect at the start of the next audio block; all voices are freed.
    pub fn set_max_voices(&self, max_voices: usize) -> Result<()> {
        if max_voices > self.capacity {
            return Err(PatchError::InvalidConfig(format!(
                "max_voices {max_voices} exceeds voice_capacity {}",
                self.capacity
            )));
        }
        self.commands
            .lock()
            .push(VoiceCommand::Resize(max_voices))
            .map_err(|_| PatchError::QueueFull("voice command queue"))?;
        self.max_voices.store(max_voices, Ordering::Release);
        Ok(())
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices.load(Ordering::Acquire)
    }

    /// Voice state as last published by the audio thread.
    pub fn voices(&self) -> Vec<Voice> {
        self.board.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: LogicalId = LogicalId(7);

    #[test]
    fn allocates_free_voices_in_order() {
        let mut bank = VoiceManager::new(4, 8);
        assert_eq!(bank.note_on(60, 0.8, TARGET).unwrap().voice, 0);
        assert_eq!(bank.note_on(64, 0.7, TARGET).unwrap().voice, 1);
        assert_eq!(bank.active_count(), 2);
        assert_eq!(bank.voices()[1].age, 2);
    }

    #[test]
    fn steals_oldest_when_full() {
        let mut bank = VoiceManager::new(2, 2);
        bank.note_on(60, 0.8, TARGET);
        bank.note_on(64, 0.7, TARGET);

        let assignment = bank.note_on(67, 0.9, TARGET).unwrap();
        assert_eq!(assignment.voice, 0);
        assert_eq!(assignment.stolen.map(|v| v.note_number), Some(60));
        assert_eq!(bank.voices()[0].note_number, 67);
        assert_eq!(bank.voices()[0].age, 3);

        // The next steal takes the voice that is now oldest
        assert_eq!(bank.note_on(69, 0.9, TARGET).unwrap().voice, 1);
    }

    #[test]
    fn freed_voice_is_reused_before_stealing() {
        let mut bank = VoiceManager::new(2, 2);
        bank.note_on(60, 0.8, TARGET);
        bank.note_on(64, 0.7, TARGET);
        bank.note_off(60, TARGET);
        let assignment = bank.note_on(72, 0.5, TARGET).unwrap();
        assert_eq!(assignment.voice, 0);
        assert!(assignment.stolen.is_none());
    }

    #[test]
    fn note_off_releases_latest_duplicate_first() {
        let mut bank = VoiceManager::new(4, 4);
        bank.note_on(60, 0.8, TARGET);
        bank.note_on(60, 0.6, TARGET);

        let (index, voice) = bank.note_off(60, TARGET).unwrap();
        assert_eq!(index, 1);
        assert_eq!(voice.velocity, 0.6);
        assert!(bank.voices()[0].is_active);

        assert_eq!(bank.note_off(60, TARGET).unwrap().0, 0);
        assert!(bank.note_off(60, TARGET).is_none());
    }

    #[test]
    fn note_off_only_touches_its_target() {
        let other = LogicalId(8);
        let mut bank = VoiceManager::new(4, 4);
        bank.note_on(60, 0.8, TARGET);
        bank.note_on(60, 0.8, other);

        let (index, voice) = bank.note_off(60, TARGET).unwrap();
        assert_eq!(index, 0);
        assert_eq!(voice.target_module, Some(TARGET));
        assert!(bank.voices()[1].is_active);
        assert!(bank.note_off(60, TARGET).is_none());
    }

    #[test]
    fn orphaned_voices_are_released() {
        let gone = LogicalId(9);
        let mut bank = VoiceManager::new(4, 4);
        bank.note_on(60, 0.8, TARGET);
        bank.note_on(62, 0.8, gone);
        bank.note_on(64, 0.8, gone);

        assert_eq!(bank.release_orphans(|id| id == TARGET), 2);
        assert_eq!(bank.active_count(), 1);
        assert_eq!(bank.find_free_voice(), Some(1));
    }

    #[test]
    fn resize_is_destructive() {
        let mut bank = VoiceManager::new(8, 16);
        for note in 0..6 {
            bank.note_on(60 + note, 1.0, TARGET);
        }
        assert_eq!(bank.active_count(), 6);

        bank.set_max_voices(4);
        assert_eq!(bank.max_voices(), 4);
        assert!(bank.voices().iter().all(|v| !v.is_active));

        bank.set_max_voices(100);
        assert_eq!(bank.max_voices(), 16);
    }

    #[test]
    fn empty_bank_assigns_nothing() {
        let mut bank = VoiceManager::new(0, 4);
        assert!(bank.note_on(60, 1.0, TARGET).is_none());
    }

    #[test]
    fn board_mirrors_manager() {
        let (control, mut endpoint) = VoiceControl::new(4, 8);
        endpoint.manager.note_on(61, 0.5, TARGET);
        endpoint.board.publish(&endpoint.manager);

        let voices = control.voices();
        assert_eq!(voices.len(), 4);
        assert!(voices[0].is_active);
        assert_eq!(voices[0].note_number, 61);
        assert_eq!(voices[0].target_module, Some(TARGET));

        assert!(control.set_max_voices(9).is_err());
        control.set_max_voices(2).unwrap();
        assert_eq!(control.max_voices(), 2);
        assert_eq!(endpoint.commands.pop(), Ok(VoiceCommand::Resize(2)));
    }
}

//! A live-repatchable modular audio rack.
//!
//! Modules are wired into an arbitrary graph from a control thread while a
//! [`Renderer`] plays it on the audio thread. The two never share a lock:
//! every [`Rack::commit_changes`] builds a new immutable [`ActiveSet`] and
//! swaps it in atomically, and the renderer picks it up at the next block.
//!
//! - [`Rack`]: add/remove/connect modules, commit, mute, persist
//! - [`Renderer`]: processes one block at a time, allocation-free
//! - [`TransportHandle`]: play/stop, tempo, song position, timeline master
//! - [`VoiceControl`]: polyphonic voice bank with oldest-note stealing
//! - [`Module`]: the contract every processing unit implements

extern crate alloc;

mod active_set;
mod adapter;
mod config;
mod error;
mod module;
mod rack;
mod registry;
mod renderer;
mod schedule;
mod state;
mod topology;
mod transport;
mod voice;

pub mod modules;

#[cfg(feature = "cpal_output")]
mod device;

pub use active_set::ActiveSet;
pub use adapter::ParamChange;
pub use config::{RackConfig, BLOCK_SIZE};
pub use error::{PatchError, Result};
pub use module::{BlockContext, Inputs, Module, TimelinePosition, VoiceEvent};
pub use rack::Rack;
pub use registry::{ModuleFactory, ModuleRegistry};
pub use renderer::Renderer;
pub use state::{ModuleState, ParamValue, PatchState};
pub use topology::{Connection, LogicalId, ModuleInfo, RuntimeHandle};
pub use transport::{TransportHandle, TransportState};
pub use voice::{NoteEvent, Voice, VoiceAssignment, VoiceControl, VoiceManager};

#[cfg(feature = "cpal_output")]
pub use device::{CpalDevice, OutputStream};

// Re-export so custom modules can name the buffer type without a direct dependency
pub use dasp_graph::Buffer;

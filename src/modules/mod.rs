//! Built-in modules
//!
//! Modules are organized into two categories:
//! - `source`: Generate signal (no inputs) - oscillators, clip players
//! - `effect`: Process signal (inputs → outputs) - gain, mixers, slew, feedback
//!
//! Parameters are addressed by the associated `u32` constants on each type.

pub mod effect;
pub mod source;

pub use effect::{FeedbackDelay, Gain, Mixer, SlewLimiter};
pub use source::{ClipPlayer, PolySine, Sine};

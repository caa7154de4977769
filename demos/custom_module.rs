//! Example: Creating a custom module
//!
//! This demonstrates how to implement the `Module` trait, register it under a
//! type tag, patch it into a rack, and render offline.
//!
//! Run with: cargo run --example custom_module

use klingt_rack::{
    BlockContext, Buffer, Inputs, LogicalId, Module, ModuleRegistry, Rack, RackConfig,
};
use tracing::info;

// =============================================================================
// Step 1: Define your module struct with internal state
// =============================================================================

/// A square wave oscillator with variable pulse width
///
/// Input 0 is pulse-width CV. When nothing is patched into it, the manual
/// `PULSE_WIDTH` parameter is used instead.
pub struct Square {
    frequency: f32,
    pulse_width: f32,
    amplitude: f32,
    phase: f32,
}

impl Square {
    pub const FREQUENCY: u32 = 0;
    pub const PULSE_WIDTH: u32 = 1;
    pub const AMPLITUDE: u32 = 2;

    /// Create a new square wave oscillator at the given frequency
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            pulse_width: 0.5, // Standard square wave
            amplitude: 0.25,  // -12dB, safe default
            phase: 0.0,
        }
    }
}

// =============================================================================
// Step 2: Implement Module
// =============================================================================

impl Module for Square {
    fn process(&mut self, ctx: &BlockContext, inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        let phase_inc = self.frequency / ctx.sample_rate as f32;
        let cv = inputs.get(0).filter(|_| inputs.is_connected(0));

        for (i, sample) in outputs[0].iter_mut().enumerate() {
            let width = cv.map_or(self.pulse_width, |cv| (0.5 + 0.5 * cv[i]).clamp(0.05, 0.95));
            // Square wave: high when phase < pulse width, low otherwise
            *sample = if self.phase < width {
                self.amplitude
            } else {
                -self.amplitude
            };

            self.phase += phase_inc;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }
    }

    fn set_param(&mut self, param: u32, value: f32) {
        match param {
            Self::FREQUENCY => self.frequency = value.max(0.0),
            Self::PULSE_WIDTH => self.pulse_width = value.clamp(0.0, 1.0),
            Self::AMPLITUDE => self.amplitude = value.clamp(0.0, 1.0),
            _ => {}
        }
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

// =============================================================================
// Main: Use the custom module just like built-in modules
// =============================================================================

fn main() -> klingt_rack::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut registry = ModuleRegistry::with_builtins();
    registry.register("square", || Box::new(Square::new(110.0)));

    let (rack, mut renderer) = Rack::new(RackConfig::default(), registry)?;

    let square = rack.add_module("square")?;
    let lfo = rack.add_module("sine")?;
    let gain = rack.add_module("gain")?;

    rack.set_param(lfo, 0, 0.5)?;
    rack.connect(lfo, 0, square, 0)?;
    rack.connect(square, 0, gain, 0)?;
    rack.connect(square, 0, gain, 1)?;
    rack.connect(gain, 0, LogicalId::MAIN_OUTPUT, 0)?;
    rack.connect(gain, 1, LogicalId::MAIN_OUTPUT, 1)?;
    rack.commit_changes()?;

    info!(order = ?rack.execution_order(), "patched");

    // One second of audio, rendered offline
    let mut block = [Buffer::SILENT, Buffer::SILENT];
    let mut energy = 0.0f64;
    let blocks = 48_000 / Buffer::LEN;
    for _ in 0..blocks {
        renderer.process(&[], &mut block);
        energy += block[0].iter().map(|&s| (s as f64).powi(2)).sum::<f64>();
    }
    let rms = (energy / (blocks * Buffer::LEN) as f64).sqrt();
    info!(rms, "rendered one second");

    // Unplug the LFO: the oscillator falls back to its manual pulse width
    rack.disconnect(lfo, 0, square, 0);
    rack.set_param(square, Square::PULSE_WIDTH, 0.25)?;
    rack.commit_changes()?;
    renderer.process(&[], &mut block);

    let json = serde_json::to_string_pretty(&rack.save_state()).unwrap_or_default();
    info!("patch state:\n{json}");
    Ok(())
}

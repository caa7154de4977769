//! Example: Live repatching while audio plays
//!
//! Builds a small polyphonic patch, plays an arpeggio through it, and swaps
//! cables while the output stream is running.
//!
//! Run with: cargo run --example patch_demo --features cpal_output

use std::thread::sleep;
use std::time::Duration;

use klingt_rack::{CpalDevice, LogicalId, NoteEvent, PatchError, Rack};
use tracing::info;

fn main() -> klingt_rack::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let device = CpalDevice::default_output().ok_or(PatchError::NoDevice)?;
    info!(device = device.name(), rate = device.sample_rate(), "using output");

    let (rack, renderer) = Rack::with_builtins(device.rack_config())?;

    let synth = rack.add_module("poly_sine")?;
    let amp = rack.add_module("gain")?;
    let echo = rack.add_module("feedback_delay")?;
    let drone = rack.add_module("sine")?;

    rack.set_param(drone, 0, 55.0)?;
    rack.connect(synth, 0, amp, 0)?;
    rack.connect(synth, 0, amp, 1)?;
    rack.connect(amp, 0, LogicalId::MAIN_OUTPUT, 0)?;
    rack.connect(amp, 1, LogicalId::MAIN_OUTPUT, 1)?;
    rack.commit_changes()?;

    let _stream = device.start(renderer)?;
    rack.transport().set_bpm(132.0);
    rack.transport().play();

    let arpeggio = [57u8, 60, 64, 69, 72, 69, 64, 60];
    for (step, &note) in arpeggio.iter().cycle().take(64).enumerate() {
        rack.send_note(NoteEvent::On {
            target: synth,
            note,
            velocity: 0.6,
        })?;
        sleep(Duration::from_millis(110));
        rack.send_note(NoteEvent::Off {
            target: synth,
            note,
        })?;

        match step {
            16 => {
                // Route the synth through a feedback loop
                rack.disconnect(synth, 0, amp, 0);
                rack.connect(synth, 0, echo, 0)?;
                rack.connect(echo, 0, amp, 0)?;
                rack.connect(amp, 0, echo, 1)?;
                rack.commit_changes()?;
                info!(order = ?rack.execution_order(), "feedback patched in");
            }
            32 => {
                rack.connect(drone, 0, amp, 1)?;
                rack.commit_changes()?;
            }
            48 => {
                rack.set_muted(drone, true)?;
            }
            _ => {}
        }

        let state = rack.transport().transport_state();
        if step % 8 == 0 {
            info!(beats = state.song_position_beats, "position");
        }
        rack.collect_garbage();
    }

    sleep(Duration::from_millis(500));
    Ok(())
}

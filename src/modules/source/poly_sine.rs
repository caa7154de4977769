//! Polyphonic sine synth driven by the voice manager

use dasp_graph::Buffer;

use crate::module::{BlockContext, Inputs, Module, VoiceEvent};

/// Upper bound on voices a single instance can sound
pub const MAX_VOICES: usize = 64;

#[derive(Clone, Copy, Default)]
struct SineVoice {
    phase: f32,
    frequency: f32,
    velocity: f32,
    gate: bool,
    /// Linear envelope level, ramps to 0 after note-off
    level: f32,
}

/// A bank of sine voices, one per voice-manager slot.
///
/// Note-on starts the voice immediately at full level; note-off fades it out
/// over [`RELEASE`](Self::RELEASE) seconds.
pub struct PolySine {
    voices: [SineVoice; MAX_VOICES],
    amplitude: f32,
    release_secs: f32,
}

impl PolySine {
    /// Master amplitude (0.0 - 1.0)
    pub const AMPLITUDE: u32 = 0;
    /// Release time in seconds
    pub const RELEASE: u32 = 1;

    pub fn new() -> Self {
        Self {
            voices: [SineVoice::default(); MAX_VOICES],
            amplitude: 0.2,
            release_secs: 0.05,
        }
    }

    /// Number of voices currently producing sound.
    pub fn sounding(&self) -> usize {
        self.voices.iter().filter(|v| v.level > 0.0).count()
    }
}

impl Default for PolySine {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn note_to_hz(note: u8) -> f32 {
    440.0 * ((note as f32 - 69.0) / 12.0).exp2()
}

impl Module for PolySine {
    fn process(&mut self, ctx: &BlockContext, _inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        let Some((first, rest)) = outputs.split_first_mut() else {
            return;
        };
        first.silence();

        let sample_rate = ctx.sample_rate as f32;
        let release_step = 1.0 / (self.release_secs * sample_rate).max(1.0);

        for voice in self.voices.iter_mut().filter(|v| v.level > 0.0) {
            let phase_inc = voice.frequency / sample_rate;
            let gain = voice.velocity * self.amplitude;

            for sample in first.iter_mut() {
                *sample += (voice.phase * core::f32::consts::TAU).sin() * gain * voice.level;

                voice.phase += phase_inc;
                voice.phase -= (voice.phase >= 1.0) as u32 as f32;
                if !voice.gate {
                    voice.level = (voice.level - release_step).max(0.0);
                }
            }
        }

        for buffer in rest.iter_mut() {
            buffer.copy_from_slice(first);
        }
    }

    fn set_param(&mut self, param: u32, value: f32) {
        match param {
            Self::AMPLITUDE => self.amplitude = value.clamp(0.0, 1.0),
            Self::RELEASE => self.release_secs = value.max(0.0),
            _ => {}
        }
    }

    fn is_polyphonic(&self) -> bool {
        true
    }

    fn voice_event(&mut self, event: VoiceEvent) {
        match event {
            VoiceEvent::NoteOn {
                voice,
                note,
                velocity,
            } => {
                if let Some(v) = self.voices.get_mut(voice) {
                    *v = SineVoice {
                        phase: 0.0,
                        frequency: note_to_hz(note),
                        velocity: velocity.clamp(0.0, 1.0),
                        gate: true,
                        level: 1.0,
                    };
                }
            }
            VoiceEvent::NoteOff { voice, .. } => {
                if let Some(v) = self.voices.get_mut(voice) {
                    v.gate = false;
                }
            }
            VoiceEvent::AllOff => {
                self.voices = [SineVoice::default(); MAX_VOICES];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn note_numbers_map_to_equal_temperament() {
        assert_relative_eq!(note_to_hz(69), 440.0);
        assert_relative_eq!(note_to_hz(81), 880.0, epsilon = 1e-3);
    }

    #[test]
    fn voices_follow_events() {
        let mut synth = PolySine::new();
        synth.voice_event(VoiceEvent::NoteOn {
            voice: 0,
            note: 60,
            velocity: 1.0,
        });
        synth.voice_event(VoiceEvent::NoteOn {
            voice: 3,
            note: 64,
            velocity: 1.0,
        });
        // Out of range slots are ignored
        synth.voice_event(VoiceEvent::NoteOn {
            voice: MAX_VOICES,
            note: 64,
            velocity: 1.0,
        });
        assert_eq!(synth.sounding(), 2);

        synth.voice_event(VoiceEvent::AllOff);
        assert_eq!(synth.sounding(), 0);
    }
}

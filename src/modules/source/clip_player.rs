//! Clip player that can drive the transport

use alloc::vec::Vec;

use dasp_graph::Buffer;

use crate::module::{BlockContext, Inputs, Module, TimelinePosition};

/// Plays pre-decoded interleaved samples.
///
/// Reports its playback position through [`Module::timeline`], so it can be
/// made the rack's timeline master and the transport will follow the clip.
pub struct ClipPlayer {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
    position: usize,
    playing: bool,
    volume: f32,
    looping: bool,
}

impl ClipPlayer {
    /// > 0.5 plays, otherwise pauses (keeps position)
    pub const PLAYING: u32 = 0;
    /// Playback volume (0.0 - 2.0)
    pub const VOLUME: u32 = 1;
    /// Seek to position in seconds
    pub const SEEK: u32 = 2;
    /// > 0.5 enables looping
    pub const LOOPING: u32 = 3;

    /// Create a player from interleaved samples
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
            position: 0,
            playing: true,
            volume: 1.0,
            looping: false,
        }
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        (self.samples.len() / self.channels) as f64 / self.sample_rate as f64
    }

    /// Get the current playback position in seconds
    #[inline]
    pub fn position_secs(&self) -> f64 {
        (self.position / self.channels) as f64 / self.sample_rate as f64
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    fn seek(&mut self, secs: f32) {
        let frame = (secs.max(0.0) as f64 * self.sample_rate as f64) as usize;
        self.position = (frame * self.channels).min(self.samples.len());
    }
}

impl Module for ClipPlayer {
    fn process(&mut self, _ctx: &BlockContext, _inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        if !self.playing {
            outputs.iter_mut().for_each(Buffer::silence);
            return;
        }

        let volume = self.volume;
        let src_channels = self.channels;
        let total_samples = self.samples.len();

        for i in 0..Buffer::LEN {
            if self.position >= total_samples {
                if self.looping && total_samples > 0 {
                    self.position = 0;
                } else {
                    for buffer in outputs.iter_mut() {
                        buffer[i..].iter_mut().for_each(|s| *s = 0.0);
                    }
                    self.playing = false;
                    return;
                }
            }

            for (ch, buffer) in outputs.iter_mut().enumerate() {
                let sample_idx = self.position + ch % src_channels;
                buffer[i] = self.samples.get(sample_idx).map_or(0.0, |s| s * volume);
            }

            self.position += src_channels;
        }
    }

    fn set_param(&mut self, param: u32, value: f32) {
        match param {
            Self::PLAYING => self.playing = value > 0.5,
            Self::VOLUME => self.volume = value.clamp(0.0, 2.0),
            Self::SEEK => self.seek(value),
            Self::LOOPING => self.looping = value > 0.5,
            _ => {}
        }
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.channels
    }

    fn timeline(&self) -> Option<TimelinePosition> {
        Some(TimelinePosition {
            position_seconds: self.position_secs(),
            duration_seconds: self.duration_secs(),
            active: self.playing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::LogicalId;
    use crate::transport::TransportState;
    use approx::assert_relative_eq;

    fn ctx() -> BlockContext {
        BlockContext {
            sample_rate: 1_000,
            block_size: Buffer::LEN,
            transport: TransportState::default(),
            module: LogicalId(1),
        }
    }

    #[test]
    fn plays_to_the_end_then_stops() {
        let clip: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut player = ClipPlayer::new(clip, 1, 1_000);
        let mut out = [Buffer::SILENT];

        player.process(&ctx(), &Inputs::new(&[], &[]), &mut out);
        assert_eq!(out[0][10], 10.0);
        assert_relative_eq!(player.timeline().unwrap().position_seconds, 0.064);

        player.process(&ctx(), &Inputs::new(&[], &[]), &mut out);
        assert_eq!(out[0][35], 99.0);
        assert_eq!(out[0][36], 0.0);
        assert!(!player.timeline().unwrap().active);
    }

    #[test]
    fn seek_and_loop() {
        let mut player = ClipPlayer::new(vec![0.5; 20], 2, 1_000).with_looping(true);
        player.set_param(ClipPlayer::SEEK, 0.005);
        assert_relative_eq!(player.position_secs(), 0.005);

        let mut out = [Buffer::SILENT, Buffer::SILENT];
        player.process(&ctx(), &Inputs::new(&[], &[]), &mut out);
        assert!(player.is_playing());
        assert!(out[1].iter().all(|&s| s == 0.5));
    }
}

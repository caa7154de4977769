//! Rack configuration.

use core::ops::RangeInclusive;

use crate::{PatchError, Result};

/// Number of samples in every processing block.
pub const BLOCK_SIZE: usize = dasp_graph::Buffer::LEN;

/// Configuration for a [`Rack`](crate::Rack) and its [`Renderer`](crate::Renderer).
///
/// Everything here is fixed for the lifetime of the rack except the active
/// voice count, which can be changed later up to `voice_capacity`.
#[derive(Debug, Clone)]
pub struct RackConfig {
    pub sample_rate: u32,
    /// Hardware input channels available for input mapping
    pub input_channels: usize,
    /// Channels on the main output bus
    pub output_channels: usize,
    pub max_voices: usize,
    /// Upper bound for `max_voices`; the voice bank never grows beyond it
    pub voice_capacity: usize,
    pub bpm_range: RangeInclusive<f64>,
    pub initial_bpm: f64,
    pub param_queue_capacity: usize,
    pub note_queue_capacity: usize,
    pub retire_queue_capacity: usize,
}

impl Default for RackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            input_channels: 2,
            output_channels: 2,
            max_voices: 8,
            voice_capacity: 64,
            bpm_range: 20.0..=999.0,
            initial_bpm: 120.0,
            param_queue_capacity: 64,
            note_queue_capacity: 256,
            retire_queue_capacity: 32,
        }
    }
}

impl RackConfig {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_input_channels(mut self, channels: usize) -> Self {
        self.input_channels = channels;
        self
    }

    pub fn with_output_channels(mut self, channels: usize) -> Self {
        self.output_channels = channels;
        self
    }

    pub fn with_max_voices(mut self, voices: usize) -> Self {
        self.max_voices = voices;
        self
    }

    pub fn with_voice_capacity(mut self, capacity: usize) -> Self {
        self.voice_capacity = capacity;
        self
    }

    pub fn with_bpm_range(mut self, range: RangeInclusive<f64>) -> Self {
        self.bpm_range = range;
        self
    }

    pub fn with_initial_bpm(mut self, bpm: f64) -> Self {
        self.initial_bpm = bpm;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(8_000..=384_000).contains(&self.sample_rate) {
            return Err(PatchError::InvalidConfig(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if self.output_channels == 0 {
            return Err(PatchError::InvalidConfig(
                "output_channels must be at least 1".into(),
            ));
        }
        if self.max_voices > self.voice_capacity {
            return Err(PatchError::InvalidConfig(format!(
                "max_voices {} exceeds voice_capacity {}",
                self.max_voices, self.voice_capacity
            )));
        }
        let (lo, hi) = (*self.bpm_range.start(), *self.bpm_range.end());
        if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && lo <= hi) {
            return Err(PatchError::InvalidConfig(format!(
                "bpm_range {lo}..={hi} is not a valid tempo range"
            )));
        }
        if !self.bpm_range.contains(&self.initial_bpm) {
            return Err(PatchError::InvalidConfig(format!(
                "initial_bpm {} outside {lo}..={hi}",
                self.initial_bpm
            )));
        }
        if self.param_queue_capacity == 0
            || self.note_queue_capacity == 0
            || self.retire_queue_capacity == 0
        {
            return Err(PatchError::InvalidConfig(
                "queue capacities must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RackConfig::default();
        assert_eq!(config.sample_rate, 48_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(RackConfig::default().with_sample_rate(100).validate().is_err());
        assert!(RackConfig::default().with_output_channels(0).validate().is_err());
        assert!(RackConfig::default()
            .with_max_voices(65)
            .validate()
            .is_err());
        assert!(RackConfig::default()
            .with_initial_bpm(10.0)
            .validate()
            .is_err());
        assert!(RackConfig::default()
            .with_bpm_range(200.0..=100.0)
            .with_initial_bpm(150.0)
            .validate()
            .is_err());
    }
}

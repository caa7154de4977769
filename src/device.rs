//! CPAL device discovery and output streams driving a [`Renderer`]

use alloc::string::String;
use alloc::vec::Vec;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, SupportedStreamConfig};

use crate::config::RackConfig;
use crate::renderer::Renderer;
use crate::{PatchError, Result};

/// Widest frame the stream callback converts on the stack
const MAX_CHANNELS: usize = 32;

/// A discovered audio output device
pub struct CpalDevice {
    device: cpal::Device,
    config: SupportedStreamConfig,
    name: String,
}

impl CpalDevice {
    /// Get the default output device
    pub fn default_output() -> Option<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        Self::from_device(device).ok()
    }

    /// List all available output devices
    pub fn list_outputs() -> Vec<Self> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| devices.filter_map(|d| Self::from_device(d).ok()).collect())
            .unwrap_or_default()
    }

    fn from_device(device: cpal::Device) -> Result<Self> {
        let config = device.default_output_config()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        Ok(Self {
            device,
            config,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels()
    }

    /// A default rack configuration matching this device's rate and width.
    pub fn rack_config(&self) -> RackConfig {
        RackConfig::default()
            .with_sample_rate(self.sample_rate())
            .with_output_channels(self.channels() as usize)
    }

    /// Start an output stream that pulls audio from `renderer`.
    ///
    /// The renderer moves into the stream callback; audio stops when the
    /// returned [`OutputStream`] is dropped.
    pub fn start(&self, renderer: Renderer) -> Result<OutputStream> {
        let stream_config = self.config.config();
        let stream = match self.config.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&self.device, &stream_config, renderer)?,
            SampleFormat::I16 => build_stream::<i16>(&self.device, &stream_config, renderer)?,
            SampleFormat::U16 => build_stream::<u16>(&self.device, &stream_config, renderer)?,
            format => {
                tracing::warn!(?format, "unsupported sample format");
                return Err(PatchError::BuildStream(
                    cpal::BuildStreamError::StreamConfigNotSupported,
                ));
            }
        };
        stream.play()?;
        tracing::debug!(device = %self.name, rate = self.sample_rate(), "output stream started");
        Ok(OutputStream { stream })
    }
}

/// A running output stream.
pub struct OutputStream {
    stream: cpal::Stream,
}

impl OutputStream {
    pub fn pause(&self) -> Result<()> {
        self.stream.pause().map_err(PatchError::from)
    }

    pub fn resume(&self) -> Result<()> {
        self.stream.play().map_err(PatchError::from)
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let width = channels.min(MAX_CHANNELS);
    let mut scratch = [0.0f32; MAX_CHANNELS];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels) {
                let rendered = &mut scratch[..width];
                renderer.render_interleaved(rendered, width);
                write_frame(frame, rendered);
            }
        },
        |err| tracing::error!(%err, "output stream error"),
        None,
    )?;
    Ok(stream)
}

/// Convert one rendered frame into the device format. Device channels past
/// the rendered ones get silence.
fn write_frame<T>(frame: &mut [T], rendered: &[f32])
where
    T: SizedSample + FromSample<f32>,
{
    let (head, tail) = frame.split_at_mut(rendered.len().min(frame.len()));
    for (out, &sample) in head.iter_mut().zip(rendered) {
        *out = T::from_sample(sample);
    }
    tail.fill(T::EQUILIBRIUM);
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::Sample;

    #[test]
    fn wide_frames_are_padded_with_silence() {
        let mut frame = [7i16; MAX_CHANNELS + 4];
        write_frame(&mut frame, &[0.0; MAX_CHANNELS]);
        assert!(frame.iter().all(|&s| s == 0));

        let mut frame = [1.0f32; 4];
        write_frame(&mut frame, &[0.5, -0.5]);
        assert_eq!(frame, [0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn unsigned_silence_is_the_midpoint() {
        let mut frame = [0u16; 3];
        write_frame(&mut frame, &[0.0]);
        assert_eq!(frame, [u16::EQUILIBRIUM; 3]);
    }
}

//! CPAL output stream rendering the software mixer.
//!
//! The callback mixes into a reusable `f32` scratch buffer and converts to the device sample
//! format. It never waits on the tick thread beyond the mixer's per-call lock.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::device::{pick_buffer_size, pick_device, pick_output_config};
use crate::mixer::{Mixer, OutputFormat};

/// Running output stream plus the mixer it renders.
///
/// The stream must stay on the thread that created it; dropping it stops playback.
pub struct AudioOutput {
    _stream: cpal::Stream,
    mixer: Mixer,
    device_name: String,
}

impl AudioOutput {
    /// Open `device` (substring match, or the default) and start rendering.
    pub fn open(device: Option<&str>, sample_rate: Option<u32>) -> Result<Self> {
        let host = cpal::default_host();
        let device = pick_device(&host, device)?;
        let device_name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "<unknown>".into());
        let supported = pick_output_config(&device, sample_rate)?;
        let mut config: cpal::StreamConfig = supported.config();
        if let Some(size) = pick_buffer_size(&supported) {
            config.buffer_size = size;
        }

        let mixer = Mixer::new(OutputFormat {
            channels: config.channels,
            sample_rate: config.sample_rate,
        });
        let stream = build_output_stream(&device, &config, supported.sample_format(), mixer.clone())?;
        stream.play().context("start output stream")?;
        tracing::info!(
            device = %device_name,
            rate = config.sample_rate,
            channels = config.channels,
            format = ?supported.sample_format(),
            "audio output started"
        );
        Ok(Self {
            _stream: stream,
            mixer,
            device_name,
        })
    }

    /// Handle for the tick thread; shares state with the callback.
    pub fn mixer(&self) -> Mixer {
        self.mixer.clone()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    mixer: Mixer,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, mixer),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, mixer),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, mixer),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, mixer),
        other => Err(anyhow!("unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(device: &cpal::Device, config: &cpal::StreamConfig, mixer: Mixer) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let err_fn = |err| tracing::warn!("output stream error: {err}");
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            scratch.resize(data.len(), 0.0);
            mixer.render(&mut scratch);
            for (out, s) in data.iter_mut().zip(&scratch) {
                *out = <T as cpal::Sample>::from_sample::<f32>(s.clamp(-1.0, 1.0));
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

// src/audio.rs

use std::sync::Arc;

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use tracing::{error, info};

use crate::engine::{EngineClock, SampleClock, SharedGraph, lock_graph};

/// Helper struct to hold output device info
pub struct OutputConfig {
    pub device: Device,
    pub config: StreamConfig,
    pub sample_format: SampleFormat,
    pub output_channels: usize,
    pub output_sample_rate: u32,
}

/// Finds the default audio output device and its config.
pub fn setup_output_device() -> anyhow::Result<OutputConfig> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;
    let supported_config = device.default_output_config()?;
    let sample_format = supported_config.sample_format();
    let config = supported_config.config();
    let output_channels = config.channels as usize;
    let output_sample_rate = config.sample_rate.0;

    info!(
        channels = output_channels,
        sample_rate = output_sample_rate,
        ?sample_format,
        "Output device selected."
    );

    Ok(OutputConfig {
        device,
        config,
        sample_format,
        output_channels,
        output_sample_rate,
    })
}

/// Keeps the device stream alive. The callback pulls blocks from the graph
/// and advances the sample clock by what it rendered.
pub struct OutputStream {
    _stream: Stream,
    pub sample_rate: u32,
    pub device_channels: usize,
}

impl OutputStream {
    pub fn start(
        output: OutputConfig,
        graph: SharedGraph,
        clock: Arc<SampleClock>,
    ) -> anyhow::Result<Self> {
        let OutputConfig {
            device,
            config,
            sample_format,
            output_channels,
            output_sample_rate,
        } = output;

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, output_channels, graph, clock)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, output_channels, graph, clock)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, output_channels, graph, clock)?,
            other => anyhow::bail!("Unsupported sample format: {:?}", other),
        };
        stream.play()?;

        Ok(Self {
            _stream: stream,
            sample_rate: output_sample_rate,
            device_channels: output_channels,
        })
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    device_channels: usize,
    graph: SharedGraph,
    clock: Arc<SampleClock>,
) -> anyhow::Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let engine_channels = lock_graph(&graph).channels();
    let device_channels = device_channels.max(1);
    let mut scratch: Vec<f32> = Vec::with_capacity(2048 * engine_channels);
    let err_fn = |err| error!(%err, "Output stream error.");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / device_channels;
            // A suspended clock renders silence and does not advance.
            if clock.is_suspended() {
                data.fill(T::from_sample(0.0f32));
                return;
            }

            scratch.resize(frames * engine_channels, 0.0);
            lock_graph(&graph).render(&mut scratch);

            for (frame, mix) in data
                .chunks_mut(device_channels)
                .zip(scratch.chunks_exact(engine_channels))
            {
                write_frame(frame, mix);
            }
            clock.advance(frames);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Maps one engine frame onto a device frame with soft clipping. A mono
/// device gets the average; extra device channels are silent.
fn write_frame<T: SizedSample + FromSample<f32>>(frame: &mut [T], mix: &[f32]) {
    if frame.len() == 1 && mix.len() > 1 {
        let mono = mix.iter().sum::<f32>() / mix.len() as f32;
        frame[0] = T::from_sample(mono.tanh());
        return;
    }
    for (c, out) in frame.iter_mut().enumerate() {
        let s = mix.get(c).copied().unwrap_or(0.0);
        *out = T::from_sample(s.tanh());
    }
}

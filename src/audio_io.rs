// src/audio_io.rs

use crate::audio_device::{find_host, find_input_device, find_output_device};
use crate::audio_engine::{channel, EngineLink, Recorder};
use crate::config::{EngineConfig, MAX_BLOCK_FRAMES};
use crate::error::{TapeError, TapeResult};
use crate::graph::{AudioGraph, Routing};
use crate::port_table::{LocalGraph, LocalScope, PortId};
use crate::settings::AppSettings;
use crate::transport::Transport;
use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
    StreamError,
};
use log::info;
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::Arc;

const DEFAULT_BLOCK_FRAMES: usize = 512;
/// Input kept queued ahead of the output callback, in blocks.
const INPUT_SAFETY_BLOCKS: usize = 2;

/// Duplex cpal streams with the device channels exposed through a [`LocalGraph`].
pub struct CpalGraph {
    graph: LocalGraph,
    input_stream: Stream,
    output_stream: Stream,
}

impl AudioGraph for CpalGraph {
    type Input = PortId;
    type Output = PortId;

    fn client_name(&self) -> &str {
        self.graph.client_name()
    }

    fn sample_rate(&self) -> u32 {
        self.graph.sample_rate()
    }

    fn block_size(&self) -> usize {
        self.graph.block_size()
    }

    fn default_routing(&self) -> Routing {
        self.graph.default_routing()
    }

    fn register_input_port(&mut self, name: &str) -> TapeResult<PortId> {
        self.graph.register_input_port(name)
    }

    fn register_output_port(&mut self, name: &str) -> TapeResult<PortId> {
        self.graph.register_output_port(name)
    }

    fn unregister_input_port(&mut self, port: PortId) -> TapeResult<()> {
        self.graph.unregister_input_port(port)
    }

    fn unregister_output_port(&mut self, port: PortId) -> TapeResult<()> {
        self.graph.unregister_output_port(port)
    }

    fn connect(&mut self, source_port: &str, dest_port: &str) -> TapeResult<()> {
        self.graph.connect(source_port, dest_port)
    }

    fn close(&mut self) -> TapeResult<()> {
        let paused = self
            .output_stream
            .pause()
            .and_then(|_| self.input_stream.pause());
        self.graph.close()?;
        paused.map_err(|e| TapeError::Backend(format!("Failed to stop audio streams: {}", e)))?;
        info!("Audio streams stopped");
        Ok(())
    }
}

fn stream_error_handler(transport: Arc<Transport>) -> impl FnMut(StreamError) + Send + 'static {
    move |err| match err {
        StreamError::DeviceNotAvailable => transport.mark_graph_lost("audio device not available"),
        _ => transport.note_xrun(),
    }
}

/// Opens the configured devices and runs the recorder inside the output callback.
pub fn start_cpal(settings: &AppSettings) -> Result<(CpalGraph, EngineLink<PortId, PortId>, EngineConfig)> {
    let host = find_host(settings.host_name.as_deref())?;
    let input_device = find_input_device(&host, settings.input_device.as_deref())?;
    let output_device = find_output_device(&host, settings.output_device.as_deref())?;
    info!("Using input device: {}", input_device.name()?);
    info!("Using output device: {}", output_device.name()?);

    let default_input_config = input_device.default_input_config()?;
    let default_output_config = output_device.default_output_config()?;
    let input_format = default_input_config.sample_format();
    let output_format = default_output_config.sample_format();

    let mut output_config: StreamConfig = default_output_config.into();
    if let Some(sr) = settings.sample_rate {
        output_config.sample_rate = cpal::SampleRate(sr);
    }
    if let Some(bs) = settings.buffer_size {
        output_config.buffer_size = BufferSize::Fixed(bs);
    }
    let mut input_config: StreamConfig = default_input_config.into();
    input_config.sample_rate = output_config.sample_rate;
    input_config.buffer_size = output_config.buffer_size.clone();

    let sample_rate = output_config.sample_rate.0;
    let block_size = match output_config.buffer_size {
        BufferSize::Fixed(size) => (size as usize).min(MAX_BLOCK_FRAMES),
        BufferSize::Default => DEFAULT_BLOCK_FRAMES,
    };
    let capture_channels = input_config.channels as usize;
    let playback_channels = output_config.channels as usize;

    let config = EngineConfig::from_settings(settings, sample_rate, block_size);
    config.validate()?;
    let (link, recorder) = channel(&config);

    let bridge = HeapRb::<f32>::new(MAX_BLOCK_FRAMES * capture_channels.max(1) * 4);
    let (input_producer, input_consumer) = bridge.split();

    let input_stream = match input_format {
        SampleFormat::F32 => build_input_stream::<f32>(&input_device, &input_config, input_producer, link.transport.clone())?,
        SampleFormat::I16 => build_input_stream::<i16>(&input_device, &input_config, input_producer, link.transport.clone())?,
        SampleFormat::U16 => build_input_stream::<u16>(&input_device, &input_config, input_producer, link.transport.clone())?,
        format => return Err(anyhow!("Unsupported input sample format {}", format)),
    };
    let bridge_input = InputBridge::new(input_consumer, capture_channels, block_size);
    let output_stream = match output_format {
        SampleFormat::F32 => build_output_stream::<f32>(&output_device, &output_config, bridge_input, recorder, link.transport.clone())?,
        SampleFormat::I16 => build_output_stream::<i16>(&output_device, &output_config, bridge_input, recorder, link.transport.clone())?,
        SampleFormat::U16 => build_output_stream::<u16>(&output_device, &output_config, bridge_input, recorder, link.transport.clone())?,
        format => return Err(anyhow!("Unsupported output sample format {}", format)),
    };
    input_stream.play()?;
    output_stream.play()?;

    info!(
        "Started streams with Sample Rate: {} Hz, Buffer Size: {} frames, {} in / {} out channels",
        sample_rate, block_size, capture_channels, playback_channels
    );

    let graph = CpalGraph {
        graph: LocalGraph::new(
            &settings.client_name,
            sample_rate,
            block_size,
            capture_channels,
            playback_channels,
        ),
        input_stream,
        output_stream,
    };
    Ok((graph, link, config))
}

fn build_input_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: HeapProducer<f32>,
    transport: Arc<Transport>,
) -> Result<Stream>
where
    T: Sample + SizedSample,
    f32: FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                if producer.push(f32::from_sample(sample)).is_err() {
                    // bridge full, drop sample
                    break;
                }
            }
        },
        stream_error_handler(transport),
        None,
    )?;
    Ok(stream)
}

/// Output-side end of the input bridge: deinterleaves whole frames into capture channels.
struct InputBridge {
    consumer: HeapConsumer<f32>,
    channels: usize,
    target_len: usize,
}

impl InputBridge {
    fn new(consumer: HeapConsumer<f32>, channels: usize, block_size: usize) -> Self {
        let channels = channels.max(1);
        Self {
            consumer,
            channels,
            target_len: block_size * INPUT_SAFETY_BLOCKS * channels,
        }
    }

    /// Fills `frames` samples of every capture channel, zero-padding an underrun.
    fn read(&mut self, capture: &mut [Vec<f32>], frames: usize) {
        let queued = self.consumer.len();
        if queued > self.target_len + frames * self.channels {
            let excess = queued - self.target_len;
            self.consumer.skip(excess - excess % self.channels);
        }

        let available = (self.consumer.len() / self.channels).min(frames);
        for frame in 0..available {
            for c in 0..self.channels {
                let sample = self.consumer.pop().unwrap_or(0.0);
                if let Some(channel) = capture.get_mut(c) {
                    channel[frame] = sample;
                }
            }
        }
        for channel in capture.iter_mut() {
            channel[available..frames].fill(0.0);
        }
    }
}

fn build_output_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut input: InputBridge,
    mut recorder: Recorder<PortId, PortId>,
    transport: Arc<Transport>,
) -> Result<Stream>
where
    T: Sample + SizedSample + FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let mut capture = vec![vec![0.0f32; MAX_BLOCK_FRAMES]; input.channels];
    let mut playback = vec![vec![0.0f32; MAX_BLOCK_FRAMES]; channels];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for piece in data.chunks_mut(MAX_BLOCK_FRAMES * channels) {
                let frames = piece.len() / channels;
                input.read(&mut capture, frames);
                {
                    let mut scope = LocalScope::new(frames, &capture, &mut playback);
                    recorder.process(&mut scope);
                }
                for (i, frame) in piece.chunks_mut(channels).enumerate() {
                    for (c, sample) in frame.iter_mut().enumerate() {
                        let value = playback.get(c).map_or(0.0, |ch| ch[i]);
                        *sample = T::from_sample(value);
                    }
                }
            }
        },
        stream_error_handler(transport),
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_deinterleaves_whole_frames() {
        let (mut producer, consumer) = HeapRb::<f32>::new(64).split();
        let mut bridge = InputBridge::new(consumer, 2, 16);
        for sample in [1.0, -1.0, 2.0, -2.0, 3.0] {
            producer.push(sample).unwrap();
        }

        let mut capture = vec![vec![9.0; 4]; 2];
        bridge.read(&mut capture, 4);
        assert_eq!(capture[0], vec![1.0, 2.0, 0.0, 0.0]);
        assert_eq!(capture[1], vec![-1.0, -2.0, 0.0, 0.0]);
        assert_eq!(bridge.consumer.len(), 1);
    }

    #[test]
    fn test_bridge_drops_excess_latency() {
        let (mut producer, consumer) = HeapRb::<f32>::new(256).split();
        let mut bridge = InputBridge::new(consumer, 1, 8);
        for i in 0..100 {
            producer.push(i as f32).unwrap();
        }

        let mut capture = vec![vec![0.0; 8]];
        bridge.read(&mut capture, 8);
        // 16 samples of safety are kept; the oldest were skipped.
        assert_eq!(capture[0][0], 84.0);
        assert_eq!(bridge.consumer.len(), 8);
    }
}

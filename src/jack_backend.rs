//! Native JACK backend for Linux.
//!
//! Track ports are real JACK ports registered at runtime under our client, so any other
//! client can be patched into or out of a track. The process callback owns the
//! [`Recorder`] outright; the control thread reaches it only through lock-free queues.

use crate::audio_engine::{channel, EngineLink, Recorder};
use crate::config::EngineConfig;
use crate::error::{TapeError, TapeResult};
use crate::graph::{AudioGraph, BlockScope, Routing};
use crate::settings::AppSettings;
use crate::transport::Transport;
use anyhow::{anyhow, Result};
use jack::{AudioIn, AudioOut, Client, ClientOptions, ClientStatus, Control, Port, ProcessScope};
use log::{info, warn};
use std::sync::Arc;

/// Upstream stereo pair new tracks record from by default.
const DEFAULT_SOURCES: [&str; 2] = ["effect_0:left_out", "effect_0:right_out"];
const DEFAULT_SINKS: [&str; 2] = ["system:playback_1", "system:playback_2"];

type JackRecorder = Recorder<Port<AudioIn>, Port<AudioOut>>;

struct JackScope<'a> {
    ps: &'a ProcessScope,
}

impl BlockScope<Port<AudioIn>, Port<AudioOut>> for JackScope<'_> {
    fn frames(&self) -> usize {
        self.ps.n_frames() as usize
    }

    fn read_input<'p>(&'p self, port: &'p Port<AudioIn>) -> &'p [f32] {
        port.as_slice(self.ps)
    }

    fn write_output(&mut self, port: &mut Port<AudioOut>, block: &[f32]) {
        let out = port.as_mut_slice(self.ps);
        let n = block.len().min(out.len());
        out[..n].copy_from_slice(&block[..n]);
        out[n..].fill(0.0);
    }
}

struct TapeProcessor {
    recorder: JackRecorder,
}

impl jack::ProcessHandler for TapeProcessor {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        let mut scope = JackScope { ps };
        self.recorder.process(&mut scope);
        Control::Continue
    }
}

struct TapeNotifications {
    transport: Arc<Transport>,
}

impl jack::NotificationHandler for TapeNotifications {
    fn xrun(&mut self, _client: &Client) -> Control {
        self.transport.note_xrun();
        Control::Continue
    }

    fn shutdown(&mut self, _status: ClientStatus, reason: &str) {
        self.transport.mark_graph_lost(reason);
    }
}

/// An activated JACK client hosting the recorder.
pub struct JackGraph {
    client: Option<jack::AsyncClient<TapeNotifications, TapeProcessor>>,
    client_name: String,
    sample_rate: u32,
    block_size: usize,
}

impl JackGraph {
    fn client(&self) -> TapeResult<&Client> {
        self.client
            .as_ref()
            .map(|active| active.as_client())
            .ok_or_else(|| TapeError::Backend("JACK client is closed".into()))
    }
}

/// Connects to the running JACK server and starts the recorder in its process callback.
///
/// Returns the graph together with the control link and the configuration sized for the
/// server's sample rate and buffer size.
pub fn start_jack(
    settings: &AppSettings,
) -> Result<(JackGraph, EngineLink<Port<AudioIn>, Port<AudioOut>>, EngineConfig)> {
    // JACK may rename us if another client has the same name.
    let (client, _status) = Client::new(&settings.client_name, ClientOptions::NO_START_SERVER)
        .map_err(|e| anyhow!("Failed to create JACK client: {}", e))?;
    let client_name = client.name().to_string();
    let sample_rate = client.sample_rate() as u32;
    let block_size = client.buffer_size() as usize;

    info!(
        "JACK client '{}' created (sample rate: {}Hz, buffer: {} frames, latency: {:.1}ms)",
        client_name,
        sample_rate,
        block_size,
        (block_size as f32 / sample_rate as f32) * 1000.0
    );

    let config = EngineConfig::from_settings(settings, sample_rate, block_size);
    config.validate()?;
    let (link, recorder) = channel(&config);

    let notifications = TapeNotifications {
        transport: link.transport.clone(),
    };
    let active = client
        .activate_async(notifications, TapeProcessor { recorder })
        .map_err(|e| anyhow!("Failed to activate JACK client: {}", e))?;
    info!("JACK client activated");

    let graph = JackGraph {
        client: Some(active),
        client_name,
        sample_rate,
        block_size,
    };
    Ok((graph, link, config))
}

impl AudioGraph for JackGraph {
    type Input = Port<AudioIn>;
    type Output = Port<AudioOut>;

    fn client_name(&self) -> &str {
        &self.client_name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn default_routing(&self) -> Routing {
        Routing::new(
            DEFAULT_SOURCES.map(String::from),
            DEFAULT_SINKS.map(String::from),
        )
    }

    fn register_input_port(&mut self, name: &str) -> TapeResult<Port<AudioIn>> {
        self.client()?
            .register_port(name, AudioIn::default())
            .map_err(|e| TapeError::PortRegistration {
                port: name.to_string(),
                reason: e.to_string(),
            })
    }

    fn register_output_port(&mut self, name: &str) -> TapeResult<Port<AudioOut>> {
        self.client()?
            .register_port(name, AudioOut::default())
            .map_err(|e| TapeError::PortRegistration {
                port: name.to_string(),
                reason: e.to_string(),
            })
    }

    fn unregister_input_port(&mut self, port: Port<AudioIn>) -> TapeResult<()> {
        self.client()?
            .unregister_port(port)
            .map_err(|e| TapeError::Backend(format!("Failed to unregister port: {}", e)))
    }

    fn unregister_output_port(&mut self, port: Port<AudioOut>) -> TapeResult<()> {
        self.client()?
            .unregister_port(port)
            .map_err(|e| TapeError::Backend(format!("Failed to unregister port: {}", e)))
    }

    fn connect(&mut self, source_port: &str, dest_port: &str) -> TapeResult<()> {
        self.client()?
            .connect_ports_by_name(source_port, dest_port)
            .map_err(|e| TapeError::Connection {
                from_port: source_port.to_string(),
                to_port: dest_port.to_string(),
                reason: e.to_string(),
            })
    }

    /// Deactivates the client, takes the recorder back and unregisters every track port.
    fn close(&mut self) -> TapeResult<()> {
        let Some(active) = self.client.take() else {
            return Ok(());
        };
        let (client, _notifications, processor) = active
            .deactivate()
            .map_err(|e| TapeError::Backend(format!("Failed to deactivate JACK client: {}", e)))?;

        let mut released = 0;
        for track in processor.recorder.into_tracks() {
            let (inputs, outputs) = track.into_ports();
            for port in inputs {
                match client.unregister_port(port) {
                    Ok(()) => released += 1,
                    Err(e) => warn!("Failed to unregister input port: {}", e),
                }
            }
            for port in outputs {
                match client.unregister_port(port) {
                    Ok(()) => released += 1,
                    Err(e) => warn!("Failed to unregister output port: {}", e),
                }
            }
        }
        info!("JACK client '{}' closed, {} ports released", self.client_name, released);
        Ok(())
    }
}

//! In-process audio graph.
//!
//! Used where no external graph server owns the ports: the cpal backend and the tests.
//! External endpoints are the device channels, addressed JACK-style as
//! `system:capture_N` and `system:playback_N` (1-based). Several track outputs wired to
//! the same playback channel are summed.

use crate::config::MAX_BLOCK_FRAMES;
use crate::error::{TapeError, TapeResult};
use crate::graph::{full_port_name, AudioGraph, BlockScope, Routing};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const SYSTEM_CLIENT: &str = "system";
const MAX_CHANNELS: usize = 64;

static SILENCE: [f32; MAX_BLOCK_FRAMES] = [0.0; MAX_BLOCK_FRAMES];

/// Handle of a local port.
///
/// The route is shared with the graph so connections made after registration reach the
/// audio thread. For an input it holds `capture channel + 1` (0 = unconnected); for an
/// output, a bitmask of playback channels.
#[derive(Clone, Debug, Default)]
pub struct PortId {
    route: Arc<AtomicU64>,
}

impl PortId {
    pub fn unconnected() -> Self {
        Self::default()
    }

    /// Input already wired to a capture channel (0-based).
    pub fn capture(channel: usize) -> Self {
        Self {
            route: Arc::new(AtomicU64::new(channel as u64 + 1)),
        }
    }

    /// Output already wired to a playback channel (0-based).
    pub fn playback(channel: usize) -> Self {
        Self {
            route: Arc::new(AtomicU64::new(1 << channel)),
        }
    }

    fn source(&self) -> Option<usize> {
        match self.route.load(Ordering::Acquire) {
            0 => None,
            n => Some(n as usize - 1),
        }
    }

    fn sinks(&self) -> u64 {
        self.route.load(Ordering::Acquire)
    }

    fn set_source(&self, channel: usize) {
        self.route.store(channel as u64 + 1, Ordering::Release);
    }

    fn add_sink(&self, channel: usize) {
        self.route.fetch_or(1 << channel, Ordering::AcqRel);
    }

    fn same_port(&self, other: &PortId) -> bool {
        Arc::ptr_eq(&self.route, &other.route)
    }

    fn disconnect(&self) {
        self.route.store(0, Ordering::Release);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

struct PortEntry {
    port: PortId,
    direction: Direction,
}

/// Parses `system:capture_3` style names into a 0-based channel.
fn system_channel(name: &str, kind: &str) -> Option<usize> {
    let (client, port) = name.split_once(':')?;
    if client != SYSTEM_CLIENT {
        return None;
    }
    let number: usize = port.strip_prefix(kind)?.strip_prefix('_')?.parse().ok()?;
    number.checked_sub(1)
}

/// Control-thread side of the in-process graph.
pub struct LocalGraph {
    client_name: String,
    sample_rate: u32,
    block_size: usize,
    capture_channels: usize,
    playback_channels: usize,
    ports: BTreeMap<String, PortEntry>,
    connections: Vec<(String, String)>,
    registrations: usize,
}

impl LocalGraph {
    pub fn new(
        client_name: &str,
        sample_rate: u32,
        block_size: usize,
        capture_channels: usize,
        playback_channels: usize,
    ) -> Self {
        Self {
            client_name: client_name.to_string(),
            sample_rate,
            block_size,
            capture_channels: capture_channels.min(MAX_CHANNELS),
            playback_channels: playback_channels.min(MAX_CHANNELS),
            ports: BTreeMap::new(),
            connections: Vec::new(),
            registrations: 0,
        }
    }

    pub fn capture_channels(&self) -> usize {
        self.capture_channels
    }

    pub fn playback_channels(&self) -> usize {
        self.playback_channels
    }

    /// Total successful port registrations since creation.
    pub fn registration_count(&self) -> usize {
        self.registrations
    }

    pub fn port_names(&self) -> impl Iterator<Item = &str> {
        self.ports.keys().map(String::as_str)
    }

    pub fn connections(&self) -> &[(String, String)] {
        &self.connections
    }

    fn register(&mut self, name: &str, direction: Direction) -> TapeResult<PortId> {
        let full_name = full_port_name(&self.client_name, name);
        if self.ports.contains_key(&full_name) {
            return Err(TapeError::PortRegistration {
                port: full_name,
                reason: "port already exists".into(),
            });
        }
        let port = PortId::unconnected();
        self.ports.insert(
            full_name,
            PortEntry {
                port: port.clone(),
                direction,
            },
        );
        self.registrations += 1;
        Ok(port)
    }

    fn unregister(&mut self, port: &PortId, direction: Direction) -> TapeResult<()> {
        let name = self
            .ports
            .iter()
            .find(|(_, entry)| entry.direction == direction && entry.port.same_port(port))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| TapeError::Backend("port is not registered".into()))?;
        self.ports.remove(&name);
        port.disconnect();
        self.connections.retain(|(from, to)| *from != name && *to != name);
        Ok(())
    }

    fn connection_error(source: &str, dest: &str, reason: &str) -> TapeError {
        TapeError::Connection {
            from_port: source.to_string(),
            to_port: dest.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl AudioGraph for LocalGraph {
    type Input = PortId;
    type Output = PortId;

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
        let right_in = if self.capture_channels >= 2 { 2 } else { 1 };
        let right_out = if self.playback_channels >= 2 { 2 } else { 1 };
        Routing::new(
            [
                "system:capture_1".to_string(),
                format!("system:capture_{}", right_in),
            ],
            [
                "system:playback_1".to_string(),
                format!("system:playback_{}", right_out),
            ],
        )
    }

    fn register_input_port(&mut self, name: &str) -> TapeResult<PortId> {
        self.register(name, Direction::Input)
    }

    fn register_output_port(&mut self, name: &str) -> TapeResult<PortId> {
        self.register(name, Direction::Output)
    }

    fn unregister_input_port(&mut self, port: PortId) -> TapeResult<()> {
        self.unregister(&port, Direction::Input)
    }

    fn unregister_output_port(&mut self, port: PortId) -> TapeResult<()> {
        self.unregister(&port, Direction::Output)
    }

    fn connect(&mut self, source_port: &str, dest_port: &str) -> TapeResult<()> {
        if let Some(channel) = system_channel(source_port, "capture") {
            if channel >= self.capture_channels {
                return Err(Self::connection_error(source_port, dest_port, "no such capture channel"));
            }
            match self.ports.get(dest_port) {
                Some(entry) if entry.direction == Direction::Input => entry.port.set_source(channel),
                _ => return Err(Self::connection_error(source_port, dest_port, "unknown input port")),
            }
        } else if let Some(channel) = system_channel(dest_port, "playback") {
            if channel >= self.playback_channels {
                return Err(Self::connection_error(source_port, dest_port, "no such playback channel"));
            }
            match self.ports.get(source_port) {
                Some(entry) if entry.direction == Direction::Output => entry.port.add_sink(channel),
                _ => return Err(Self::connection_error(source_port, dest_port, "unknown output port")),
            }
        } else {
            return Err(Self::connection_error(source_port, dest_port, "unknown port"));
        }
        self.connections
            .push((source_port.to_string(), dest_port.to_string()));
        Ok(())
    }

    fn close(&mut self) -> TapeResult<()> {
        for entry in self.ports.values() {
            entry.port.disconnect();
        }
        self.ports.clear();
        self.connections.clear();
        Ok(())
    }
}

/// Audio-thread view of one block: deinterleaved device input and output channels.
pub struct LocalScope<'a> {
    frames: usize,
    capture: &'a [Vec<f32>],
    playback: &'a mut [Vec<f32>],
}

impl<'a> LocalScope<'a> {
    /// Zeroes the first `frames` samples of every playback channel; outputs are summed in.
    pub fn new(frames: usize, capture: &'a [Vec<f32>], playback: &'a mut [Vec<f32>]) -> Self {
        for channel in playback.iter_mut() {
            let n = frames.min(channel.len());
            channel[..n].fill(0.0);
        }
        Self {
            frames,
            capture,
            playback,
        }
    }
}

impl BlockScope<PortId, PortId> for LocalScope<'_> {
    fn frames(&self) -> usize {
        self.frames
    }

    fn read_input<'p>(&'p self, port: &'p PortId) -> &'p [f32] {
        match port.source().and_then(|c| self.capture.get(c)) {
            Some(channel) => &channel[..self.frames.min(channel.len())],
            None => &SILENCE[..self.frames.min(MAX_BLOCK_FRAMES)],
        }
    }

    fn write_output(&mut self, port: &mut PortId, block: &[f32]) {
        let sinks = port.sinks();
        for (index, channel) in self.playback.iter_mut().enumerate().take(MAX_CHANNELS) {
            if sinks & (1 << index) != 0 {
                for (out, sample) in channel.iter_mut().zip(block) {
                    *out += sample;
                }
            }
        }
    }
}

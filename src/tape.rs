//! Control-thread side of the tape: transport commands and track lifecycle.
//!
//! ```text
//! ┌──────────────────┐  atomics (flags, active track, seek)  ┌─────────────────────┐
//! │  Control thread  │──────────────────────────────────────►│   Audio callback    │
//! │   Tape<G>        │  AddTrack / Clear (lock-free SPSC)    │   Recorder<I, O>    │
//! │                  │──────────────────────────────────────►│                     │
//! │                  │  sample chunks (lock-free SPSC)       │                     │
//! │                  │──────────────────────────────────────►│                     │
//! │                  │◄──────────────────────────────────────│                     │
//! └──────────────────┘  EngineEvent (lock-free SPSC)         └─────────────────────┘
//! ```

use crate::audio_engine::{AudioCommand, EngineEvent, EngineLink, Track};
use crate::config::EngineConfig;
use crate::error::{TapeError, TapeResult};
use crate::graph::{
    full_port_name, track_input_name, track_output_name, AudioGraph, Channel, Routing,
};
use crate::sample_buffer::ChunkPool;
use crate::transport::{Transport, TransportState};
use log::{debug, error, info, warn};
use ringbuf::{HeapConsumer, HeapProducer};
use std::fmt;
use std::sync::Arc;

/// Observable state of one track.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackSnapshot {
    pub index: usize,
    pub length: usize,
    pub cursor: usize,
    pub audible: bool,
    pub faulted: bool,
}

/// Point-in-time view of the tape for UIs and the console.
#[derive(Clone, Debug, PartialEq)]
pub struct TapeStatus {
    pub state: TransportState,
    pub active_track: usize,
    pub sample_rate: u32,
    pub tracks: Vec<TrackSnapshot>,
    pub xrun_count: usize,
    pub dsp_load: f32,
}

impl fmt::Display for TapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:?}, track {} active, load {:.0}%, {} xruns",
            self.state,
            self.active_track,
            self.dsp_load * 100.0,
            self.xrun_count
        )?;
        let rate = self.sample_rate.max(1) as f64;
        for track in &self.tracks {
            writeln!(
                f,
                "  track{}: {:.2}s at {:.2}s{}{}",
                track.index,
                track.length as f64 / rate,
                track.cursor as f64 / rate,
                if track.audible { "" } else { " (muted)" },
                if track.faulted { " (out of memory)" } else { "" },
            )?;
        }
        Ok(())
    }
}

/// Explicit engine state owned by the control thread.
pub struct Tape<G: AudioGraph> {
    graph: G,
    config: EngineConfig,
    routing: Routing,
    transport: Arc<Transport>,
    command_producer: HeapProducer<AudioCommand<G::Input, G::Output>>,
    event_consumer: HeapConsumer<EngineEvent>,
    chunk_pool: ChunkPool,
    track_count: usize,
    reported_xruns: usize,
    closed: bool,
}

impl<G: AudioGraph> Tape<G> {
    /// Takes over the control side of an engine whose recorder is already running inside
    /// `graph`, and creates track 0.
    pub fn new(
        graph: G,
        link: EngineLink<G::Input, G::Output>,
        config: EngineConfig,
    ) -> TapeResult<Self> {
        config.validate()?;
        let routing = config
            .routing
            .clone()
            .unwrap_or_else(|| graph.default_routing());

        let mut tape = Self {
            graph,
            config,
            routing,
            transport: link.transport,
            command_producer: link.command_producer,
            event_consumer: link.event_consumer,
            chunk_pool: link.chunk_pool,
            track_count: 0,
            reported_xruns: 0,
            closed: false,
        };
        tape.select_track(0)?;
        Ok(tape)
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn track_count(&self) -> usize {
        self.track_count
    }

    pub fn active_track(&self) -> usize {
        self.transport.active_track()
    }

    pub fn set_recording(&mut self, is_recording: bool) {
        self.transport.set_recording(is_recording);
        info!("Recording {}", if is_recording { "on" } else { "off" });
    }

    pub fn set_playing(&mut self, is_playing: bool) {
        self.transport.set_playing(is_playing);
        info!("Playback {}", if is_playing { "on" } else { "off" });
    }

    /// Makes `index` the active track, creating it (and any lower missing index) first.
    pub fn select_track(&mut self, index: usize) -> TapeResult<()> {
        let max = self.config.max_tracks;
        if index >= max {
            return Err(TapeError::InvalidTrackIndex { index, max });
        }
        while self.track_count <= index {
            self.create_track(self.track_count)?;
        }
        self.transport.set_active_track(index);
        info!("Switched to track {}", index);
        Ok(())
    }

    fn create_track(&mut self, index: usize) -> TapeResult<()> {
        if self.command_producer.is_full() {
            return Err(TapeError::CommandQueueFull);
        }

        let (inputs, outputs) = self.register_track_ports(index)?;
        self.connect_track(index);

        let track = Track::new(
            index,
            inputs,
            outputs,
            self.config.max_chunks(),
            self.config.prealloc_chunks(),
        );
        if let Some(status) = self.transport.track(index) {
            status.set_audible(true);
        }
        if let Err(AudioCommand::AddTrack(track)) =
            self.command_producer.push(AudioCommand::AddTrack(Box::new(track)))
        {
            let (inputs, outputs) = (*track).into_ports();
            return Err(self.release_ports(
                TapeError::CommandQueueFull,
                Vec::from(inputs),
                Vec::from(outputs),
            ));
        }
        self.track_count += 1;
        info!("Created track {}", index);
        Ok(())
    }

    /// Registers the four ports of a track, or none of them.
    fn register_track_ports(
        &mut self,
        index: usize,
    ) -> TapeResult<([G::Input; 2], [G::Output; 2])> {
        let left_in = self
            .graph
            .register_input_port(&track_input_name(index, Channel::Left))?;
        let right_in = match self
            .graph
            .register_input_port(&track_input_name(index, Channel::Right))
        {
            Ok(port) => port,
            Err(e) => return Err(self.release_ports(e, vec![left_in], Vec::new())),
        };
        let left_out = match self
            .graph
            .register_output_port(&track_output_name(index, Channel::Left))
        {
            Ok(port) => port,
            Err(e) => return Err(self.release_ports(e, vec![left_in, right_in], Vec::new())),
        };
        let right_out = match self
            .graph
            .register_output_port(&track_output_name(index, Channel::Right))
        {
            Ok(port) => port,
            Err(e) => {
                return Err(self.release_ports(e, vec![left_in, right_in], vec![left_out]))
            }
        };
        Ok(([left_in, right_in], [left_out, right_out]))
    }

    /// Unregisters ports of a track that never went online; returns `error` for the caller.
    fn release_ports(
        &mut self,
        error: TapeError,
        inputs: Vec<G::Input>,
        outputs: Vec<G::Output>,
    ) -> TapeError {
        for port in inputs {
            if let Err(e) = self.graph.unregister_input_port(port) {
                warn!("Failed to release port: {}", e);
            }
        }
        for port in outputs {
            if let Err(e) = self.graph.unregister_output_port(port) {
                warn!("Failed to release port: {}", e);
            }
        }
        error
    }

    fn connect_track(&mut self, index: usize) {
        let client = self.graph.client_name().to_string();
        for channel in Channel::BOTH {
            let c = channel.index();
            let input = full_port_name(&client, &track_input_name(index, channel));
            let output = full_port_name(&client, &track_output_name(index, channel));
            let links = [
                (self.routing.sources[c].clone(), input),
                (output, self.routing.sinks[c].clone()),
            ];
            for (source, dest) in links {
                if let Err(e) = self.graph.connect(&source, &dest) {
                    warn!("Auto-connect failed: {}", e);
                }
            }
        }
    }

    /// Repositions every track. Applied by the audio thread at the start of its next block.
    pub fn seek(&mut self, time_sec: f64) -> TapeResult<()> {
        if !time_sec.is_finite() || time_sec < 0.0 {
            return Err(TapeError::InvalidSeek(time_sec));
        }
        let frame = (time_sec * self.config.sample_rate as f64).round() as usize;
        self.transport.request_seek(frame);
        info!("Seeked to {}s", time_sec);
        Ok(())
    }

    pub fn clear_active_track(&mut self) -> TapeResult<()> {
        self.ensure_not_recording()?;
        let index = self.transport.active_track();
        self.push_command(AudioCommand::ClearTrack(index))?;
        info!("Track {} cleared", index);
        Ok(())
    }

    pub fn clear_all_tracks(&mut self) -> TapeResult<()> {
        self.ensure_not_recording()?;
        self.push_command(AudioCommand::ClearAll)?;
        info!("Tape cleared");
        Ok(())
    }

    /// Includes or excludes a track from the playback mix.
    pub fn set_track_audible(&mut self, index: usize, audible: bool) -> TapeResult<()> {
        if index >= self.track_count {
            return Err(TapeError::InvalidTrackIndex {
                index,
                max: self.track_count,
            });
        }
        if let Some(status) = self.transport.track(index) {
            status.set_audible(audible);
        }
        info!(
            "Track {} {}",
            index,
            if audible { "unmuted" } else { "muted" }
        );
        Ok(())
    }

    pub fn halt(&mut self) {
        self.transport.set_playing(false);
        self.transport.set_recording(false);
        info!("stop");
    }

    fn ensure_not_recording(&self) -> TapeResult<()> {
        if self.transport.is_recording() {
            return Err(TapeError::PreconditionViolation(
                "tracks cannot be cleared while recording",
            ));
        }
        Ok(())
    }

    fn push_command(&mut self, command: AudioCommand<G::Input, G::Output>) -> TapeResult<()> {
        self.command_producer
            .push(command)
            .map_err(|_| TapeError::CommandQueueFull)
    }

    /// Tops up the chunk feed. Returns the number of chunks allocated.
    pub fn maintain(&mut self) -> usize {
        self.chunk_pool.refill()
    }

    /// Drains and logs audio-thread events, reports xruns and refills the chunk feed.
    ///
    /// Fails with [`TapeError::GraphDisconnected`] once the backend lost its graph; the
    /// caller should then [`shutdown`](Tape::shutdown).
    pub fn poll(&mut self) -> TapeResult<Vec<EngineEvent>> {
        if self.transport.is_graph_lost() {
            return Err(TapeError::GraphDisconnected(
                self.transport.disconnect_reason(),
            ));
        }

        let xruns = self.transport.xrun_count();
        if xruns > self.reported_xruns {
            error!(
                "xrun: audio graph reported {} overrun(s)",
                xruns - self.reported_xruns
            );
            self.reported_xruns = xruns;
        }

        let mut events = Vec::new();
        while let Some(event) = self.event_consumer.pop() {
            match event {
                EngineEvent::TrackOnline { track } => debug!("Track {} online", track),
                EngineEvent::Cleared { track } => debug!("Track {} truncated", track),
                EngineEvent::Looped { track } => debug!("loop (track {})", track),
                EngineEvent::OutOfMemory { track } => {
                    error!("{}", TapeError::OutOfMemory { track })
                }
                EngineEvent::DeadlineMiss {
                    elapsed_us,
                    budget_us,
                } => error!(
                    "xrun: running {:.1} ms behind",
                    elapsed_us.saturating_sub(budget_us) as f32 / 1000.0
                ),
                EngineEvent::OversizedBlock { frames } => warn!(
                    "Audio graph delivered {} frames, more than the pre-allocated block",
                    frames
                ),
            }
            events.push(event);
        }

        self.maintain();
        Ok(events)
    }

    pub fn status(&self) -> TapeStatus {
        let tracks = (0..self.track_count)
            .filter_map(|index| {
                self.transport.track(index).map(|s| TrackSnapshot {
                    index,
                    length: s.length(),
                    cursor: s.cursor(),
                    audible: s.is_audible(),
                    faulted: s.is_faulted(),
                })
            })
            .collect();
        TapeStatus {
            state: self.transport.state(),
            active_track: self.transport.active_track(),
            sample_rate: self.config.sample_rate,
            tracks,
            xrun_count: self.transport.xrun_count(),
            dsp_load: self.transport.dsp_load(),
        }
    }

    /// Stops the transport, stops the graph and releases every track port.
    pub fn shutdown(&mut self) -> TapeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.halt();
        self.closed = true;
        self.graph.close()?;
        info!("Tape shut down ({} tracks released)", self.track_count);
        Ok(())
    }
}

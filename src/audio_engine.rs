// src/audio_engine.rs

mod command;
mod track;

pub use command::{AudioCommand, EngineEvent};
pub use track::Track;

use crate::config::{EngineConfig, MAX_BLOCK_FRAMES};
use crate::graph::{BlockScope, Channel};
use crate::sample_buffer::{ChunkFeed, ChunkPool};
use crate::transport::Transport;
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::Arc;
use std::time::Instant;

/// Control-thread ends of the queues connecting to a [`Recorder`].
pub struct EngineLink<I, O> {
    pub transport: Arc<Transport>,
    pub command_producer: HeapProducer<AudioCommand<I, O>>,
    pub event_consumer: HeapConsumer<EngineEvent>,
    pub chunk_pool: ChunkPool,
}

/// Builds a recorder and the control-thread link that drives it.
pub fn channel<I, O>(config: &EngineConfig) -> (EngineLink<I, O>, Recorder<I, O>) {
    let transport = Arc::new(Transport::new(config.max_tracks));
    let (command_producer, command_consumer) =
        HeapRb::<AudioCommand<I, O>>::new(config.command_capacity.max(1)).split();
    let (event_producer, event_consumer) =
        HeapRb::<EngineEvent>::new(config.event_capacity.max(1)).split();
    let (mut chunk_pool, chunk_feed) = ChunkPool::new(config.pool_chunks);
    chunk_pool.refill();

    let recorder = Recorder::new(
        config,
        transport.clone(),
        command_consumer,
        event_producer,
        chunk_feed,
    );
    let link = EngineLink {
        transport,
        command_producer,
        event_consumer,
        chunk_pool,
    };
    (link, recorder)
}

/// The real-time half of the tape. Owned by the audio callback.
///
/// [`process`](Recorder::process) never allocates, frees, blocks or fails: tracks and
/// chunks arrive ready-made from the control thread, and problems are reported as
/// [`EngineEvent`]s.
pub struct Recorder<I, O> {
    transport: Arc<Transport>,
    command_consumer: HeapConsumer<AudioCommand<I, O>>,
    event_producer: HeapProducer<EngineEvent>,
    chunk_feed: ChunkFeed,
    tracks: Vec<Box<Track<I, O>>>,
    scratch: Vec<f32>,
    sample_rate: f32,
}

impl<I, O> Recorder<I, O> {
    pub fn new(
        config: &EngineConfig,
        transport: Arc<Transport>,
        command_consumer: HeapConsumer<AudioCommand<I, O>>,
        event_producer: HeapProducer<EngineEvent>,
        chunk_feed: ChunkFeed,
    ) -> Self {
        Self {
            transport,
            command_consumer,
            event_producer,
            chunk_feed,
            tracks: Vec::with_capacity(config.max_tracks),
            scratch: vec![0.0; config.block_size.max(MAX_BLOCK_FRAMES)],
            sample_rate: config.sample_rate as f32,
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<&Track<I, O>> {
        self.tracks.get(index).map(|t| t.as_ref())
    }

    /// Hands back every track, e.g. to unregister its ports after the graph stopped.
    pub fn into_tracks(self) -> Vec<Box<Track<I, O>>> {
        self.tracks
    }

    fn emit(events: &mut HeapProducer<EngineEvent>, event: EngineEvent) {
        // A full queue means the control thread is behind; the event is dropped.
        let _ = events.push(event);
    }

    pub fn handle_commands(&mut self) {
        while let Some(command) = self.command_consumer.pop() {
            match command {
                AudioCommand::AddTrack(track) => {
                    let index = track.index;
                    debug_assert!(
                        self.tracks.len() < self.tracks.capacity(),
                        "track count is bounded by the control thread"
                    );
                    if let Some(status) = self.transport.track(index) {
                        status.publish(0, 0);
                        status.set_faulted(false);
                    }
                    self.tracks.push(track);
                    Self::emit(&mut self.event_producer, EngineEvent::TrackOnline { track: index });
                }
                AudioCommand::ClearTrack(index) => self.clear_track(index),
                AudioCommand::ClearAll => {
                    for index in 0..self.tracks.len() {
                        self.clear_track(index);
                    }
                }
            }
        }
    }

    fn clear_track(&mut self, index: usize) {
        if let Some(track) = self.tracks.get_mut(index) {
            track.clear();
            if let Some(status) = self.transport.track(index) {
                status.publish(0, 0);
                status.set_faulted(false);
            }
            Self::emit(&mut self.event_producer, EngineEvent::Cleared { track: index });
        }
    }

    /// Processes one block. This is the real-time entry point.
    pub fn process<S: BlockScope<I, O>>(&mut self, scope: &mut S) {
        let start_time = Instant::now();
        // Loaded first: a track published as active was queued before its index was stored.
        let recording = self.transport.is_recording();
        let playing = self.transport.is_playing();
        let active = self.transport.active_track();
        self.handle_commands();

        if let Some(frame) = self.transport.take_seek() {
            for track in self.tracks.iter_mut() {
                track.seek(frame);
            }
        }

        let frames = scope.frames();
        let n = frames.min(self.scratch.len());
        if n < frames {
            Self::emit(&mut self.event_producer, EngineEvent::OversizedBlock { frames });
        }

        // --- Record ---
        if recording {
            if let Some(track) = self.tracks.get_mut(active) {
                if !track.faulted {
                    if track.reserve(n, &mut self.chunk_feed) {
                        for channel in Channel::BOTH {
                            let c = channel.index();
                            let input = scope.read_input(&track.inputs[c]);
                            let len = input.len().min(n);
                            track.buffers[c].append(&input[..len]);
                        }
                    } else {
                        track.faulted = true;
                        if let Some(status) = self.transport.track(active) {
                            status.set_faulted(true);
                        }
                        Self::emit(
                            &mut self.event_producer,
                            EngineEvent::OutOfMemory { track: active },
                        );
                    }
                }
            }
        }

        // --- Play ---
        for track in self.tracks.iter_mut() {
            let status = self.transport.track(track.index);
            let audible = playing
                && status.map(|s| s.is_audible()).unwrap_or(false)
                && !track.is_empty();

            let mut wrapped = false;
            for channel in Channel::BOTH {
                let c = channel.index();
                let block = &mut self.scratch[..n];
                if audible {
                    wrapped |= track.buffers[c].read_block(block).wrapped;
                } else {
                    block.fill(0.0);
                }
                scope.write_output(&mut track.outputs[c], block);
            }

            if let Some(status) = status {
                status.publish(track.cursor(), track.len());
            }
            if wrapped {
                Self::emit(
                    &mut self.event_producer,
                    EngineEvent::Looped { track: track.index },
                );
            }
        }

        // --- Deadline ---
        let budget = frames as f32 / self.sample_rate;
        let elapsed = start_time.elapsed().as_secs_f32();
        let load = if budget > 0.0 { elapsed / budget } else { 0.0 };
        self.transport.set_dsp_load(load);
        if load > 1.0 {
            Self::emit(&mut self.event_producer, EngineEvent::DeadlineMiss {
                elapsed_us: (elapsed * 1_000_000.0) as u32,
                budget_us: (budget * 1_000_000.0) as u32,
            });
        }
    }
}

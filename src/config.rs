//! Runtime engine configuration derived from settings and the live graph.

use crate::error::{TapeError, TapeResult};
use crate::graph::Routing;
use crate::sample_buffer::chunks_for_frames;
use crate::settings::AppSettings;

/// Largest block pre-allocated for the callback's scratch buffer.
pub const MAX_BLOCK_FRAMES: usize = 8192;

const COMMAND_QUEUE_CAPACITY: usize = 64;
const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub max_tracks: usize,
    /// Upper bound on one recording, per channel.
    pub max_session_seconds: f32,
    /// Chunks handed to every new track up front.
    pub prealloc_seconds: f32,
    /// Chunks kept waiting in the shared feed.
    pub pool_chunks: usize,
    pub command_capacity: usize,
    pub event_capacity: usize,
    /// Overrides the backend's default wiring of new tracks.
    pub routing: Option<Routing>,
}

impl EngineConfig {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            max_tracks: 8,
            max_session_seconds: 600.0,
            prealloc_seconds: 30.0,
            pool_chunks: 64,
            command_capacity: COMMAND_QUEUE_CAPACITY,
            event_capacity: EVENT_QUEUE_CAPACITY,
            routing: None,
        }
    }

    pub fn from_settings(settings: &AppSettings, sample_rate: u32, block_size: usize) -> Self {
        let routing = match (&settings.track_sources, &settings.track_sinks) {
            (Some(sources), Some(sinks)) => Some(Routing::new(sources.clone(), sinks.clone())),
            _ => None,
        };
        Self {
            max_tracks: settings.max_tracks,
            max_session_seconds: settings.max_session_seconds,
            prealloc_seconds: settings.prealloc_seconds,
            pool_chunks: settings.pool_chunks,
            routing,
            ..Self::new(sample_rate, block_size)
        }
    }

    pub fn validate(&self) -> TapeResult<()> {
        if self.sample_rate == 0 {
            return Err(TapeError::Config("sample rate must be positive".into()));
        }
        if self.block_size == 0 || self.block_size > MAX_BLOCK_FRAMES {
            return Err(TapeError::Config(format!(
                "block size must be between 1 and {} frames, got {}",
                MAX_BLOCK_FRAMES, self.block_size
            )));
        }
        if self.max_tracks == 0 {
            return Err(TapeError::Config("at least one track is required".into()));
        }
        if !(self.max_session_seconds > 0.0) || !(self.prealloc_seconds >= 0.0) {
            return Err(TapeError::Config(
                "session and pre-allocation lengths must be positive".into(),
            ));
        }
        Ok(())
    }

    fn seconds_to_frames(&self, seconds: f32) -> usize {
        (seconds as f64 * self.sample_rate as f64).ceil() as usize
    }

    /// Chunk budget of one channel buffer.
    pub fn max_chunks(&self) -> usize {
        chunks_for_frames(self.seconds_to_frames(self.max_session_seconds)).max(1)
    }

    pub fn prealloc_chunks(&self) -> usize {
        chunks_for_frames(self.seconds_to_frames(self.prealloc_seconds)).min(self.max_chunks())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_buffer::CHUNK_FRAMES;

    #[test]
    fn test_chunk_budgets() {
        let mut config = EngineConfig::new(48_000, 512);
        config.max_session_seconds = 10.0;
        config.prealloc_seconds = 2.0;

        assert_eq!(config.max_chunks(), 480_000usize.div_ceil(CHUNK_FRAMES));
        assert_eq!(config.prealloc_chunks(), 96_000usize.div_ceil(CHUNK_FRAMES));
    }

    #[test]
    fn test_prealloc_never_exceeds_budget() {
        let mut config = EngineConfig::new(48_000, 512);
        config.max_session_seconds = 1.0;
        config.prealloc_seconds = 5.0;
        assert_eq!(config.prealloc_chunks(), config.max_chunks());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(EngineConfig::new(48_000, 512).validate().is_ok());
        assert!(EngineConfig::new(0, 512).validate().is_err());
        assert!(EngineConfig::new(48_000, 0).validate().is_err());
        assert!(EngineConfig::new(48_000, MAX_BLOCK_FRAMES + 1)
            .validate()
            .is_err());

        let mut config = EngineConfig::new(48_000, 512);
        config.max_tracks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_routing_needs_both_halves() {
        let mut settings = AppSettings::default();
        settings.track_sources = Some(["a:l".into(), "a:r".into()]);
        assert!(EngineConfig::from_settings(&settings, 48_000, 256)
            .routing
            .is_none());

        settings.track_sinks = Some(["b:l".into(), "b:r".into()]);
        let config = EngineConfig::from_settings(&settings, 48_000, 256);
        assert_eq!(config.routing.unwrap().sinks[1], "b:r");
    }
}

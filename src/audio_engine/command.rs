// FILE: src/audio_engine/command.rs
// ==================================

use super::track::Track;

/// Structural changes handed to the audio thread. Flags and seeks travel through
/// [`Transport`](crate::transport::Transport) atomics instead.
pub enum AudioCommand<I, O> {
    /// A fully built track. Boxed so the audio thread only stores a pointer.
    AddTrack(Box<Track<I, O>>),
    ClearTrack(usize),
    ClearAll,
}

/// Things the audio thread reports back; drained and logged by the control thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    TrackOnline { track: usize },
    Cleared { track: usize },
    Looped { track: usize },
    /// Recording on this track stopped because no chunk was available.
    OutOfMemory { track: usize },
    /// The callback took longer than the block it produced.
    DeadlineMiss { elapsed_us: u32, budget_us: u32 },
    /// The graph asked for more frames than were pre-allocated; the excess was silent.
    OversizedBlock { frames: usize },
}

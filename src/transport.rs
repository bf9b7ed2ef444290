// src/transport.rs
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::RwLock;

const LOAD_SCALER: f32 = 1_000_000.0;
const NO_SEEK: usize = usize::MAX;

/// Derived view of the two independent transport flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Playing,
    Recording,
    PlayingAndRecording,
}

impl TransportState {
    pub fn from_flags(recording: bool, playing: bool) -> Self {
        match (recording, playing) {
            (false, false) => TransportState::Idle,
            (false, true) => TransportState::Playing,
            (true, false) => TransportState::Recording,
            (true, true) => TransportState::PlayingAndRecording,
        }
    }

    pub fn is_recording(self) -> bool {
        matches!(
            self,
            TransportState::Recording | TransportState::PlayingAndRecording
        )
    }

    pub fn is_playing(self) -> bool {
        matches!(
            self,
            TransportState::Playing | TransportState::PlayingAndRecording
        )
    }
}

/// Per-track values. `audible` is written by the control thread, the rest by the audio thread.
#[derive(Debug)]
pub struct TrackStatus {
    cursor: AtomicUsize,
    length: AtomicUsize,
    audible: AtomicBool,
    faulted: AtomicBool,
}

impl TrackStatus {
    fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
            length: AtomicUsize::new(0),
            audible: AtomicBool::new(true),
            faulted: AtomicBool::new(false),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn length(&self) -> usize {
        self.length.load(Ordering::Acquire)
    }

    pub fn is_audible(&self) -> bool {
        self.audible.load(Ordering::Acquire)
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub(crate) fn set_audible(&self, audible: bool) {
        self.audible.store(audible, Ordering::Release);
    }

    pub(crate) fn publish(&self, cursor: usize, length: usize) {
        self.length.store(length, Ordering::Release);
        self.cursor.store(cursor, Ordering::Release);
    }

    pub(crate) fn set_faulted(&self, faulted: bool) {
        self.faulted.store(faulted, Ordering::Release);
    }
}

/// State shared between the control thread and the audio thread.
///
/// Every field is a single atomic so the audio thread never waits on the control thread.
/// The only lock guards the disconnect reason, which is touched by the backend's
/// notification thread and the control thread only.
#[derive(Debug)]
pub struct Transport {
    recording: AtomicBool,
    playing: AtomicBool,
    active_track: AtomicUsize,
    pending_seek: AtomicUsize,
    dsp_load: AtomicU32,
    xrun_count: AtomicUsize,
    graph_lost: AtomicBool,
    disconnect_reason: RwLock<Option<String>>,
    tracks: Box<[TrackStatus]>,
}

impl Transport {
    pub fn new(max_tracks: usize) -> Self {
        Self {
            recording: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            active_track: AtomicUsize::new(0),
            pending_seek: AtomicUsize::new(NO_SEEK),
            dsp_load: AtomicU32::new(0),
            xrun_count: AtomicUsize::new(0),
            graph_lost: AtomicBool::new(false),
            disconnect_reason: RwLock::new(None),
            tracks: (0..max_tracks).map(|_| TrackStatus::new()).collect(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_flags(self.is_recording(), self.is_playing())
    }

    pub fn active_track(&self) -> usize {
        self.active_track.load(Ordering::Acquire)
    }

    pub(crate) fn set_active_track(&self, index: usize) {
        self.active_track.store(index, Ordering::Release);
    }

    /// Queues a cursor position for every track. A later request replaces an unconsumed one.
    pub(crate) fn request_seek(&self, frame: usize) {
        self.pending_seek
            .store(frame.min(NO_SEEK - 1), Ordering::Release);
    }

    /// Audio thread: consumes the pending seek, if any.
    pub(crate) fn take_seek(&self) -> Option<usize> {
        match self.pending_seek.swap(NO_SEEK, Ordering::AcqRel) {
            NO_SEEK => None,
            frame => Some(frame),
        }
    }

    pub fn max_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<&TrackStatus> {
        self.tracks.get(index)
    }

    /// Fraction of the block budget the last callback used.
    pub fn dsp_load(&self) -> f32 {
        self.dsp_load.load(Ordering::Relaxed) as f32 / LOAD_SCALER
    }

    pub(crate) fn set_dsp_load(&self, load: f32) {
        self.dsp_load
            .store((load.max(0.0) * LOAD_SCALER) as u32, Ordering::Relaxed);
    }

    pub fn xrun_count(&self) -> usize {
        self.xrun_count.load(Ordering::Relaxed)
    }

    /// Called by backends when the graph reports an overrun.
    pub fn note_xrun(&self) {
        self.xrun_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_graph_lost(&self) -> bool {
        self.graph_lost.load(Ordering::Acquire)
    }

    /// Called by backends when the connection to the audio graph is gone.
    pub fn mark_graph_lost(&self, reason: &str) {
        if let Ok(mut slot) = self.disconnect_reason.write() {
            slot.get_or_insert_with(|| reason.to_string());
        }
        self.graph_lost.store(true, Ordering::Release);
    }

    pub fn disconnect_reason(&self) -> String {
        self.disconnect_reason
            .read()
            .ok()
            .and_then(|r| r.clone())
            .unwrap_or_else(|| "unknown reason".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_orthogonal() {
        let transport = Transport::new(2);
        assert_eq!(transport.state(), TransportState::Idle);

        transport.set_recording(true);
        assert_eq!(transport.state(), TransportState::Recording);

        transport.set_playing(true);
        assert_eq!(transport.state(), TransportState::PlayingAndRecording);

        transport.set_recording(false);
        assert_eq!(transport.state(), TransportState::Playing);
        assert!(transport.state().is_playing());
        assert!(!transport.state().is_recording());
    }

    #[test]
    fn test_seek_slot_is_consumed_once() {
        let transport = Transport::new(1);
        assert_eq!(transport.take_seek(), None);

        transport.request_seek(480);
        transport.request_seek(960);
        assert_eq!(transport.take_seek(), Some(960));
        assert_eq!(transport.take_seek(), None);
    }

    #[test]
    fn test_graph_lost_keeps_first_reason() {
        let transport = Transport::new(1);
        assert!(!transport.is_graph_lost());

        transport.mark_graph_lost("server shut down");
        transport.mark_graph_lost("second notice");
        assert!(transport.is_graph_lost());
        assert_eq!(transport.disconnect_reason(), "server shut down");
    }

    #[test]
    fn test_dsp_load_round_trips_through_scaler() {
        let transport = Transport::new(1);
        transport.set_dsp_load(0.25);
        approx::assert_abs_diff_eq!(transport.dsp_load(), 0.25, epsilon = 1e-5);
    }

    #[test]
    fn test_new_tracks_are_audible() {
        let transport = Transport::new(3);
        assert_eq!(transport.max_tracks(), 3);
        assert!(transport.track(2).unwrap().is_audible());
        assert!(transport.track(3).is_none());
    }
}

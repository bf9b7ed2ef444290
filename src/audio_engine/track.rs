// FILE: src/audio_engine/track.rs
// ================================

use crate::graph::Channel;
use crate::sample_buffer::{ChunkFeed, SampleBuffer};

/// One stereo recording/playback unit: its ports and its two sample buffers.
///
/// Built on the control thread and moved, boxed, to the audio thread.
pub struct Track<I, O> {
    pub index: usize,
    pub inputs: [I; 2],
    pub outputs: [O; 2],
    pub buffers: [SampleBuffer; 2],
    /// Set when recording ran out of chunks; the track ignores input until cleared.
    pub faulted: bool,
}

impl<I, O> Track<I, O> {
    pub fn new(
        index: usize,
        inputs: [I; 2],
        outputs: [O; 2],
        max_chunks: usize,
        prealloc_chunks: usize,
    ) -> Self {
        Self {
            index,
            inputs,
            outputs,
            buffers: [
                SampleBuffer::new(max_chunks, prealloc_chunks),
                SampleBuffer::new(max_chunks, prealloc_chunks),
            ],
            faulted: false,
        }
    }

    pub fn buffer(&self, channel: Channel) -> &SampleBuffer {
        &self.buffers[channel.index()]
    }

    pub fn len(&self) -> usize {
        self.buffers[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.iter().all(SampleBuffer::is_empty)
    }

    pub fn cursor(&self) -> usize {
        self.buffers[0].cursor()
    }

    /// Makes room for `frames` on both channels so they always grow in lockstep.
    pub fn reserve(&mut self, frames: usize, feed: &mut ChunkFeed) -> bool {
        let [left, right] = &mut self.buffers;
        left.reserve(frames, feed) && right.reserve(frames, feed)
    }

    pub fn seek(&mut self, frame: usize) {
        for buffer in self.buffers.iter_mut() {
            buffer.seek(frame);
        }
    }

    pub fn clear(&mut self) {
        for buffer in self.buffers.iter_mut() {
            buffer.clear();
        }
        self.faulted = false;
    }

    /// Splits the track into the port handles, for unregistering them at shutdown.
    pub fn into_ports(self) -> ([I; 2], [O; 2]) {
        (self.inputs, self.outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_buffer::{ChunkPool, CHUNK_FRAMES};

    #[test]
    fn test_reserve_covers_both_channels() {
        let (mut pool, mut feed) = ChunkPool::new(4);
        pool.refill();
        let mut track: Track<(), ()> = Track::new(0, [(), ()], [(), ()], 4, 0);

        assert!(track.reserve(CHUNK_FRAMES, &mut feed));
        assert_eq!(pool.available(), 2);
        assert!(track
            .buffers
            .iter()
            .all(|b| b.free_frames() == CHUNK_FRAMES));
    }

    #[test]
    fn test_clear_resets_fault_and_cursor() {
        let mut track: Track<(), ()> = Track::new(1, [(), ()], [(), ()], 1, 1);
        for buffer in track.buffers.iter_mut() {
            buffer.append(&[0.1; 64]);
        }
        track.seek(32);
        track.faulted = true;

        track.clear();
        assert!(track.is_empty());
        assert_eq!(track.cursor(), 0);
        assert!(!track.faulted);
    }
}

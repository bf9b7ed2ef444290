//! Chunked sample storage for one channel of one track.
//!
//! Recording appends whole chunks that were allocated on the control thread, so the audio
//! thread only ever moves `Box` pointers around. Chunks reach the audio thread in two ways:
//! a per-buffer spare list filled when the track is created, and a shared [`ChunkFeed`]
//! that the control thread keeps topped up through [`ChunkPool::refill`].

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};

/// Frames per chunk.
pub const CHUNK_FRAMES: usize = 4096;

pub type Chunk = Box<[f32]>;

pub fn new_chunk() -> Chunk {
    vec![0.0; CHUNK_FRAMES].into_boxed_slice()
}

/// Number of chunks needed to hold `frames` frames.
pub fn chunks_for_frames(frames: usize) -> usize {
    frames.div_ceil(CHUNK_FRAMES)
}

/// Control-thread side of the chunk queue.
pub struct ChunkPool {
    producer: HeapProducer<Chunk>,
}

/// Audio-thread side of the chunk queue.
pub struct ChunkFeed {
    consumer: HeapConsumer<Chunk>,
}

impl ChunkPool {
    pub fn new(capacity: usize) -> (ChunkPool, ChunkFeed) {
        let (producer, consumer) = HeapRb::<Chunk>::new(capacity.max(1)).split();
        (ChunkPool { producer }, ChunkFeed { consumer })
    }

    /// Allocates chunks until the queue is full. Returns how many were added.
    pub fn refill(&mut self) -> usize {
        let mut added = 0;
        while !self.producer.is_full() {
            if self.producer.push(new_chunk()).is_err() {
                break;
            }
            added += 1;
        }
        added
    }

    /// Chunks currently waiting in the queue.
    pub fn available(&self) -> usize {
        self.producer.len()
    }
}

impl ChunkFeed {
    pub fn take(&mut self) -> Option<Chunk> {
        self.consumer.pop()
    }
}

/// Outcome of reading one block for playback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRead {
    /// Frames copied from the buffer; the rest of the block was zero-filled.
    pub frames: usize,
    /// The cursor reached the end and went back to 0.
    pub wrapped: bool,
}

/// Append-only frame store with a read cursor.
///
/// Invariants: `cursor <= len`, and `chunks` holds exactly the chunks covering `len`.
pub struct SampleBuffer {
    chunks: Vec<Chunk>,
    spare: Vec<Chunk>,
    max_chunks: usize,
    len: usize,
    cursor: usize,
}

impl SampleBuffer {
    /// Allocates bookkeeping for `max_chunks` and `prealloc_chunks` ready chunks.
    /// Control thread only.
    pub fn new(max_chunks: usize, prealloc_chunks: usize) -> Self {
        let mut spare = Vec::with_capacity(max_chunks);
        spare.extend((0..prealloc_chunks.min(max_chunks)).map(|_| new_chunk()));
        Self {
            chunks: Vec::with_capacity(max_chunks),
            spare,
            max_chunks,
            len: 0,
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn max_frames(&self) -> usize {
        self.max_chunks * CHUNK_FRAMES
    }

    /// Frames that can be appended without taking chunks from the feed.
    pub fn free_frames(&self) -> usize {
        (self.chunks.len() + self.spare.len()) * CHUNK_FRAMES - self.len
    }

    /// Pulls chunks from `feed` until `frames` more frames fit.
    ///
    /// Returns false when the feed runs dry or the buffer hit its session limit.
    pub fn reserve(&mut self, frames: usize, feed: &mut ChunkFeed) -> bool {
        while self.free_frames() < frames {
            if self.chunks.len() + self.spare.len() >= self.max_chunks {
                return false;
            }
            match feed.take() {
                Some(chunk) => self.spare.push(chunk),
                None => return false,
            }
        }
        true
    }

    /// Appends at the end. Returns the number of frames stored, which is short only when
    /// the buffer ran out of chunks.
    pub fn append(&mut self, samples: &[f32]) -> usize {
        let mut written = 0;
        while written < samples.len() {
            let index = self.len / CHUNK_FRAMES;
            let offset = self.len % CHUNK_FRAMES;
            if index == self.chunks.len() {
                match self.spare.pop() {
                    Some(chunk) => self.chunks.push(chunk),
                    None => break,
                }
            }
            let n = (CHUNK_FRAMES - offset).min(samples.len() - written);
            self.chunks[index][offset..offset + n]
                .copy_from_slice(&samples[written..written + n]);
            written += n;
            self.len += n;
        }
        written
    }

    /// Copies one block starting at the cursor into `out` and advances the cursor.
    ///
    /// A short read zero-fills the tail of `out`; reaching the end wraps the cursor to 0.
    pub fn read_block(&mut self, out: &mut [f32]) -> BlockRead {
        if self.len == 0 {
            out.fill(0.0);
            return BlockRead {
                frames: 0,
                wrapped: false,
            };
        }

        let want = out.len().min(self.len - self.cursor);
        let mut copied = 0;
        while copied < want {
            let pos = self.cursor + copied;
            let offset = pos % CHUNK_FRAMES;
            let n = (CHUNK_FRAMES - offset).min(want - copied);
            out[copied..copied + n]
                .copy_from_slice(&self.chunks[pos / CHUNK_FRAMES][offset..offset + n]);
            copied += n;
        }
        out[want..].fill(0.0);

        self.cursor += want;
        let wrapped = self.cursor >= self.len;
        if wrapped {
            self.cursor = 0;
        }
        BlockRead {
            frames: want,
            wrapped,
        }
    }

    /// Moves the cursor, clamped to the recorded length.
    pub fn seek(&mut self, frame: usize) {
        self.cursor = frame.min(self.len);
    }

    /// Truncates to zero length. Chunks are kept as spares for the next take.
    pub fn clear(&mut self) {
        self.spare.append(&mut self.chunks);
        self.len = 0;
        self.cursor = 0;
    }

    /// Recorded frames in order.
    pub fn frames(&self) -> impl Iterator<Item = f32> + '_ {
        self.chunks.iter().flat_map(|c| c.iter().copied()).take(self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: usize, n: usize) -> Vec<f32> {
        (start..start + n).map(|i| i as f32).collect()
    }

    #[test]
    fn test_append_spans_chunks() {
        let mut buffer = SampleBuffer::new(4, 4);
        let block = ramp(0, CHUNK_FRAMES + 100);
        assert_eq!(buffer.append(&block), block.len());
        assert_eq!(buffer.len(), CHUNK_FRAMES + 100);
        assert!(buffer.frames().eq(block.iter().copied()));
    }

    #[test]
    fn test_append_stops_when_out_of_chunks() {
        let mut buffer = SampleBuffer::new(4, 1);
        let written = buffer.append(&ramp(0, CHUNK_FRAMES + 10));
        assert_eq!(written, CHUNK_FRAMES);
        assert_eq!(buffer.len(), CHUNK_FRAMES);
    }

    #[test]
    fn test_reserve_pulls_from_feed_up_to_limit() {
        let (mut pool, mut feed) = ChunkPool::new(8);
        assert_eq!(pool.refill(), 8);

        let mut buffer = SampleBuffer::new(2, 0);
        assert!(buffer.reserve(CHUNK_FRAMES + 1, &mut feed));
        assert_eq!(pool.available(), 6);
        assert!(!buffer.reserve(2 * CHUNK_FRAMES + 1, &mut feed));
        assert_eq!(buffer.free_frames(), 2 * CHUNK_FRAMES);
    }

    #[test]
    fn test_reserve_fails_on_dry_feed() {
        let (_pool, mut feed) = ChunkPool::new(2);
        let mut buffer = SampleBuffer::new(8, 0);
        assert!(!buffer.reserve(1, &mut feed));
        assert!(buffer.reserve(0, &mut feed));
    }

    #[test]
    fn test_read_block_wraps_after_partial_block() {
        let mut buffer = SampleBuffer::new(1, 1);
        buffer.append(&ramp(1, 10));

        let mut out = [9.0; 4];
        assert_eq!(
            buffer.read_block(&mut out),
            BlockRead { frames: 4, wrapped: false }
        );
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);

        buffer.read_block(&mut out);
        let last = buffer.read_block(&mut out);
        assert_eq!(last, BlockRead { frames: 2, wrapped: true });
        assert_eq!(out, [9.0, 10.0, 0.0, 0.0]);
        assert_eq!(buffer.cursor(), 0);

        buffer.read_block(&mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_read_block_across_chunk_boundary() {
        let mut buffer = SampleBuffer::new(2, 2);
        buffer.append(&ramp(0, CHUNK_FRAMES + 8));
        buffer.seek(CHUNK_FRAMES - 2);

        let mut out = [0.0; 4];
        buffer.read_block(&mut out);
        let base = (CHUNK_FRAMES - 2) as f32;
        assert_eq!(out, [base, base + 1.0, base + 2.0, base + 3.0]);
    }

    #[test]
    fn test_empty_buffer_reads_silence() {
        let mut buffer = SampleBuffer::new(1, 1);
        let mut out = [0.5; 8];
        let read = buffer.read_block(&mut out);
        assert_eq!(read.frames, 0);
        assert!(!read.wrapped);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_seek_clamps_to_length() {
        let mut buffer = SampleBuffer::new(1, 1);
        buffer.append(&ramp(0, 16));
        buffer.seek(100);
        assert_eq!(buffer.cursor(), 16);

        let mut out = [1.0; 4];
        let read = buffer.read_block(&mut out);
        assert!(read.wrapped);
        assert_eq!(buffer.cursor(), 0);
    }

    #[test]
    fn test_clear_recycles_chunks() {
        let mut buffer = SampleBuffer::new(3, 3);
        buffer.append(&ramp(0, 2 * CHUNK_FRAMES));
        buffer.seek(10);
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.cursor(), 0);
        assert_eq!(buffer.free_frames(), 3 * CHUNK_FRAMES);
        assert_eq!(buffer.append(&ramp(0, 3 * CHUNK_FRAMES)), 3 * CHUNK_FRAMES);
    }

    #[test]
    fn test_chunks_for_frames_rounds_up() {
        assert_eq!(chunks_for_frames(0), 0);
        assert_eq!(chunks_for_frames(1), 1);
        assert_eq!(chunks_for_frames(CHUNK_FRAMES), 1);
        assert_eq!(chunks_for_frames(CHUNK_FRAMES + 1), 2);
    }
}

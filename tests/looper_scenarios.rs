use approx::assert_relative_eq;
use lil_tape::audio_engine::{channel, EngineEvent, Recorder};
use lil_tape::config::EngineConfig;
use lil_tape::port_table::{LocalGraph, LocalScope, PortId};
use lil_tape::tape::Tape;
use lil_tape::TapeError;
use proptest::prelude::*;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const SAMPLE_RATE: u32 = 48_000;

struct Rig {
    tape: Tape<LocalGraph>,
    recorder: Recorder<PortId, PortId>,
}

impl Rig {
    fn new(block: usize) -> Self {
        let mut config = EngineConfig::new(SAMPLE_RATE, block);
        config.max_tracks = 4;
        config.max_session_seconds = 10.0;
        config.prealloc_seconds = 1.0;
        config.pool_chunks = 64;
        let graph = LocalGraph::new("tape", SAMPLE_RATE, block, 2, 2);
        let (link, recorder) = channel(&config);
        let tape = Tape::new(graph, link, config).unwrap();
        Self { tape, recorder }
    }

    fn tick_with(&mut self, left: &[f32], right: &[f32]) -> [Vec<f32>; 2] {
        let capture = [left.to_vec(), right.to_vec()];
        let mut playback = [vec![0.0; left.len()], vec![0.0; left.len()]];
        let mut scope = LocalScope::new(left.len(), &capture, &mut playback);
        self.recorder.process(&mut scope);
        playback
    }

    fn tick(&mut self, frames: usize) -> [Vec<f32>; 2] {
        let silence = vec![0.0; frames];
        self.tick_with(&silence, &silence)
    }
}

fn ramp(start: usize, frames: usize) -> Vec<f32> {
    (start..start + frames).map(|i| (i % 1000) as f32 / 1000.0).collect()
}

#[test]
fn two_second_take_then_clear() {
    let mut rig = Rig::new(512);
    rig.tape.set_recording(true);
    for i in 0..188 {
        let block = ramp(i * 512, 512);
        rig.tick_with(&block, &block);
    }
    rig.tape.set_recording(false);
    rig.tick(512);

    let status = rig.tape.status();
    assert_eq!(status.tracks[0].length, 96_256);
    assert_relative_eq!(
        status.tracks[0].length as f64 / SAMPLE_RATE as f64,
        2.0053,
        epsilon = 1e-4
    );

    rig.tape.clear_active_track().unwrap();
    rig.tick(512);
    let track = rig.recorder.track(0).unwrap();
    assert_eq!(track.len(), 0);
    assert_eq!(track.cursor(), 0);
}

#[test]
fn reselecting_a_track_does_not_duplicate_it() {
    let mut rig = Rig::new(256);
    rig.tape.select_track(0).unwrap();
    rig.tape.select_track(1).unwrap();
    rig.tape.select_track(0).unwrap();
    rig.tick(256);

    assert_eq!(rig.tape.track_count(), 2);
    assert_eq!(rig.recorder.track_count(), 2);
    assert_eq!(rig.tape.graph().registration_count(), 8);
}

#[test]
fn fresh_track_outputs_silence() {
    let mut rig = Rig::new(128);
    for _ in 0..4 {
        let out = rig.tick_with(&[0.7; 128], &[0.7; 128]);
        assert!(out.iter().flatten().all(|&s| s == 0.0));
    }
    rig.tape.set_playing(true);
    let out = rig.tick(128);
    assert!(out.iter().flatten().all(|&s| s == 0.0));
}

#[test]
fn partial_final_block_is_padded_and_loops() {
    let mut rig = Rig::new(256);
    let take = ramp(0, 1000);

    rig.tape.set_recording(true);
    for piece in take.chunks(256) {
        rig.tick_with(piece, piece);
    }
    rig.tape.set_recording(false);
    rig.tape.set_playing(true);

    let mut played = Vec::new();
    for _ in 0..4 {
        played.extend(rig.tick(256)[0].iter().copied());
    }
    assert_eq!(&played[..1000], &take[..]);
    assert!(played[1000..].iter().all(|&s| s == 0.0));
    assert_eq!(rig.recorder.track(0).unwrap().cursor(), 0);

    let again = rig.tick(256);
    assert_eq!(&again[0][..], &take[..256]);

    let events = rig.tape.poll().unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, EngineEvent::Looped { track: 0 }))
            .count(),
        1
    );
}

#[test]
fn seek_beyond_end_clamps() {
    let mut rig = Rig::new(128);
    rig.tape.set_recording(true);
    for _ in 0..8 {
        rig.tick_with(&[0.1; 128], &[0.2; 128]);
    }
    rig.tape.set_recording(false);

    rig.tape.seek(60.0).unwrap();
    rig.tick(128);
    assert_eq!(rig.recorder.track(0).unwrap().cursor(), 1024);

    assert!(matches!(rig.tape.seek(-0.5), Err(TapeError::InvalidSeek(_))));
}

#[test]
fn concurrent_seeks_land_on_valid_positions() {
    const BLOCK: usize = 128;
    const BLOCKS: usize = 64;
    let mut rig = Rig::new(BLOCK);

    rig.tape.set_recording(true);
    for i in 0..BLOCKS {
        let block = ramp(i * BLOCK, BLOCK);
        rig.tick_with(&block, &block);
    }
    rig.tape.set_recording(false);
    rig.tape.set_playing(true);

    let Rig { mut tape, mut recorder } = rig;
    let done = Arc::new(AtomicBool::new(false));
    let seeker_done = done.clone();
    let seeker = thread::spawn(move || {
        let mut rng = rand::thread_rng();
        while !seeker_done.load(Ordering::Relaxed) {
            let block = rng.gen_range(0..BLOCKS);
            let seconds = (block * BLOCK) as f64 / SAMPLE_RATE as f64;
            tape.seek(seconds).unwrap();
            thread::yield_now();
        }
        tape
    });

    let silence = vec![0.0; BLOCK];
    let capture = [silence.clone(), silence];
    for _ in 0..2_000 {
        let mut playback = [vec![0.0; BLOCK], vec![0.0; BLOCK]];
        let mut scope = LocalScope::new(BLOCK, &capture, &mut playback);
        recorder.process(&mut scope);

        let cursor = recorder.track(0).unwrap().cursor();
        assert_eq!(cursor % BLOCK, 0);
        assert!(cursor < BLOCKS * BLOCK);
        // Each output block is one contiguous stretch of the take.
        let first = playback[0][0];
        let expected: Vec<f32> = (0..BLOCK)
            .map(|i| ((first * 1000.0).round() as usize + i) % 1000)
            .map(|v| v as f32 / 1000.0)
            .collect();
        assert_eq!(playback[0], expected);
    }

    done.store(true, Ordering::Relaxed);
    let mut tape = seeker.join().unwrap();
    tape.shutdown().unwrap();
}

#[test]
fn switching_tracks_mid_take_keeps_every_block() {
    const BLOCK: usize = 64;
    const TICKS: usize = 40;

    for _ in 0..200 {
        let Rig { mut tape, mut recorder } = Rig::new(BLOCK);
        tape.set_recording(true);

        let switcher = thread::spawn(move || {
            let pause = rand::thread_rng().gen_range(0..50);
            for _ in 0..pause {
                thread::yield_now();
            }
            tape.select_track(1).unwrap();
            tape
        });

        let block = vec![0.5; BLOCK];
        let capture = [block.clone(), block];
        for _ in 0..TICKS {
            let mut playback = [vec![0.0; BLOCK], vec![0.0; BLOCK]];
            let mut scope = LocalScope::new(BLOCK, &capture, &mut playback);
            recorder.process(&mut scope);
        }

        let tape = switcher.join().unwrap();
        assert_eq!(tape.track_count(), 2);
        let recorded: usize = (0..recorder.track_count())
            .filter_map(|i| recorder.track(i))
            .map(|track| track.len())
            .sum();
        assert_eq!(recorded, TICKS * BLOCK);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn recorded_length_is_ticks_times_block(ticks in 1usize..40, frames in 1usize..1024) {
        let mut rig = Rig::new(1024);
        rig.tape.set_recording(true);
        let block = vec![0.5; frames];
        for _ in 0..ticks {
            rig.tick_with(&block, &block);
        }
        rig.tape.set_recording(false);

        let track = rig.recorder.track(0).unwrap();
        prop_assert_eq!(track.len(), ticks * frames);
        prop_assert_eq!(track.buffers[1].len(), ticks * frames);
    }
}

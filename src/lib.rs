//! A multi-track tape recorder and looper hosted in an audio graph.
//!
//! [`tape::Tape`] runs on the control thread; [`audio_engine::Recorder`] runs in the
//! graph's real-time callback. Backends implement [`graph::AudioGraph`].

pub mod audio_device;
pub mod audio_engine;
pub mod audio_io;
pub mod config;
pub mod control;
pub mod error;
pub mod graph;
#[cfg(all(feature = "jack-backend", target_os = "linux"))]
pub mod jack_backend;
pub mod midi;
pub mod port_table;
pub mod sample_buffer;
pub mod settings;
pub mod tape;
pub mod transport;

pub use error::{TapeError, TapeResult};
pub use tape::{Tape, TapeStatus};

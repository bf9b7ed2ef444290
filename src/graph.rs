//! Seams between the tape engine and the audio graph it runs inside.
//!
//! [`AudioGraph`] is the control-thread half: port registration and routing, which may
//! block. [`BlockScope`] is the audio-thread half: reading and writing one block of
//! samples for ports that were registered earlier.

use crate::error::TapeResult;

/// Channel of a stereo track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Left,
    Right,
}

impl Channel {
    pub const BOTH: [Channel; 2] = [Channel::Left, Channel::Right];

    pub fn name(self) -> &'static str {
        match self {
            Channel::Left => "left",
            Channel::Right => "right",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Channel::Left => 0,
            Channel::Right => 1,
        }
    }
}

/// Short port name for a track, e.g. `track0_left_in`.
pub fn track_input_name(track: usize, channel: Channel) -> String {
    format!("track{}_{}_in", track, channel.name())
}

/// Short port name for a track, e.g. `track0_right_out`.
pub fn track_output_name(track: usize, channel: Channel) -> String {
    format!("track{}_{}_out", track, channel.name())
}

/// Fully qualified `client:port` name.
pub fn full_port_name(client: &str, port: &str) -> String {
    format!("{}:{}", client, port)
}

/// Where new tracks are wired: `sources` feed the track inputs, the track outputs feed
/// `sinks`. Index 0 is the left channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Routing {
    pub sources: [String; 2],
    pub sinks: [String; 2],
}

impl Routing {
    pub fn new(sources: [String; 2], sinks: [String; 2]) -> Self {
        Self { sources, sinks }
    }
}

/// Control-thread access to the audio graph.
pub trait AudioGraph {
    /// Port handle moved to the audio thread for reading input.
    type Input: Send + 'static;
    /// Port handle moved to the audio thread for writing output.
    type Output: Send + 'static;

    /// Name other clients use to address our ports.
    fn client_name(&self) -> &str;

    fn sample_rate(&self) -> u32;

    /// Largest block the graph will ask us to process.
    fn block_size(&self) -> usize;

    /// Wiring applied to new tracks when the settings do not override it.
    fn default_routing(&self) -> Routing;

    fn register_input_port(&mut self, name: &str) -> TapeResult<Self::Input>;

    fn register_output_port(&mut self, name: &str) -> TapeResult<Self::Output>;

    fn unregister_input_port(&mut self, port: Self::Input) -> TapeResult<()>;

    fn unregister_output_port(&mut self, port: Self::Output) -> TapeResult<()>;

    /// Connects two fully qualified port names.
    fn connect(&mut self, source_port: &str, dest_port: &str) -> TapeResult<()>;

    /// Stops processing and releases every registered port.
    fn close(&mut self) -> TapeResult<()>;
}

/// Audio-thread access to the ports of one processing block.
pub trait BlockScope<I, O> {
    /// Frames in this block.
    fn frames(&self) -> usize;

    fn read_input<'p>(&'p self, port: &'p I) -> &'p [f32];

    /// Delivers one block for `port`. `block` holds at most [`frames`](Self::frames)
    /// samples; the rest of the port's block is silent.
    fn write_output(&mut self, port: &mut O, block: &[f32]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_naming_convention() {
        assert_eq!(track_input_name(0, Channel::Left), "track0_left_in");
        assert_eq!(track_input_name(3, Channel::Right), "track3_right_in");
        assert_eq!(track_output_name(1, Channel::Left), "track1_left_out");
        assert_eq!(
            full_port_name("tape", &track_output_name(2, Channel::Right)),
            "tape:track2_right_out"
        );
    }

    #[test]
    fn test_channel_indices() {
        assert_eq!(Channel::BOTH.map(Channel::index), [0, 1]);
    }
}

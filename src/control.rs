//! Transport commands shared by the console and MIDI front ends.

use crate::error::{TapeError, TapeResult};
use crate::graph::AudioGraph;
use crate::tape::Tape;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportCommand {
    /// `None` toggles.
    Record(Option<bool>),
    /// `None` toggles.
    Play(Option<bool>),
    Stop,
    SelectTrack(usize),
    Seek(f64),
    Clear,
    ClearTrack(usize),
    ClearAll,
    SetAudible { track: usize, audible: bool },
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCommandError(String);

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseCommandError {}

fn parse_switch(arg: Option<&str>) -> Result<Option<bool>, ParseCommandError> {
    match arg {
        None => Ok(None),
        Some("on") => Ok(Some(true)),
        Some("off") => Ok(Some(false)),
        Some(other) => Err(ParseCommandError(format!(
            "expected 'on' or 'off', got '{}'",
            other
        ))),
    }
}

fn parse_index(arg: Option<&str>) -> Result<usize, ParseCommandError> {
    let arg = arg.ok_or_else(|| ParseCommandError("missing track number".into()))?;
    arg.parse()
        .map_err(|_| ParseCommandError(format!("'{}' is not a track number", arg)))
}

impl FromStr for TransportCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ParseCommandError("empty command".into()));
        };
        let arg = words.next();
        if let Some(extra) = words.next() {
            return Err(ParseCommandError(format!("unexpected '{}'", extra)));
        }

        let command = match verb.to_ascii_lowercase().as_str() {
            "rec" | "record" => TransportCommand::Record(parse_switch(arg)?),
            "play" => TransportCommand::Play(parse_switch(arg)?),
            "stop" => TransportCommand::Stop,
            "track" => TransportCommand::SelectTrack(parse_index(arg)?),
            "seek" => {
                let arg = arg.ok_or_else(|| ParseCommandError("missing seconds".into()))?;
                let seconds = arg
                    .parse()
                    .map_err(|_| ParseCommandError(format!("'{}' is not a time", arg)))?;
                TransportCommand::Seek(seconds)
            }
            "clear" => match arg {
                None => TransportCommand::Clear,
                Some("all") => TransportCommand::ClearAll,
                Some(n) => TransportCommand::ClearTrack(parse_index(Some(n))?),
            },
            "mute" => TransportCommand::SetAudible {
                track: parse_index(arg)?,
                audible: false,
            },
            "unmute" => TransportCommand::SetAudible {
                track: parse_index(arg)?,
                audible: true,
            },
            "status" => TransportCommand::Status,
            "quit" | "exit" => TransportCommand::Quit,
            other => return Err(ParseCommandError(format!("unknown command '{}'", other))),
        };
        Ok(command)
    }
}

impl TransportCommand {
    /// Runs the command against the tape. `Status` and `Quit` are left to the caller.
    pub fn apply<G: AudioGraph>(self, tape: &mut Tape<G>) -> TapeResult<()> {
        match self {
            TransportCommand::Record(on) => {
                let on = on.unwrap_or(!tape.transport().is_recording());
                tape.set_recording(on);
            }
            TransportCommand::Play(on) => {
                let on = on.unwrap_or(!tape.transport().is_playing());
                tape.set_playing(on);
            }
            TransportCommand::Stop => tape.halt(),
            TransportCommand::SelectTrack(index) => tape.select_track(index)?,
            TransportCommand::Seek(seconds) => tape.seek(seconds)?,
            TransportCommand::Clear => tape.clear_active_track()?,
            TransportCommand::ClearTrack(index) => {
                if index >= tape.track_count() {
                    return Err(TapeError::InvalidTrackIndex {
                        index,
                        max: tape.track_count(),
                    });
                }
                tape.select_track(index)?;
                tape.clear_active_track()?;
            }
            TransportCommand::ClearAll => tape.clear_all_tracks()?,
            TransportCommand::SetAudible { track, audible } => {
                tape.set_track_audible(track, audible)?
            }
            TransportCommand::Status | TransportCommand::Quit => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_engine::channel;
    use crate::config::EngineConfig;
    use crate::port_table::LocalGraph;

    #[test]
    fn test_parse_console_lines() {
        let cases = [
            ("rec", TransportCommand::Record(None)),
            ("rec on", TransportCommand::Record(Some(true))),
            ("PLAY off", TransportCommand::Play(Some(false))),
            ("stop", TransportCommand::Stop),
            ("track 3", TransportCommand::SelectTrack(3)),
            ("seek 1.5", TransportCommand::Seek(1.5)),
            ("clear", TransportCommand::Clear),
            ("clear all", TransportCommand::ClearAll),
            ("clear 2", TransportCommand::ClearTrack(2)),
            (
                "mute 1",
                TransportCommand::SetAudible {
                    track: 1,
                    audible: false,
                },
            ),
            ("  status  ", TransportCommand::Status),
            ("quit", TransportCommand::Quit),
        ];
        for (line, expected) in cases {
            assert_eq!(line.parse::<TransportCommand>(), Ok(expected), "{}", line);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for line in ["", "fly", "track", "track x", "rec maybe", "seek", "stop now"] {
            assert!(line.parse::<TransportCommand>().is_err(), "{}", line);
        }
    }

    #[test]
    fn test_apply_toggles_and_selects() {
        let mut config = EngineConfig::new(48_000, 64);
        config.prealloc_seconds = 0.1;
        let graph = LocalGraph::new("tape", 48_000, 64, 2, 2);
        let (link, _recorder) = channel(&config);
        let mut tape = Tape::new(graph, link, config).unwrap();

        TransportCommand::Record(None).apply(&mut tape).unwrap();
        assert!(tape.transport().is_recording());
        TransportCommand::Record(None).apply(&mut tape).unwrap();
        assert!(!tape.transport().is_recording());

        TransportCommand::SelectTrack(2).apply(&mut tape).unwrap();
        assert_eq!(tape.track_count(), 3);

        assert!(TransportCommand::ClearTrack(5).apply(&mut tape).is_err());
        TransportCommand::ClearTrack(1).apply(&mut tape).unwrap();
        assert_eq!(tape.active_track(), 1);
        assert!(TransportCommand::Seek(-2.0).apply(&mut tape).is_err());
    }
}

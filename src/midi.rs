use crate::control::TransportCommand;
use crate::settings::{MidiAction, MidiBinding, MidiControl};
use anyhow::{anyhow, Result};
use log::{debug, info};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const APP_NAME: &str = "lil-tape";

const DEBOUNCE_DURATION: Duration = Duration::from_millis(50);
const LONG_PRESS_DURATION: Duration = Duration::from_millis(500);
const HOLD_CHECK_INTERVAL: Duration = Duration::from_millis(50);

pub fn get_midi_ports() -> Result<Vec<(String, MidiInputPort)>> {
    let midi_in = MidiInput::new(APP_NAME)?;
    let ports = midi_in.ports();
    let mut result = Vec::with_capacity(ports.len());
    for port in ports.iter() {
        let name = midi_in.port_name(port)?;
        result.push((name, port.clone()));
    }
    Ok(result)
}

/// Button edge decoded from a raw message on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Press(MidiControl),
    Release(MidiControl),
}

fn decode(message: &[u8], control_channel: u8) -> Option<Edge> {
    if message.len() < 3 || message[0] & 0x0F != control_channel {
        return None;
    }
    let data1 = message[1];
    let data2 = message[2];
    match message[0] & 0xF0 {
        0x90 if data2 > 0 => Some(Edge::Press(MidiControl::Note(data1))),
        0x90 | 0x80 => Some(Edge::Release(MidiControl::Note(data1))),
        0xB0 if data2 > 64 => Some(Edge::Press(MidiControl::ControlChange(data1))),
        0xB0 => Some(Edge::Release(MidiControl::ControlChange(data1))),
        _ => None,
    }
}

/// Turns controller button presses into transport commands.
pub struct MidiMapper {
    channel: u8,
    bindings: BTreeMap<MidiControl, MidiAction>,
    last_press_times: BTreeMap<MidiControl, Instant>,
    held_buttons: BTreeMap<MidiControl, (usize, Instant)>,
}

impl MidiMapper {
    pub fn new(channel: u8, bindings: &[MidiBinding]) -> Self {
        Self {
            channel: channel & 0x0F,
            bindings: bindings.iter().map(|b| (b.control, b.action)).collect(),
            last_press_times: BTreeMap::new(),
            held_buttons: BTreeMap::new(),
        }
    }

    pub fn on_message(&mut self, message: &[u8], now: Instant) -> Option<TransportCommand> {
        match decode(message, self.channel)? {
            Edge::Press(control) => {
                let action = *self.bindings.get(&control)?;
                if let Some(last_press) = self.last_press_times.get(&control) {
                    if now.duration_since(*last_press) <= DEBOUNCE_DURATION {
                        return None;
                    }
                }
                self.last_press_times.insert(control, now);

                let command = match action {
                    MidiAction::ToggleRecord => TransportCommand::Record(None),
                    MidiAction::TogglePlay => TransportCommand::Play(None),
                    MidiAction::Stop => TransportCommand::Stop,
                    MidiAction::ClearAll => TransportCommand::ClearAll,
                    MidiAction::Track(index) => {
                        self.held_buttons.entry(control).or_insert((index, now));
                        TransportCommand::SelectTrack(index)
                    }
                };
                Some(command)
            }
            Edge::Release(control) => {
                self.held_buttons.remove(&control);
                None
            }
        }
    }

    /// Track buttons held past the long-press threshold clear their track, once per hold.
    pub fn poll_holds(&mut self, now: Instant) -> Vec<TransportCommand> {
        let mut commands = Vec::new();
        self.held_buttons.retain(|_, (index, pressed)| {
            if now.duration_since(*pressed) >= LONG_PRESS_DURATION {
                commands.push(TransportCommand::ClearTrack(*index));
                false
            } else {
                true
            }
        });
        commands
    }
}

/// Picks the configured port (by substring of its name) or the first available one.
pub fn find_port(wanted: Option<&str>) -> Result<(String, MidiInputPort)> {
    let ports = get_midi_ports()?;
    let found = match wanted {
        Some(wanted) => ports.into_iter().find(|(name, _)| name.contains(wanted)),
        None => ports.into_iter().next(),
    };
    found.ok_or_else(|| anyhow!("No MIDI input port matching {:?}", wanted))
}

/// Opens the MIDI input and forwards decoded commands to `command_sender`.
///
/// The returned thread checks for long presses until `should_exit` is set.
pub fn connect_midi(
    port: MidiInputPort,
    port_name: String,
    mapper: MidiMapper,
    command_sender: Sender<TransportCommand>,
    should_exit: Arc<AtomicBool>,
) -> Result<(MidiInputConnection<()>, JoinHandle<()>)> {
    let mut midi_in = MidiInput::new(APP_NAME)?;
    midi_in.ignore(Ignore::All);
    info!("Opening MIDI connection to: {}", port_name);

    let mapper = Arc::new(Mutex::new(mapper));

    let timer_mapper = mapper.clone();
    let timer_sender = command_sender.clone();
    let timer_port_name = port_name.clone();
    let timer_handle = thread::spawn(move || {
        while !should_exit.load(Ordering::Relaxed) {
            thread::sleep(HOLD_CHECK_INTERVAL);
            let commands = match timer_mapper.lock() {
                Ok(mut mapper) => mapper.poll_holds(Instant::now()),
                Err(_) => break,
            };
            for command in commands {
                debug!("MIDI long press: {:?}", command);
                if timer_sender.send(command).is_err() {
                    return;
                }
            }
        }
        debug!("MIDI timer thread for '{}' exited", timer_port_name);
    });

    let conn_out = midi_in
        .connect(
            &port,
            &format!("{}-midi-in", APP_NAME),
            move |_stamp, message, _| {
                let command = match mapper.lock() {
                    Ok(mut mapper) => mapper.on_message(message, Instant::now()),
                    Err(_) => None,
                };
                if let Some(command) = command {
                    command_sender.send(command).ok();
                }
            },
            (),
        )
        .map_err(|e| anyhow!("Failed to connect to MIDI port: {}", e))?;

    info!("MIDI connection open to {}", port_name);
    Ok((conn_out, timer_handle))
}

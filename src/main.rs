use anyhow::Result;
use env_logger::Env;
use lil_tape::audio_io::start_cpal;
use lil_tape::control::TransportCommand;
use lil_tape::graph::AudioGraph;
use lil_tape::midi::{connect_midi, find_port, MidiMapper};
use lil_tape::settings::{load_settings, AppSettings, Backend};
use lil_tape::Tape;
use log::{error, info, warn};
use midir::MidiInputConnection;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings = load_settings();
    match settings.backend {
        Backend::Jack => run_jack(&settings),
        Backend::Cpal => {
            let (graph, link, config) = start_cpal(&settings)?;
            run(Tape::new(graph, link, config)?, &settings)
        }
    }
}

#[cfg(all(feature = "jack-backend", target_os = "linux"))]
fn run_jack(settings: &AppSettings) -> Result<()> {
    let (graph, link, config) = lil_tape::jack_backend::start_jack(settings)?;
    run(Tape::new(graph, link, config)?, settings)
}

#[cfg(not(all(feature = "jack-backend", target_os = "linux")))]
fn run_jack(_settings: &AppSettings) -> Result<()> {
    Err(anyhow::anyhow!(
        "this build has no JACK backend; set \"backend\": \"cpal\" in settings.json"
    ))
}

fn spawn_console(sender: Sender<TransportCommand>) -> JoinHandle<()> {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<TransportCommand>() {
                Ok(command) => {
                    if sender.send(command).is_err() || command == TransportCommand::Quit {
                        break;
                    }
                }
                Err(e) => warn!("{}", e),
            }
        }
    })
}

type MidiHandles = (MidiInputConnection<()>, JoinHandle<()>);

fn start_midi(
    settings: &AppSettings,
    sender: Sender<TransportCommand>,
    should_exit: Arc<AtomicBool>,
) -> Option<MidiHandles> {
    let wanted = settings.midi_port_name.as_deref()?;
    let mapper = MidiMapper::new(settings.midi_channel, &settings.midi_bindings);
    let connected = find_port(Some(wanted))
        .and_then(|(name, port)| connect_midi(port, name, mapper, sender, should_exit));
    match connected {
        Ok(handles) => Some(handles),
        Err(e) => {
            warn!("MIDI control unavailable: {}", e);
            None
        }
    }
}

fn run<G: AudioGraph>(mut tape: Tape<G>, settings: &AppSettings) -> Result<()> {
    let (sender, receiver) = mpsc::channel();
    let should_exit = Arc::new(AtomicBool::new(false));

    spawn_console(sender.clone());
    let midi = start_midi(settings, sender, should_exit.clone());
    info!("Ready. Commands: rec, play, stop, track N, seek S, clear [all|N], mute N, unmute N, status, quit");

    let mut outcome = Ok(());
    loop {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(TransportCommand::Quit) => break,
            Ok(TransportCommand::Status) => print!("{}", tape.status()),
            Ok(command) => {
                if let Err(e) = command.apply(&mut tape) {
                    warn!("{}", e);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if let Err(e) = tape.poll() {
            error!("{}", e);
            outcome = Err(e.into());
            break;
        }
    }

    should_exit.store(true, Ordering::Relaxed);
    if let Some((connection, timer)) = midi {
        connection.close();
        timer.join().ok();
    }
    if let Err(e) = tape.shutdown() {
        warn!("Shutdown incomplete: {}", e);
    }
    outcome
}

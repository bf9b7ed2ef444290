use crate::error::TapeResult;
use directories::ProjectDirs;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "settings.json";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Jack,
    Cpal,
}

/// A MIDI input that can be bound to an action. Values are 0-127.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MidiControl {
    Note(u8),
    ControlChange(u8),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiAction {
    ToggleRecord,
    TogglePlay,
    Stop,
    /// Selects the track; holding the button clears it.
    Track(usize),
    ClearAll,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiBinding {
    pub control: MidiControl,
    pub action: MidiAction,
}

impl MidiBinding {
    pub fn new(control: MidiControl, action: MidiAction) -> Self {
        Self { control, action }
    }
}

/// Pads 36-39 drive the transport, 40-47 pick tracks 0-7.
pub fn default_midi_bindings() -> Vec<MidiBinding> {
    let mut bindings = vec![
        MidiBinding::new(MidiControl::Note(36), MidiAction::ToggleRecord),
        MidiBinding::new(MidiControl::Note(37), MidiAction::TogglePlay),
        MidiBinding::new(MidiControl::Note(38), MidiAction::Stop),
        MidiBinding::new(MidiControl::Note(39), MidiAction::ClearAll),
    ];
    bindings.extend((0..8u8).map(|i| {
        MidiBinding::new(MidiControl::Note(40 + i), MidiAction::Track(i as usize))
    }));
    bindings
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub backend: Backend,
    pub client_name: String,
    pub host_name: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: Option<u32>,
    pub buffer_size: Option<u32>,
    pub max_tracks: usize,
    pub max_session_seconds: f32,
    pub prealloc_seconds: f32,
    pub pool_chunks: usize,
    /// Ports wired into every new track's left/right inputs.
    pub track_sources: Option<[String; 2]>,
    /// Ports every new track's left/right outputs feed.
    pub track_sinks: Option<[String; 2]>,
    pub midi_port_name: Option<String>,
    pub midi_channel: u8,
    pub midi_bindings: Vec<MidiBinding>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            client_name: "tape".to_string(),
            host_name: None,
            input_device: None,
            output_device: None,
            sample_rate: None,
            buffer_size: None,
            max_tracks: 8,
            max_session_seconds: 600.0,
            prealloc_seconds: 30.0,
            pool_chunks: 64,
            track_sources: None,
            track_sinks: None,
            midi_port_name: None,
            midi_channel: 0,
            midi_bindings: default_midi_bindings(),
        }
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    let dirs = ProjectDirs::from("", "", "lil-tape")?;
    let dir = dirs.config_dir().to_path_buf();
    if let Err(e) = fs::create_dir_all(&dir) {
        warn!("Failed to create config directory at {}: {}", dir.display(), e);
        return None;
    }
    Some(dir)
}

pub fn settings_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(SETTINGS_FILE))
}

pub fn read_settings(path: &Path) -> TapeResult<AppSettings> {
    let json_string = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json_string)?)
}

pub fn write_settings(path: &Path, settings: &AppSettings) -> TapeResult<()> {
    let json_string = serde_json::to_string_pretty(settings)?;
    fs::write(path, json_string)?;
    Ok(())
}

/// Loads the stored settings, falling back to defaults when the file is missing or invalid.
pub fn load_settings() -> AppSettings {
    match settings_path() {
        Some(path) => load_from_path(&path),
        None => AppSettings::default(),
    }
}

/// A missing file is created with the defaults so there is something to edit.
fn load_from_path(path: &Path) -> AppSettings {
    if !path.exists() {
        let settings = AppSettings::default();
        match write_settings(path, &settings) {
            Ok(()) => info!("Default settings written to {}", path.display()),
            Err(e) => warn!("Failed to write default settings to {}: {}", path.display(), e),
        }
        return settings;
    }
    match read_settings(path) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(
                "Failed to load settings from {}, using defaults. Error: {}",
                path.display(),
                e
            );
            AppSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lil-tape-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: AppSettings =
            serde_json::from_str(r#"{ "backend": "cpal", "max_tracks": 4 }"#).unwrap();
        assert_eq!(settings.backend, Backend::Cpal);
        assert_eq!(settings.max_tracks, 4);
        assert_eq!(settings.client_name, "tape");
        assert_eq!(settings.pool_chunks, 64);
        assert_eq!(settings.midi_bindings, default_midi_bindings());
    }

    #[test]
    fn test_write_then_read_file() {
        let path = temp_path("settings");
        let mut settings = AppSettings::default();
        settings.track_sinks = Some(["mixer:in_1".into(), "mixer:in_2".into()]);
        settings.midi_bindings = vec![MidiBinding::new(
            MidiControl::ControlChange(20),
            MidiAction::TogglePlay,
        )];

        write_settings(&path, &settings).unwrap();
        let loaded = read_settings(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let path = temp_path("invalid");
        fs::write(&path, "{ not json").unwrap();
        let result = read_settings(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(crate::error::TapeError::Json(_))));
    }

    #[test]
    fn test_first_load_writes_defaults() {
        let path = temp_path("first-run");
        let _ = fs::remove_file(&path);

        let settings = load_from_path(&path);
        let written = read_settings(&path);
        let _ = fs::remove_file(&path);
        assert_eq!(settings, AppSettings::default());
        assert_eq!(written.unwrap(), AppSettings::default());
    }

    #[test]
    fn test_invalid_file_loads_defaults_and_is_kept() {
        let path = temp_path("garbled");
        fs::write(&path, "{ not json").unwrap();

        let settings = load_from_path(&path);
        let contents = fs::read_to_string(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(settings, AppSettings::default());
        assert_eq!(contents, "{ not json");
    }

    #[test]
    fn test_default_bindings_cover_eight_tracks() {
        let tracks = default_midi_bindings()
            .iter()
            .filter(|b| matches!(b.action, MidiAction::Track(_)))
            .count();
        assert_eq!(tracks, 8);
    }
}

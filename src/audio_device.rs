use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, HostId};

/// Resolves a host by its display name (e.g. "ALSA", "JACK"), or the default host.
pub fn find_host(host_name: Option<&str>) -> Result<Host> {
    let Some(wanted) = host_name else {
        return Ok(cpal::default_host());
    };
    let host_id = cpal::available_hosts()
        .into_iter()
        .find(|id| id.name().eq_ignore_ascii_case(wanted))
        .ok_or_else(|| anyhow!("Audio host not available: {}", wanted))?;
    get_host_from_id(host_id)
}

fn get_host_from_id(host_id: HostId) -> Result<Host> {
    cpal::host_from_id(host_id).map_err(|e| anyhow!("Failed to get audio host: {}", e))
}

pub fn get_input_devices(host: &Host) -> Result<Vec<(String, Device)>> {
    let devices = host.input_devices()?;
    let mut result = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            result.push((name, device));
        }
    }
    Ok(result)
}

pub fn get_output_devices(host: &Host) -> Result<Vec<(String, Device)>> {
    let devices = host.output_devices()?;
    let mut result = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            result.push((name, device));
        }
    }
    Ok(result)
}

pub fn find_input_device(host: &Host, name: Option<&str>) -> Result<Device> {
    match name {
        Some(name) => get_input_devices(host)?
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, device)| device)
            .ok_or_else(|| anyhow!("Input device not found: {}", name)),
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device")),
    }
}

pub fn find_output_device(host: &Host, name: Option<&str>) -> Result<Device> {
    match name {
        Some(name) => get_output_devices(host)?
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, device)| device)
            .ok_or_else(|| anyhow!("Output device not found: {}", name)),
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device")),
    }
}

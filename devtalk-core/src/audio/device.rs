//! Audio device enumeration and selection.

use serde::{Deserialize, Serialize};

#[cfg(feature = "audio-cpal")]
use crate::error::{Result, TutorError};

/// Direction of an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Input,
    Output,
}

/// Metadata about one audio endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub kind: DeviceKind,
    pub is_default: bool,
    /// Inputs only: the name suggests it records system output, not a voice.
    pub is_loopback_like: bool,
    /// Best candidate for this direction.
    pub is_recommended: bool,
}

const LOOPBACK_HINTS: &[&str] = &[
    "stereo mix",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "wave out",
    "virtual output",
];

const VOICE_HINTS: &[&str] = &["microphone", "mic", "headset", "array", "usb", "webcam"];

/// Whether an input name looks like a system-audio loopback source.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_HINTS.iter().any(|h| lowered.contains(h))
}

/// Ranking used to pick a speaking microphone. Higher is better.
pub fn input_rank(name: &str, is_default: bool) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut rank = if is_loopback_like_name(&lowered) { -20 } else { 10 };
    if VOICE_HINTS.iter().any(|h| lowered.contains(h)) {
        rank += 5;
    }
    if is_default {
        rank += 3;
    }
    rank
}

/// Sort candidates best-first and flag the winner.
pub fn rank_devices(mut list: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    let score = |d: &DeviceInfo| match d.kind {
        DeviceKind::Input => input_rank(&d.name, d.is_default),
        DeviceKind::Output => i32::from(d.is_default),
    };
    list.sort_by(|a, b| {
        score(b)
            .cmp(&score(a))
            .then_with(|| a.name.to_ascii_lowercase().cmp(&b.name.to_ascii_lowercase()))
    });
    if let Some(best) = list.first_mut() {
        best.is_recommended = !best.is_loopback_like;
    }
    list
}

#[cfg(feature = "audio-cpal")]
fn describe<I>(devices: I, default_name: Option<String>, kind: DeviceKind) -> Vec<DeviceInfo>
where
    I: Iterator<Item = cpal::Device>,
{
    use cpal::traits::DeviceTrait;

    let list = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Audio Device {}", idx + 1));
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                is_loopback_like: kind == DeviceKind::Input && is_loopback_like_name(&name),
                is_recommended: false,
                kind,
                name,
            }
        })
        .collect();
    rank_devices(list)
}

/// List microphones, best candidate first. Empty without cpal.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    match host.input_devices() {
        Ok(devices) => describe(devices, default_name, DeviceKind::Input),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    }
}

/// List speakers, default first. Empty without cpal.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    match host.output_devices() {
        Ok(devices) => describe(devices, default_name, DeviceKind::Output),
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

/// Pick the named input, else the default, else the first one available.
#[cfg(feature = "audio-cpal")]
pub(crate) fn resolve_input_device(preferred: Option<&str>) -> Result<cpal::Device> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    if let Some(wanted) = preferred {
        let found = host
            .input_devices()
            .ok()
            .and_then(|mut it| it.find(|d| d.name().map(|n| n == wanted).unwrap_or(false)));
        match found {
            Some(device) => return Ok(device),
            None => tracing::warn!(preferred = wanted, "input device not found, falling back"),
        }
    }
    if let Some(device) = host.default_input_device() {
        return Ok(device);
    }
    host.input_devices()
        .map_err(|e| TutorError::AudioDevice(e.to_string()))?
        .next()
        .ok_or(TutorError::NoDefaultInputDevice)
}

/// Pick the named output, else the default one.
#[cfg(feature = "audio-cpal")]
pub(crate) fn resolve_output_device(preferred: Option<&str>) -> Result<cpal::Device> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    if let Some(wanted) = preferred {
        let found = host
            .output_devices()
            .ok()
            .and_then(|mut it| it.find(|d| d.name().map(|n| n == wanted).unwrap_or(false)));
        match found {
            Some(device) => return Ok(device),
            None => tracing::warn!(preferred = wanted, "output device not found, falling back"),
        }
    }
    host.default_output_device()
        .ok_or(TutorError::NoDefaultOutputDevice)
}

//! Audio device enumeration.

use serde::{Deserialize, Serialize};

/// Which side of the session a device serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default device for its direction.
    pub is_default: bool,
    /// Input that most likely captures system output rather than a voice.
    pub is_loopback_like: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "virtual output",
    "monitor of",
    "speakers (",
    "headphones (",
];

/// Best-effort heuristic for loopback/system-output capture devices.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Order devices for display: defaults first, loopback-like inputs last.
pub fn sort_for_display(devices: &mut [DeviceInfo]) {
    devices.sort_by_key(|d| {
        (
            d.direction == DeviceDirection::Output,
            !d.is_default,
            d.is_loopback_like,
            d.name.to_ascii_lowercase(),
        )
    });
}

/// List all available audio input devices.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut list = match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                DeviceInfo {
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    is_loopback_like: is_loopback_like_name(&name),
                    direction: DeviceDirection::Input,
                    name,
                }
            })
            .collect::<Vec<_>>(),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            default_name
                .map(|name| {
                    vec![DeviceInfo {
                        is_loopback_like: is_loopback_like_name(&name),
                        name,
                        direction: DeviceDirection::Input,
                        is_default: true,
                    }]
                })
                .unwrap_or_default()
        }
    };
    sort_for_display(&mut list);
    list
}

/// List all available audio output devices.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut list = match host.output_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                DeviceInfo {
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    is_loopback_like: false,
                    direction: DeviceDirection::Output,
                    name,
                }
            })
            .collect::<Vec<_>>(),
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            Vec::new()
        }
    };
    sort_for_display(&mut list);
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}

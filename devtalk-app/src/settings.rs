//! Persistent application settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use devtalk_core::{
    live::{DEFAULT_LIVE_MODEL, DEFAULT_VOICE},
    LiveSetup, SessionConfig,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";

/// Environment variables checked for the API key, highest priority first.
pub const API_KEY_ENV_VARS: &[&str] = &["DEVTALK_API_KEY", "GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub api_key: Option<String>,
    pub text_model: String,
    pub live_model: String,
    pub voice_name: String,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    /// Display gain over frame RMS for the volume bar.
    pub volume_gain: f32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            text_model: DEFAULT_TEXT_MODEL.into(),
            live_model: DEFAULT_LIVE_MODEL.into(),
            voice_name: DEFAULT_VOICE.into(),
            input_device: None,
            output_device: None,
            volume_gain: 5.0,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.api_key = trimmed(self.api_key.take());
        self.input_device = trimmed(self.input_device.take());
        self.output_device = trimmed(self.output_device.take());
        self.text_model = non_empty_or(&self.text_model, DEFAULT_TEXT_MODEL);
        self.live_model = non_empty_or(&self.live_model, DEFAULT_LIVE_MODEL);
        self.voice_name = non_empty_or(&self.voice_name, DEFAULT_VOICE);
        self.volume_gain = if self.volume_gain.is_finite() {
            self.volume_gain.clamp(1.0, 20.0)
        } else {
            5.0
        };
    }

    /// CLI flag, then environment, then the settings file.
    pub fn resolve_api_key(&self, cli: Option<&str>) -> Option<String> {
        self.resolve_api_key_with(cli, |name| std::env::var(name).ok())
    }

    fn resolve_api_key_with(
        &self,
        cli: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        trimmed(cli.map(str::to_string))
            .or_else(|| API_KEY_ENV_VARS.iter().find_map(|name| trimmed(env(name))))
            .or_else(|| self.api_key.clone())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            volume_gain: self.volume_gain,
            input_device: self.input_device.clone(),
            output_device: self.output_device.clone(),
            ..SessionConfig::default()
        }
    }

    pub fn live_setup(&self) -> LiveSetup {
        LiveSetup {
            model: self.live_model.clone(),
            voice_name: self.voice_name.clone(),
            ..LiveSetup::default()
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn non_empty_or(raw: &str, fallback: &str) -> String {
    let value = raw.trim();
    if value.is_empty() {
        fallback.into()
    } else {
        value.into()
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("devtalk")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("devtalk")
            .join("settings.json")
    }
}

/// Missing or unreadable files yield defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_clamps() {
        let mut s = AppSettings {
            api_key: Some("   ".into()),
            text_model: " ".into(),
            input_device: Some("  USB Mic  ".into()),
            volume_gain: 100.0,
            ..AppSettings::default()
        };
        s.normalize();
        assert_eq!(s.api_key, None);
        assert_eq!(s.text_model, DEFAULT_TEXT_MODEL);
        assert_eq!(s.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(s.volume_gain, 20.0);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let s: AppSettings = serde_json::from_str(r#"{"voiceName":"Puck"}"#).unwrap();
        assert_eq!(s.voice_name, "Puck");
        assert_eq!(s.live_model, DEFAULT_LIVE_MODEL);
        assert_eq!(s.volume_gain, 5.0);
    }

    #[test]
    fn api_key_priority_is_cli_then_env_then_file() {
        let s = AppSettings {
            api_key: Some("from-file".into()),
            ..AppSettings::default()
        };
        let env = |name: &str| match name {
            "GEMINI_API_KEY" => Some("from-gemini-env".to_string()),
            "API_KEY" => Some("from-generic-env".to_string()),
            _ => None,
        };
        assert_eq!(
            s.resolve_api_key_with(Some("from-cli"), env).as_deref(),
            Some("from-cli")
        );
        assert_eq!(
            s.resolve_api_key_with(None, env).as_deref(),
            Some("from-gemini-env")
        );
        assert_eq!(
            s.resolve_api_key_with(None, |_| None).as_deref(),
            Some("from-file")
        );
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = std::env::temp_dir().join(format!("devtalk-settings-{}", std::process::id()));
        let path = dir.join("settings.json");
        let settings = AppSettings {
            voice_name: "Charon".into(),
            output_device: Some("Headphones".into()),
            ..AppSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn session_config_carries_devices_and_gain() {
        let s = AppSettings {
            input_device: Some("Mic".into()),
            volume_gain: 3.0,
            ..AppSettings::default()
        };
        let config = s.session_config();
        assert_eq!(config.input_device.as_deref(), Some("Mic"));
        assert_eq!(config.volume_gain, 3.0);
        assert_eq!(config.frame_size, 4096);
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::{default_playback_dir, ProcessingSettings};

const SETTINGS_FILE_NAME: &str = "settings.json";
const SERVER_URL_ENV: &str = "VOXNOTE_SERVER_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    /// How often the displayed duration is refreshed while recording.
    pub ticker_interval_ms: u64,

    /// How often the visualizer samples the analysis tap (~one display refresh).
    pub visualizer_interval_ms: u64,

    /// Length of captured audio per encoded chunk.
    pub chunk_interval_ms: u64,

    /// Gain, compressor and analysis tap parameters.
    pub processing: ProcessingSettings,

    /// Base URL of the voice-notes server.
    pub server_url: String,

    pub upload_timeout_secs: u64,

    /// Where finished takes are written for playback. Defaults to the local data dir.
    pub playback_dir: Option<PathBuf>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            ticker_interval_ms: 100,
            visualizer_interval_ms: 16,
            chunk_interval_ms: 1000,
            processing: ProcessingSettings::default(),
            server_url: "http://localhost:3000".to_string(),
            upload_timeout_secs: 60,
            playback_dir: None,
        }
    }
}

impl RecorderSettings {
    pub fn ticker_interval(&self) -> Duration {
        Duration::from_millis(self.ticker_interval_ms.max(1))
    }

    pub fn visualizer_interval(&self) -> Duration {
        Duration::from_millis(self.visualizer_interval_ms.max(1))
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs.max(1))
    }

    pub fn playback_dir(&self) -> PathBuf {
        self.playback_dir.clone().unwrap_or_else(default_playback_dir)
    }

    /// Apply environment overrides (`VOXNOTE_SERVER_URL`).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            if !url.is_empty() {
                self.server_url = url;
            }
        }
        self
    }
}

/// Default settings path: <config dir>/voxnote/settings.json
pub fn default_settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
    Ok(dir.join("voxnote").join(SETTINGS_FILE_NAME))
}

pub fn load_settings(path: &Path) -> RecorderSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<RecorderSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                RecorderSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RecorderSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            RecorderSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &RecorderSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write atomically: write to a temp file in the same directory, then rename.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Windows, rename fails if the destination exists
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(format!("Remove existing settings file {:?}: {}", path, e));
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}

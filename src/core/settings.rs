use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Build-time API defaults, the console's equivalent of bundler env constants.
const BUILD_API_URL: Option<&str> = option_env!("CHECKIN_API_URL");
const BUILD_API_HEADER: Option<&str> = option_env!("CHECKIN_API_HEADER");
const BUILD_API_KEY: Option<&str> = option_env!("CHECKIN_API_KEY");

/// Json struct for console settings
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub api_url: String,
    /// Name of the shared-secret header sent on every API request
    pub api_header_name: String,
    pub api_header_value: String,
    pub routes: ApiRoutes,
    pub request_timeout_ms: u64,

    /// File holding the persisted bearer token
    pub token_file: Option<PathBuf>,

    /// Minimum time between two accepted scans of the same badge
    pub scan_cooldown_ms: u64,
    pub frame_interval_ms: u64,

    pub export_scale: u32,
    /// Directory that relative image references resolve against
    pub assets_dir: PathBuf,
    pub fonts: FontPaths,

    pub web_port: u16,

    pub speech_command: String,
    pub speech_rate: f32,
    pub speech_pitch: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ApiRoutes {
    pub attendance: String,
    pub attendance_summary: String,
    pub active_events: String,
    pub participants: String,
    pub participant: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct FontPaths {
    pub regular: Option<PathBuf>,
    pub bold: Option<PathBuf>,
    pub italic: Option<PathBuf>,
}

impl Default for ApiRoutes {
    fn default() -> Self {
        Self {
            attendance: "/attendance".to_owned(),
            attendance_summary: "/attendance/summary".to_owned(),
            active_events: "/events/active".to_owned(),
            participants: "/participants".to_owned(),
            participant: "/participants/{id}".to_owned(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: BUILD_API_URL.unwrap_or("http://localhost:3000/api").to_owned(),
            api_header_name: BUILD_API_HEADER.unwrap_or("x-api-key").to_owned(),
            api_header_value: BUILD_API_KEY.unwrap_or_default().to_owned(),
            routes: ApiRoutes::default(),
            request_timeout_ms: 15_000,
            token_file: None,
            scan_cooldown_ms: 2_000,
            frame_interval_ms: 100,
            export_scale: 3,
            assets_dir: PathBuf::from("assets"),
            fonts: FontPaths::default(),
            web_port: 28020,
            speech_command: "espeak-ng".to_owned(),
            speech_rate: 0.95,
            speech_pitch: 1.2,
        }
    }
}

impl Settings {
    /// Loads settings from a json file, or the defaults when no file is given.
    pub fn load(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings file {}", path.display()))?;
                let settings = serde_json::from_str::<Settings>(&text)
                    .with_context(|| format!("Invalid settings file {}", path.display()))?;
                log::info!("Loaded settings from {}", path.display());
                Ok(settings)
            }
            None => Ok(Settings::default()),
        }
    }

    pub fn scan_cooldown(&self) -> Duration {
        Duration::from_millis(self.scan_cooldown_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

use rollcall_core::machine::{
    MachineConfig, DEFAULT_CAPTURE_MARGIN, DEFAULT_RESULT_DISPLAY, DEFAULT_STABILITY_THRESHOLD,
};
use rollcall_core::capture::DEFAULT_JPEG_QUALITY;
use rollcall_core::presence::DEFAULT_SAMPLE_WINDOW;
use rollcall_core::recognition::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_RETRY};
use rollcall_core::results::DEFAULT_RESULT_CAPACITY;
use rollcall_core::stability::DEFAULT_PRESENCE_THRESHOLD;
use rollcall_core::{RecognitionSettings, SubjectKind};
use std::path::PathBuf;
use std::time::Duration;

use crate::session::SessionConfig;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Frames to discard after the camera opens (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Base URL of the recognition backend.
    pub recognizer_url: String,
    /// Bearer token for the backend, if it requires one.
    pub api_token: Option<String>,
    /// Subject hint sent with every recognition call.
    pub subject: Option<SubjectKind>,
    pub request_timeout_secs: u64,
    /// TOML file holding confidence threshold and retry budget.
    pub settings_path: PathBuf,
    /// Used when the settings file is absent or invalid.
    pub default_settings: RecognitionSettings,
    pub presence_threshold: f32,
    pub stability_threshold: u32,
    pub capture_margin: u32,
    pub result_display_ms: u64,
    pub sample_interval_ms: u64,
    pub sample_window: u32,
    pub jpeg_quality: u8,
    pub result_capacity: usize,
    /// Register on the session bus instead of the system bus.
    pub use_session_bus: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".config")
            })
            .join("rollcall");

        let settings_path = std::env::var("ROLLCALL_SETTINGS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir.join("recognition.toml"));

        let subject = std::env::var("ROLLCALL_SUBJECT_TYPE")
            .ok()
            .and_then(|v| match v.parse::<SubjectKind>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring ROLLCALL_SUBJECT_TYPE");
                    None
                }
            });

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            frame_width: env_u32("ROLLCALL_FRAME_WIDTH", 640),
            frame_height: env_u32("ROLLCALL_FRAME_HEIGHT", 480),
            warmup_frames: env_usize("ROLLCALL_WARMUP_FRAMES", 4),
            recognizer_url: std::env::var("ROLLCALL_RECOGNIZER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080/api".to_string()),
            api_token: std::env::var("ROLLCALL_API_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            subject,
            request_timeout_secs: env_u64("ROLLCALL_REQUEST_TIMEOUT_SECS", 10),
            settings_path,
            default_settings: RecognitionSettings {
                confidence_threshold: env_f32(
                    "ROLLCALL_CONFIDENCE_THRESHOLD",
                    DEFAULT_CONFIDENCE_THRESHOLD,
                ),
                max_retry: env_u32("ROLLCALL_MAX_RETRY", DEFAULT_MAX_RETRY),
            }
            .validated(),
            presence_threshold: env_f32("ROLLCALL_PRESENCE_THRESHOLD", DEFAULT_PRESENCE_THRESHOLD),
            stability_threshold: env_u32(
                "ROLLCALL_STABILITY_THRESHOLD",
                DEFAULT_STABILITY_THRESHOLD,
            ),
            capture_margin: env_u32("ROLLCALL_CAPTURE_MARGIN", DEFAULT_CAPTURE_MARGIN),
            result_display_ms: env_u64(
                "ROLLCALL_RESULT_DISPLAY_MS",
                DEFAULT_RESULT_DISPLAY.as_millis() as u64,
            ),
            sample_interval_ms: env_u64("ROLLCALL_SAMPLE_INTERVAL_MS", 33).max(1),
            sample_window: env_u32("ROLLCALL_SAMPLE_WINDOW", DEFAULT_SAMPLE_WINDOW),
            jpeg_quality: env_u32("ROLLCALL_JPEG_QUALITY", DEFAULT_JPEG_QUALITY as u32)
                .clamp(1, 100) as u8,
            result_capacity: env_usize("ROLLCALL_RESULT_CAPACITY", DEFAULT_RESULT_CAPACITY),
            use_session_bus: std::env::var("ROLLCALL_SESSION_BUS")
                .map(|v| v != "0")
                .unwrap_or(false),
        }
    }

    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            presence_threshold: self.presence_threshold,
            stability_threshold: self.stability_threshold,
            capture_margin: self.capture_margin,
            result_display: Duration::from_millis(self.result_display_ms),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            machine: self.machine_config(),
            sample_interval: Duration::from_millis(self.sample_interval_ms),
            sample_window: self.sample_window,
            jpeg_quality: self.jpeg_quality,
            result_capacity: self.result_capacity,
            subject: self.subject,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

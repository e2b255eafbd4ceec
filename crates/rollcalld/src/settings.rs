//! Recognition settings read from a TOML file.
//!
//! ```toml
//! confidence_threshold = 0.85
//! max_retry = 5
//! ```
//!
//! The file is re-read at the start of every episode (session start and
//! each auto-reset) so an operator can retune a kiosk without restarting
//! the daemon. A missing or unreadable file falls
//! back to the configured defaults.

use rollcall_core::{RecognitionSettings, SettingsProvider};
use std::path::PathBuf;

pub struct FileSettings {
    path: PathBuf,
    fallback: RecognitionSettings,
}

impl FileSettings {
    pub fn new(path: PathBuf, fallback: RecognitionSettings) -> Self {
        Self { path, fallback }
    }
}

impl SettingsProvider for FileSettings {
    fn load(&self) -> RecognitionSettings {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no settings file; using defaults");
                return self.fallback;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "settings file unreadable; using defaults");
                return self.fallback;
            }
        };

        match toml::from_str::<RecognitionSettings>(&text) {
            Ok(settings) => {
                let settings = settings.validated();
                tracing::debug!(
                    path = %self.path.display(),
                    confidence_threshold = settings.confidence_threshold,
                    max_retry = settings.max_retry,
                    "loaded recognition settings"
                );
                settings
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "bad settings TOML; using defaults");
                self.fallback
            }
        }
    }
}

//! Engine configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uiproof_common::{Error, Result};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Store directory path (database, scenario overrides, temp videos)
    pub store_path: PathBuf,

    /// Base URL of the application under test
    pub base_url: String,

    /// WebDriver endpoint driving the browser session
    pub webdriver_url: String,

    /// Tokens looked for in the live page text by the error-detection
    /// check after each step (matched case-insensitively)
    pub error_tokens: Vec<String>,

    /// Upper bound on a whole run; exceeded runs are forced to `error`
    pub run_deadline_secs: u64,

    /// Fixed delay between scripted UI actions, to tolerate the latency
    /// of the application under test
    pub action_delay_ms: u64,

    /// Screen recording settings
    pub recording: RecordingConfig,

    /// Credentials used by the login step of built-in scenarios
    pub login: LoginConfig,

    /// Image-template name -> CSS selector mapping used by the WebDriver
    /// actuator to resolve legacy image-based clicks
    pub image_targets: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: uiproof_common::default_store_path(),
            base_url: "http://localhost:8080".to_string(),
            webdriver_url: "http://127.0.0.1:9515".to_string(),
            error_tokens: vec![
                "erreur".to_string(),
                "error".to_string(),
                "exception".to_string(),
            ],
            run_deadline_secs: 600,
            action_delay_ms: 1000,
            recording: RecordingConfig::default(),
            login: LoginConfig::default(),
            image_targets: default_image_targets(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&raw).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("state.db")
    }

    /// Directory holding scenario override files
    pub fn scenarios_dir(&self) -> PathBuf {
        self.store_path.join("scenarios")
    }

    /// Directory for in-flight recording files
    pub fn video_dir(&self) -> PathBuf {
        self.store_path.join("videos")
    }
}

/// Screen recording configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// When false the orchestrator skips recording entirely
    pub enabled: bool,

    /// ffmpeg binary
    pub ffmpeg_path: String,

    /// X display to grab
    pub display: String,

    /// Capture resolution
    pub resolution: String,

    /// Capture framerate
    pub framerate: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ffmpeg_path: "ffmpeg".to_string(),
            display: ":10.0".to_string(),
            resolution: "1920x1080".to_string(),
            framerate: 25,
        }
    }
}

/// Credentials for the legacy application login step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Frame containing the login form
    pub frame: String,
    /// Name attribute of the user field
    pub user_field: String,
    /// Name attribute of the password field
    pub password_field: String,
    pub username: String,
    pub password: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            frame: "fappli".to_string(),
            user_field: "userID".to_string(),
            password_field: "userPWD".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }
}

fn default_image_targets() -> HashMap<String, String> {
    // Legacy scenarios click on screenshots of buttons; the WebDriver
    // actuator resolves them to selectors instead.
    [
        ("boutonVoulezVous.PNG", "input[name='btnVoulezVous']"),
        ("BoutonValider.PNG", "input[name='btnValider']"),
        ("boutonSelect.PNG", "input[name='btnSelect']"),
        ("boutonRetour.PNG", "input[name='btnRetour']"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert!(cfg.run_deadline_secs > 0);
        assert!(!cfg.error_tokens.is_empty());
        assert!(cfg.image_targets.contains_key("BoutonValider.PNG"));
        assert_eq!(cfg.db_path().file_name().unwrap(), "state.db");
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            base_url = "http://ikos.test.local"
            run_deadline_secs = 120

            [recording]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.base_url, "http://ikos.test.local");
        assert_eq!(cfg.run_deadline_secs, 120);
        assert!(!cfg.recording.enabled);
        // untouched sections keep their defaults
        assert_eq!(cfg.recording.framerate, 25);
        assert_eq!(cfg.login.frame, "fappli");
    }
}

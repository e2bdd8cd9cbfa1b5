use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides `server.base_url`
pub const SERVER_URL_ENV: &str = "SNAPSCAN_SERVER_URL";
/// Environment variable naming the preset used when no config file exists yet
pub const PROFILE_ENV: &str = "SNAPSCAN_PROFILE";
const CONFIG_FILE: &str = "snapscan_config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub display: DisplayConfig,
    pub capture: CaptureConfig,
    pub messages: ErrorMessages,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the recognition service; `/recognize` is appended.
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub preview_interval_ms: u64,
    /// Camera to select at startup; unset lets the camera stack pick.
    #[serde(default)]
    pub camera: Option<String>,
}

/// Texts the capture surface shows verbatim for its failure modes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorMessages {
    pub no_camera_accessible: String,
    pub permission_denied: String,
    pub switch_camera: String,
    pub frame_encoding: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    pub result_banner_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                base_url: "http://localhost:8000".to_string(),
            },
            display: DisplayConfig {
                width: 800,
                height: 480,
                fullscreen: true,
            },
            capture: CaptureConfig {
                width: 1280,
                height: 960,
                quality: 90,
                preview_interval_ms: 33,
                camera: None,
            },
            messages: ErrorMessages::default(),
            ui: UiConfig {
                result_banner_secs: 5,
            },
        }
    }
}

impl Default for ErrorMessages {
    fn default() -> Self {
        Self {
            no_camera_accessible: "No camera device accessible. Please connect your camera or try a different device.".to_string(),
            permission_denied: "Permission denied. Please check camera permissions and restart.".to_string(),
            switch_camera: "It is not possible to switch camera to different one because there is only one video device accessible.".to_string(),
            frame_encoding: "Frame encoding is not supported.".to_string(),
        }
    }
}

impl Config {
    /// Load from the working directory, creating a default file when missing,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from(CONFIG_FILE);

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            let profile = std::env::var(PROFILE_ENV).ok();
            log::info!("Config file not found, creating {} configuration", profile.as_deref().unwrap_or("kiosk"));
            let default_config = Self::preset(profile.as_deref());
            default_config.save_to_file(&config_path)?;
            default_config
        };

        config.apply_env_overrides(std::env::var(SERVER_URL_ENV).ok());
        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| "Failed to parse configuration file")?;

        log::info!("Configuration loaded from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    /// The server URL override is taken as given; a bad value shows up as an upload failure.
    pub fn apply_env_overrides(&mut self, server_url: Option<String>) {
        if let Some(url) = server_url.filter(|u| !u.trim().is_empty()) {
            log::info!("Using recognition server from {}", SERVER_URL_ENV);
            self.server.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow::anyhow!("Invalid display dimensions"));
        }

        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow::anyhow!("Invalid capture dimensions"));
        }

        if self.capture.quality == 0 || self.capture.quality > 100 {
            return Err(anyhow::anyhow!("Invalid JPEG quality: {}", self.capture.quality));
        }

        if self.capture.preview_interval_ms == 0 {
            return Err(anyhow::anyhow!("Invalid preview interval"));
        }

        Ok(())
    }
}

// Environment-specific presets
impl Config {
    /// `desktop` selects the windowed development preset; anything else is the kiosk.
    pub fn preset(profile: Option<&str>) -> Self {
        match profile.map(str::trim) {
            Some("desktop") => Self::development_desktop(),
            _ => Self::kiosk(),
        }
    }

    pub fn kiosk() -> Self {
        Config::default()
    }

    pub fn development_desktop() -> Self {
        Config {
            display: DisplayConfig {
                width: 1024,
                height: 768,
                fullscreen: false,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.base_url, "http://localhost:8000");
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.capture.quality = 0;
        assert!(config.validate().is_err());

        config.capture.quality = 90;
        config.display.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_url_not_validated() {
        let mut config = Config::default();
        config.server.base_url = "not a url".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override() {
        let mut config = Config::default();
        config.apply_env_overrides(Some("https://recognizer.example".to_string()));
        assert_eq!(config.server.base_url, "https://recognizer.example");

        config.apply_env_overrides(Some("   ".to_string()));
        assert_eq!(config.server.base_url, "https://recognizer.example");

        config.apply_env_overrides(None);
        assert_eq!(config.server.base_url, "https://recognizer.example");
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("test_config.toml");

        let mut original = Config::development_desktop();
        original.messages.permission_denied = "Allow the camera, then restart.".to_string();
        original.save_to_file(&config_path).unwrap();

        let loaded = Config::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.display.width, 1024);
        assert_eq!(loaded.server.base_url, original.server.base_url);
        assert_eq!(loaded.messages, original.messages);
    }

    #[test]
    fn test_preset_configs() {
        assert!(Config::kiosk().validate().is_ok());
        assert!(Config::development_desktop().validate().is_ok());

        assert!(!Config::preset(Some("desktop")).display.fullscreen);
        assert!(Config::preset(Some("kiosk")).display.fullscreen);
        assert!(Config::preset(None).display.fullscreen);
    }

    #[test]
    fn test_camera_selection_is_optional() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("no_camera.toml");

        let mut config = Config::default();
        config.save_to_file(&config_path).unwrap();
        assert_eq!(Config::load_from_file(&config_path).unwrap().capture.camera, None);

        config.capture.camera = Some("1".to_string());
        config.save_to_file(&config_path).unwrap();
        let loaded = Config::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.capture.camera.as_deref(), Some("1"));
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::VoiceError;

/// Environment variables checked for the API key, in order
const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Settings for live talk sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    /// Prebuilt voice used for spoken replies
    pub voice_name: String,
    pub system_instruction: String,
    /// Ask the service for partial transcripts of its replies
    pub output_transcription: bool,
    pub endpoint: String,
    /// How long to wait for the service to confirm the session
    pub setup_timeout_secs: u64,
    pub visualizer_fps: u32,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
            voice_name: "Zephyr".to_string(),
            system_instruction:
                "You are a helpful, conversational AI assistant. Respond naturally and concisely."
                    .to_string(),
            output_transcription: true,
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            setup_timeout_secs: 15,
            visualizer_fps: 60,
            input_device: None,
            output_device: None,
        }
    }
}

impl VoiceConfig {
    /// API key from the environment, falling back to the config file
    pub fn resolve_api_key(&self) -> Result<String, VoiceError> {
        API_KEY_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .chain(self.api_key.clone())
            .find(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                VoiceError::Config(format!(
                    "No API key configured (set {} or api_key in {})",
                    API_KEY_VARS[0],
                    config_path().display()
                ))
            })
    }
}

/// Path to the config file
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("live-talk")
        .join("voice.json")
}

/// Load config from the default location, falling back to defaults
pub fn load_config() -> VoiceConfig {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> VoiceConfig {
    if !path.exists() {
        return VoiceConfig::default();
    }

    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
            VoiceConfig::default()
        }),
        Err(e) => {
            tracing::warn!("Failed to read config {}: {}", path.display(), e);
            VoiceConfig::default()
        }
    }
}

/// Save config to the default location
pub fn save_config(config: &VoiceConfig) -> Result<(), VoiceError> {
    save_config_to(config, &config_path())
}

pub fn save_config_to(config: &VoiceConfig, path: &Path) -> Result<(), VoiceError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| VoiceError::Config(e.to_string()))?;
    }
    let content =
        serde_json::to_string_pretty(config).map_err(|e| VoiceError::Config(e.to_string()))?;
    fs::write(path, content).map_err(|e| VoiceError::Config(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("live-talk-{}", uuid::Uuid::new_v4()))
            .join("voice.json")
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = load_config_from(&temp_path());
        assert_eq!(config, VoiceConfig::default());
        assert_eq!(config.voice_name, "Zephyr");
        assert!(config.output_transcription);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path();
        let config = VoiceConfig {
            voice_name: "Kore".to_string(),
            visualizer_fps: 30,
            ..VoiceConfig::default()
        };
        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path), config);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let path = temp_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"voice_name": "Puck"}"#).unwrap();

        let config = load_config_from(&path);
        assert_eq!(config.voice_name, "Puck");
        assert_eq!(config.setup_timeout_secs, 15);

        fs::write(&path, "not json").unwrap();
        assert_eq!(load_config_from(&path), VoiceConfig::default());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}

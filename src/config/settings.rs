//! Persisted user settings (`config.toml`).

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::lib::{TaiError, TaiResult};

pub const CONFIG_ENV: &str = "TAI_CONFIG";
const API_KEY_ENVS: [&str; 2] = ["TAI_API_KEY", "OPENAI_API_KEY"];

/// Credential handle. Its `Debug` and `Display` never show the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// `sk-abc…wxyz` style preview for display.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 10 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub enabled: bool,
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: Provider::OpenAi,
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 150,
            temperature: 0.1,
            base_url: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub timeout_secs: u64,
    pub max_output_lines: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_output_lines: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ai: AiSettings,
    pub execution: ExecutionSettings,
}

impl Settings {
    /// `$TAI_CONFIG`, else `<config dir>/tai/config.toml`.
    pub fn default_path() -> PathBuf {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tai")
            .join("config.toml")
    }

    /// Reads settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> TaiResult<Self> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let settings = toml::from_str(&text)?;
                tracing::debug!(path = %path.display(), "loaded settings");
                Ok(settings)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> TaiResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "saved settings");
        Ok(())
    }

    pub fn reset_to_defaults(&mut self) {
        *self = Self::default();
    }

    /// Stored key, or one from `TAI_API_KEY` / `OPENAI_API_KEY`.
    pub fn api_key(&self) -> Option<ApiKey> {
        self.ai
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                API_KEY_ENVS
                    .iter()
                    .find_map(|name| env::var(name).ok().filter(|k| !k.trim().is_empty()))
            })
            .map(ApiKey::new)
    }

    pub fn set_api_key(&mut self, key: &str) -> TaiResult<()> {
        validate_api_key(key)?;
        self.ai.api_key = Some(key.trim().to_string());
        Ok(())
    }

    /// Whether the external fallback can be used at all.
    pub fn is_ai_enabled(&self) -> bool {
        self.ai.enabled
            && match self.ai.provider {
                Provider::Ollama => true,
                Provider::OpenAi => self.api_key().is_some(),
            }
    }
}

/// Checks the shape of an OpenAI-style key. It does not contact the API.
pub fn validate_api_key(key: &str) -> TaiResult<()> {
    let key = key.trim();
    if key.is_empty() {
        return Err(TaiError::InvalidApiKey("API key cannot be empty".to_string()));
    }
    if !key.starts_with("sk-") {
        return Err(TaiError::InvalidApiKey("API key should start with 'sk-'".to_string()));
    }
    if key.len() < 20 {
        return Err(TaiError::InvalidApiKey("API key seems too short".to_string()));
    }
    let pattern = Regex::new(r"^sk-[A-Za-z0-9_-]+$").map_err(|e| TaiError::Config(e.to_string()))?;
    if !pattern.is_match(key) {
        return Err(TaiError::InvalidApiKey("API key format appears invalid".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "sk-test0123456789abcdefXYZ";

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert!(settings.ai.enabled);
        assert_eq!(settings.ai.provider, Provider::OpenAi);
        assert_eq!(settings.execution.timeout_secs, 30);
        assert_eq!(settings.execution.max_output_lines, 50);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut settings = Settings::default();
        settings.set_api_key(KEY).unwrap();
        settings.ai.model = "gpt-4o-mini".to_string();
        settings.execution.timeout_secs = 5;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.api_key().unwrap().expose(), KEY);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[ai]\nprovider = \"ollama\"\nmodel = \"qwen2.5:3b\"\n").unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.ai.provider, Provider::Ollama);
        assert_eq!(settings.ai.max_tokens, 150);
        assert_eq!(settings.execution, ExecutionSettings::default());
        assert!(settings.is_ai_enabled());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[ai\nenabled = ").unwrap();
        assert!(matches!(Settings::load(&path), Err(TaiError::ConfigParse(_))));
    }

    #[test]
    fn disabled_ai_is_never_enabled() {
        let mut settings = Settings::default();
        settings.set_api_key(KEY).unwrap();
        assert!(settings.is_ai_enabled());
        settings.ai.enabled = false;
        assert!(!settings.is_ai_enabled());
    }

    #[test]
    fn reset_clears_key() {
        let mut settings = Settings::default();
        settings.set_api_key(KEY).unwrap();
        settings.reset_to_defaults();
        assert_eq!(settings.ai.api_key, None);
    }

    #[test]
    fn api_key_validation() {
        assert!(validate_api_key(KEY).is_ok());
        assert!(validate_api_key("sk-proj-abcdefghijklmnop_123").is_ok());
        assert!(validate_api_key("").is_err());
        assert!(validate_api_key("pk-0123456789abcdefghij").is_err());
        assert!(validate_api_key("sk-short").is_err());
        assert!(validate_api_key("sk-has spaces in the key!!").is_err());
    }

    #[test]
    fn api_key_is_redacted() {
        let key = ApiKey::new(KEY);
        assert_eq!(format!("{:?}", key), "ApiKey(<redacted>)");
        assert!(!key.to_string().contains("0123456789"));
        assert!(key.to_string().starts_with("sk-tes"));
    }
}

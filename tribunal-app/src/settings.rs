//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::credentials::KeyCipher;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub target_language: String,
    pub judge_model: String,
    pub judge_base_url: String,
    /// Encrypted with [`KeyCipher`]; never stored in the clear.
    pub judge_api_key_enc: Option<String>,
    pub default_model_id: String,
    pub models_dir: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            target_language: "french".into(),
            judge_model: "gpt-4o".into(),
            judge_base_url: "https://api.openai.com/v1".into(),
            judge_api_key_enc: None,
            default_model_id: tribunal_core::registry::DEFAULT_MODEL_ID.into(),
            models_dir: None,
        }
    }
}

/// Settings snapshot safe to display: no credential material.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    pub target_language: String,
    pub judge_model: String,
    pub judge_base_url: String,
    pub has_judge_api_key: bool,
    pub default_model_id: String,
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.target_language = normalize_target_language(&self.target_language);
        self.judge_model = {
            let model = self.judge_model.trim();
            if model.is_empty() {
                "gpt-4o".into()
            } else {
                model.to_string()
            }
        };
        self.judge_base_url = {
            let url = self.judge_base_url.trim().trim_end_matches('/');
            if url.is_empty() {
                "https://api.openai.com/v1".into()
            } else {
                url.to_string()
            }
        };
        self.judge_api_key_enc = self
            .judge_api_key_enc
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        if self.default_model_id.trim().is_empty() {
            self.default_model_id = tribunal_core::registry::DEFAULT_MODEL_ID.into();
        }
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            target_language: self.target_language.clone(),
            judge_model: self.judge_model.clone(),
            judge_base_url: self.judge_base_url.clone(),
            has_judge_api_key: self.judge_api_key_enc.is_some(),
            default_model_id: self.default_model_id.clone(),
        }
    }

    /// Decrypt the stored judge API key, if any.
    pub fn judge_api_key(&self, cipher: &KeyCipher) -> Option<String> {
        self.judge_api_key_enc
            .as_ref()
            .and_then(|enc| cipher.decrypt(enc))
            .filter(|k| !k.is_empty())
    }

    pub fn set_judge_api_key(&mut self, cipher: &KeyCipher, key: &str) -> Result<(), String> {
        let key = key.trim();
        if key.is_empty() {
            self.judge_api_key_enc = None;
            return Ok(());
        }
        self.judge_api_key_enc = Some(cipher.encrypt(key)?);
        Ok(())
    }
}

pub fn normalize_target_language(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "ru" | "rus" | "russian" => "russian".into(),
        "zh" | "zh-cn" | "zh-hans" | "mandarin" | "chinese" => "chinese".into(),
        "vi" | "vie" | "vietnamese" => "vietnamese".into(),
        _ => "french".into(),
    }
}

/// Environment variables take precedence; settings only fill the gaps.
pub fn apply_runtime_env_from_settings(settings: &AppSettings, cipher: &KeyCipher) {
    if std::env::var("TRIBUNAL_TARGET_LANGUAGE").is_err() {
        std::env::set_var("TRIBUNAL_TARGET_LANGUAGE", &settings.target_language);
    }
    if std::env::var("TRIBUNAL_JUDGE_MODEL").is_err() {
        std::env::set_var("TRIBUNAL_JUDGE_MODEL", &settings.judge_model);
    }
    if std::env::var("TRIBUNAL_JUDGE_BASE_URL").is_err() {
        std::env::set_var("TRIBUNAL_JUDGE_BASE_URL", &settings.judge_base_url);
    }
    if std::env::var("TRIBUNAL_JUDGE_API_KEY").is_err() {
        if let Some(key) = settings.judge_api_key(cipher) {
            std::env::set_var("TRIBUNAL_JUDGE_API_KEY", key);
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Tribunal")
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
            .join("tribunal")
            .join("settings.json")
    }
}

/// Default cache root for downloaded model weights.
pub fn default_models_dir() -> PathBuf {
    default_settings_path()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cache")
}

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

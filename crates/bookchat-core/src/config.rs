use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::DEFAULT_API_BASE_URL;
use crate::selection::DEFAULT_MAX_SELECTION_LENGTH;

/// Environment variable that overrides the configured chat service URL
pub const API_URL_ENV: &str = "BOOKCHAT_API_URL";
pub const DEFAULT_MAX_QUESTION_LENGTH: usize = 500;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub user_id: Option<String>,
    pub book_dir: Option<PathBuf>,
    pub max_question_length: usize,
    pub max_selection_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            api_base_url: None,
            user_id: None,
            book_dir: None,
            max_question_length: DEFAULT_MAX_QUESTION_LENGTH,
            max_selection_length: DEFAULT_MAX_SELECTION_LENGTH,
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    /// Env var first, then the config file, then the local development URL
    pub fn api_base_url(&self) -> String {
        Self::pick_api_base_url(std::env::var(API_URL_ENV).ok(), self.api_base_url.as_deref())
    }

    fn pick_api_base_url(from_env: Option<String>, from_file: Option<&str>) -> String {
        from_env
            .filter(|url| !url.trim().is_empty())
            .or_else(|| from_file.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    /// Return the saved user id, generating and persisting one on first use
    pub fn ensure_user_id(&mut self) -> Result<String> {
        if let Some(id) = &self.user_id {
            return Ok(id.clone());
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.user_id = Some(id.clone());
        self.save()?;
        Ok(id)
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("bookchat").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::new());
        assert_eq!(config.max_question_length, 500);
        assert_eq!(config.max_selection_length, 5000);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::new();
        config.api_base_url = Some("https://book.example.com/api".to_string());
        config.book_dir = Some(PathBuf::from("/srv/book/docs"));
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"max_question_length": 280}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.max_question_length, 280);
        assert_eq!(config.max_selection_length, DEFAULT_MAX_SELECTION_LENGTH);
        assert!(config.api_base_url.is_none());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_api_base_url_precedence() {
        assert_eq!(Config::pick_api_base_url(None, None), DEFAULT_API_BASE_URL);
        assert_eq!(
            Config::pick_api_base_url(None, Some("http://file/api")),
            "http://file/api"
        );
        assert_eq!(
            Config::pick_api_base_url(Some("http://env/api".into()), Some("http://file/api")),
            "http://env/api"
        );
        assert_eq!(
            Config::pick_api_base_url(Some("  ".into()), Some("http://file/api")),
            "http://file/api"
        );
    }
}

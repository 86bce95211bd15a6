use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::{Context, eyre};
use serde::{Deserialize, Serialize};

use crate::ports::music_service::Codec;
use crate::services::library_sync::DownloadPolicy;

const APP_DIR: &str = "music-sync";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Root of the mirrored tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    music_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    users_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default)]
    download: DownloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub codec: Codec,
    pub preferred_bitrate: u32,
    pub fallback_bitrate: u32,
    /// Humantime duration, e.g. "1s" or "500ms"
    pub retry_backoff: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            codec: Codec::Mp3,
            preferred_bitrate: 320,
            fallback_bitrate: 192,
            retry_backoff: "1s".to_string(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join(APP_DIR).join("config.toml"))
    }

    /// Load the default config file; a missing file means all defaults.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Write the default config, unless one is already there
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::config_path().ok_or_else(|| eyre!("No config directory available"))?;
        if path.exists() {
            tracing::info!("Config file already exists: {}", path.display());
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }

        let defaults = Config {
            music_directory: Some(Self::default_music_directory().display().to_string()),
            users_file: Some(Self::default_users_file().display().to_string()),
            token: None,
            download: DownloadConfig::default(),
        };
        let contents =
            toml::to_string_pretty(&defaults).wrap_err("Failed to serialize default config")?;
        std::fs::write(&path, contents)
            .wrap_err_with(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(path)
    }

    /// Expand ~ to home directory
    fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(rest);
        }
        PathBuf::from(path)
    }

    fn default_music_directory() -> PathBuf {
        dirs::audio_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("MUSIC")
    }

    fn default_users_file() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("users_list.json")
    }

    pub fn music_directory(&self) -> PathBuf {
        match &self.music_directory {
            Some(dir) => Self::expand_path(dir),
            None => Self::default_music_directory(),
        }
    }

    pub fn users_file(&self) -> PathBuf {
        match &self.users_file {
            Some(file) => Self::expand_path(file),
            None => Self::default_users_file(),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn download_policy(&self) -> Result<DownloadPolicy> {
        let retry_backoff = humantime::parse_duration(&self.download.retry_backoff)
            .wrap_err_with(|| {
                format!(
                    "Invalid download.retry_backoff: {}",
                    self.download.retry_backoff
                )
            })?;

        Ok(DownloadPolicy {
            codec: self.download.codec,
            preferred_bitrate: self.download.preferred_bitrate,
            fallback_bitrate: self.download.fallback_bitrate,
            retry_backoff,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_config(contents: &str) -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        (temp, path)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let (_temp, path) = write_config("");
        let config = Config::from_file(&path).unwrap();

        let policy = config.download_policy().unwrap();
        assert_eq!(policy.codec, Codec::Mp3);
        assert_eq!(policy.preferred_bitrate, 320);
        assert_eq!(policy.fallback_bitrate, 192);
        assert_eq!(policy.retry_backoff, Duration::from_secs(1));
        assert!(config.music_directory().ends_with("MUSIC"));
        assert!(config.users_file().ends_with("music-sync/users_list.json"));
        assert_eq!(config.token(), None);
    }

    #[test]
    fn test_full_file() {
        let (_temp, path) = write_config(
            r#"
music_directory = "/srv/music"
users_file = "/srv/users.json"
token = "secret"

[download]
codec = "aac"
preferred_bitrate = 256
retry_backoff = "250ms"
"#,
        );
        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.music_directory(), PathBuf::from("/srv/music"));
        assert_eq!(config.users_file(), PathBuf::from("/srv/users.json"));
        assert_eq!(config.token(), Some("secret"));

        let policy = config.download_policy().unwrap();
        assert_eq!(policy.codec, Codec::Aac);
        assert_eq!(policy.preferred_bitrate, 256);
        assert_eq!(policy.fallback_bitrate, 192);
        assert_eq!(policy.retry_backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_backoff_is_rejected() {
        let (_temp, path) = write_config("[download]\nretry_backoff = \"soon\"\n");
        let config = Config::from_file(&path).unwrap();
        assert!(config.download_policy().is_err());
    }

    #[test]
    fn test_tilde_is_expanded() {
        let (_temp, path) = write_config("music_directory = \"~/MUSIC\"\n");
        let config = Config::from_file(&path).unwrap();

        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.music_directory(), home.join("MUSIC"));
        }
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(Config::from_file(&temp.path().join("absent.toml")).is_err());
    }
}
